// Command types - Control surface -> scheduler thread

use crate::sequencer::pattern::{MidiOutSettings, PatternId, PatternSettings, TriggerSettings};
use crate::sequencer::transport::ClockMode;

/// Every mutation of scheduler state goes through one of these.
///
/// Commands are applied on the scheduler thread before the next pulse is
/// processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Transport
    Start,
    Stop,
    Rewind,
    SetTempo(f64),
    SetClockMode(ClockMode),

    // Pattern collection
    AddPattern(Box<PatternSettings>),
    RemovePattern(PatternId),
    UpdatePattern(PatternId, Box<PatternSettings>),
    LoadProject {
        tempo: f64,
        patterns: Vec<PatternSettings>,
    },
    Clear,

    // Single pattern fields
    SetStructure {
        id: PatternId,
        steps: u32,
        fills: u32,
        rotation: i32,
    },
    SetSteps { id: PatternId, steps: u32 },
    SetFills { id: PatternId, fills: u32 },
    SetRotation { id: PatternId, rotation: i32 },
    SetQuantization { id: PatternId, quantization: u32 },
    SetMidiOut { id: PatternId, settings: MidiOutSettings },
    SetTrigger { id: PatternId, settings: TriggerSettings },
    SetOscAddress { id: PatternId, address: String },
    SetName { id: PatternId, name: String },
    SetMute { id: PatternId, mute: bool },
    SetSolo { id: PatternId, solo: bool },

    Quit,
}

impl Command {
    /// Pattern targeted by this command, if any
    pub fn pattern_id(&self) -> Option<PatternId> {
        match self {
            Command::RemovePattern(id) | Command::UpdatePattern(id, _) => Some(*id),
            Command::SetStructure { id, .. }
            | Command::SetSteps { id, .. }
            | Command::SetFills { id, .. }
            | Command::SetRotation { id, .. }
            | Command::SetQuantization { id, .. }
            | Command::SetMidiOut { id, .. }
            | Command::SetTrigger { id, .. }
            | Command::SetOscAddress { id, .. }
            | Command::SetName { id, .. }
            | Command::SetMute { id, .. }
            | Command::SetSolo { id, .. } => Some(*id),
            _ => None,
        }
    }
}
