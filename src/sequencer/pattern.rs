// Pattern - One Euclidean rhythm with its timing, output and trigger settings
// Derived timing and the cached rhythm are recomputed on every structural change

use crate::sequencer::error::ConfigurationError;
use crate::sequencer::rhythm;
use crate::sequencer::timeline::{self, DEFAULT_PPQN, DEFAULT_QUANTIZATION};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for patterns
pub type PatternId = Uuid;

/// Generate a fresh pattern ID
pub fn generate_pattern_id() -> PatternId {
    Uuid::new_v4()
}

/// MIDI note sent for every active step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiOutSettings {
    /// MIDI channel (0-15)
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    /// Pulses between NoteOn and NoteOff
    pub note_length: u32,
}

impl MidiOutSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_channel(self.channel)?;
        validate_midi_value("pitch", self.pitch)?;
        // Velocity 0 would read as a release on the wire
        if self.velocity == 0 || self.velocity > 127 {
            return Err(ConfigurationError::InvalidVelocity(self.velocity));
        }
        if self.note_length == 0 {
            return Err(ConfigurationError::InvalidNoteLength);
        }
        Ok(())
    }
}

impl Default for MidiOutSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            pitch: 60,
            velocity: 100,
            note_length: DEFAULT_PPQN / 4,
        }
    }
}

/// External note that gates this pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub enabled: bool,
    pub channel: u8,
    pub pitch: u8,
}

impl TriggerSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_channel(self.channel)?;
        validate_midi_value("trigger pitch", self.pitch)
    }

    /// Does an incoming note address this trigger?
    pub fn matches(&self, channel: u8, pitch: u8) -> bool {
        self.enabled && self.channel == channel && self.pitch == pitch
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: 9,
            pitch: 60,
        }
    }
}

/// Plain configuration record of a pattern.
///
/// This is what a persistence layer reads on load and writes on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    /// Absent on brand new records, a fresh ID is assigned on creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<PatternId>,
    pub name: String,
    pub steps: u32,
    pub fills: u32,
    /// Taken mod steps
    pub rotation: i32,
    /// Subdivisions per whole note
    pub quantization: u32,
    pub midi_out: MidiOutSettings,
    pub trigger: TriggerSettings,
    /// Empty string disables OSC output
    pub osc_out_address: String,
    pub mute: bool,
    pub solo: bool,
}

impl PatternSettings {
    /// Defaults for the n-th pattern of a project
    pub fn numbered(n: usize) -> Self {
        Self {
            name: format!("Pattern {}", n),
            ..Self::default()
        }
    }

    /// Check every field against the pattern invariants
    pub fn validate(&self, ppqn: u32) -> Result<(), ConfigurationError> {
        validate_structure(self.steps, self.fills)?;
        let step_length = timeline::step_length(ppqn, self.quantization)?;
        timeline::pattern_length(self.steps, step_length)?;
        self.midi_out.validate()?;
        self.trigger.validate()
    }
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: String::from("Pattern"),
            steps: 16,
            fills: 4,
            rotation: 0,
            quantization: DEFAULT_QUANTIZATION,
            midi_out: MidiOutSettings::default(),
            trigger: TriggerSettings::default(),
            osc_out_address: String::new(),
            mute: false,
            solo: false,
        }
    }
}

/// Read-only view of a pattern's playback state for displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSnapshot {
    pub id: PatternId,
    pub name: String,
    pub position: u32,
    pub step: u32,
    pub pattern_length: u32,
    pub running: bool,
    pub mute: bool,
    pub solo: bool,
}

/// NoteOff waiting for its countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingRelease {
    pub channel: u8,
    pub pitch: u8,
    pub remaining: u32,
}

/// A Euclidean pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    id: PatternId,
    ppqn: u32,
    settings: PatternSettings,

    // Derived timing
    step_length: u32,
    pattern_length: u32,

    // Rhythm before and after rotation
    base_rhythm: Vec<bool>,
    rhythm: Vec<bool>,

    // Runtime state
    position: u32,
    running: bool,
    /// Next pulse lands on the current position instead of advancing
    cued: bool,
    pending_releases: Vec<PendingRelease>,
}

impl Pattern {
    /// Create a pattern from a settings record.
    ///
    /// The record's ID is kept when present, otherwise a fresh one is
    /// generated. Position starts at 0 and the pattern is stopped.
    pub fn new(settings: PatternSettings, ppqn: u32) -> Result<Self, ConfigurationError> {
        timeline::validate_ppqn(ppqn)?;
        settings.validate(ppqn)?;

        let id = settings.id.unwrap_or_else(generate_pattern_id);
        let step_length = timeline::step_length(ppqn, settings.quantization)?;
        let pattern_length = timeline::pattern_length(settings.steps, step_length)?;
        let base_rhythm = rhythm::generate(settings.steps, settings.fills)?;
        let rhythm = rhythm::rotate(&base_rhythm, settings.rotation);

        Ok(Self {
            id,
            ppqn,
            settings: PatternSettings {
                id: Some(id),
                ..settings
            },
            step_length,
            pattern_length,
            base_rhythm,
            rhythm,
            position: 0,
            running: false,
            cued: true,
            pending_releases: Vec::new(),
        })
    }

    /// Pattern with default settings
    pub fn new_default(name: &str, ppqn: u32) -> Result<Self, ConfigurationError> {
        Self::new(
            PatternSettings {
                name: name.to_string(),
                ..PatternSettings::default()
            },
            ppqn,
        )
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Current configuration record (always carries the ID)
    pub fn settings(&self) -> &PatternSettings {
        &self.settings
    }

    pub fn steps(&self) -> u32 {
        self.settings.steps
    }

    pub fn fills(&self) -> u32 {
        self.settings.fills
    }

    pub fn rotation(&self) -> i32 {
        self.settings.rotation
    }

    pub fn quantization(&self) -> u32 {
        self.settings.quantization
    }

    pub fn midi_out(&self) -> &MidiOutSettings {
        &self.settings.midi_out
    }

    pub fn trigger(&self) -> &TriggerSettings {
        &self.settings.trigger
    }

    pub fn osc_out_address(&self) -> &str {
        &self.settings.osc_out_address
    }

    pub fn is_muted(&self) -> bool {
        self.settings.mute
    }

    pub fn is_soloed(&self) -> bool {
        self.settings.solo
    }

    /// Pulses per step
    pub fn step_length(&self) -> u32 {
        self.step_length
    }

    /// Pulses per full cycle
    pub fn pattern_length(&self) -> u32 {
        self.pattern_length
    }

    /// Rotated rhythm, one entry per step
    pub fn rhythm(&self) -> &[bool] {
        &self.rhythm
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Step containing the current position
    pub fn current_step(&self) -> u32 {
        self.position / self.step_length
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_cued(&self) -> bool {
        self.cued
    }

    pub fn is_step_active(&self, step: u32) -> bool {
        self.rhythm.get(step as usize).copied().unwrap_or(false)
    }

    pub fn snapshot(&self) -> PatternSnapshot {
        PatternSnapshot {
            id: self.id,
            name: self.settings.name.clone(),
            position: self.position,
            step: self.current_step(),
            pattern_length: self.pattern_length,
            running: self.running,
            mute: self.settings.mute,
            solo: self.settings.solo,
        }
    }

    // --- Configuration ---

    /// Change steps, fills and rotation together
    pub fn set_structure(
        &mut self,
        steps: u32,
        fills: u32,
        rotation: i32,
    ) -> Result<(), ConfigurationError> {
        validate_structure(steps, fills)?;
        let (step_length, pattern_length) = self.timing_for(steps, self.settings.quantization)?;
        let base_rhythm = rhythm::generate(steps, fills)?;

        self.settings.steps = steps;
        self.settings.fills = fills;
        self.settings.rotation = rotation;
        self.rhythm = rhythm::rotate(&base_rhythm, rotation);
        self.base_rhythm = base_rhythm;
        self.apply_timing(step_length, pattern_length);
        Ok(())
    }

    pub fn set_steps(&mut self, steps: u32) -> Result<(), ConfigurationError> {
        self.set_structure(steps, self.settings.fills, self.settings.rotation)
    }

    pub fn set_fills(&mut self, fills: u32) -> Result<(), ConfigurationError> {
        self.set_structure(self.settings.steps, fills, self.settings.rotation)
    }

    /// Rotation only shifts the cached base rhythm
    pub fn set_rotation(&mut self, rotation: i32) {
        self.settings.rotation = rotation;
        self.rhythm = rhythm::rotate(&self.base_rhythm, rotation);
    }

    pub fn set_quantization(&mut self, quantization: u32) -> Result<(), ConfigurationError> {
        let (step_length, pattern_length) = self.timing_for(self.settings.steps, quantization)?;
        self.settings.quantization = quantization;
        self.apply_timing(step_length, pattern_length);
        Ok(())
    }

    pub fn set_midi_out(&mut self, midi_out: MidiOutSettings) -> Result<(), ConfigurationError> {
        midi_out.validate()?;
        self.settings.midi_out = midi_out;
        Ok(())
    }

    pub fn set_trigger(&mut self, trigger: TriggerSettings) -> Result<(), ConfigurationError> {
        trigger.validate()?;
        self.settings.trigger = trigger;
        Ok(())
    }

    pub fn set_osc_out_address(&mut self, address: String) {
        self.settings.osc_out_address = address;
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.settings.mute = mute;
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.settings.solo = solo;
    }

    pub fn set_name(&mut self, name: String) {
        self.settings.name = name;
    }

    /// Replace the whole configuration; nothing changes if the record is invalid.
    ///
    /// The pattern keeps its own ID whatever the record says.
    pub fn apply_settings(&mut self, settings: PatternSettings) -> Result<(), ConfigurationError> {
        settings.validate(self.ppqn)?;
        let (step_length, pattern_length) = self.timing_for(settings.steps, settings.quantization)?;

        let structure_changed =
            settings.steps != self.settings.steps || settings.fills != self.settings.fills;
        let rotation_changed = settings.rotation != self.settings.rotation;
        let timing_changed =
            structure_changed || settings.quantization != self.settings.quantization;

        self.settings = PatternSettings {
            id: Some(self.id),
            ..settings
        };

        if structure_changed {
            self.base_rhythm = rhythm::generate(self.settings.steps, self.settings.fills)?;
        }
        if structure_changed || rotation_changed {
            self.rhythm = rhythm::rotate(&self.base_rhythm, self.settings.rotation);
        }
        if timing_changed {
            self.apply_timing(step_length, pattern_length);
        }
        Ok(())
    }

    /// Step and cycle length for a candidate structure, checked before any mutation
    fn timing_for(&self, steps: u32, quantization: u32) -> Result<(u32, u32), ConfigurationError> {
        let step_length = timeline::step_length(self.ppqn, quantization)?;
        let pattern_length = timeline::pattern_length(steps, step_length)?;
        Ok((step_length, pattern_length))
    }

    fn apply_timing(&mut self, step_length: u32, pattern_length: u32) {
        self.step_length = step_length;
        self.pattern_length = pattern_length;
        if self.position >= self.pattern_length {
            self.position = self.pattern_length - 1;
        }
    }

    // --- Runtime ---

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop in place, the position is kept
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Back to position 0, the next pulse plays step 0
    pub fn rewind(&mut self) {
        self.position = 0;
        self.cued = true;
    }

    /// Gate restart: rewind and run
    pub fn restart(&mut self) {
        self.rewind();
        self.running = true;
    }

    /// Move one pulse forward.
    ///
    /// Returns the step index when this pulse starts a step. A cued pattern
    /// lands on its current position without moving.
    pub(crate) fn advance(&mut self) -> Option<u32> {
        if self.cued {
            self.cued = false;
            return (self.position % self.step_length == 0).then(|| self.current_step());
        }

        let next = (self.position + 1) % self.pattern_length;
        let step_index = self.position / self.step_length;
        let next_step_index = next / self.step_length;
        self.position = next;

        assert!(
            self.position < self.pattern_length,
            "pattern position escaped its cycle"
        );

        (next_step_index != step_index || next == 0).then_some(next_step_index)
    }

    pub(crate) fn schedule_release(&mut self, channel: u8, pitch: u8, pulses: u32) {
        self.pending_releases.push(PendingRelease {
            channel,
            pitch,
            remaining: pulses,
        });
    }

    /// Count every pending release down by one pulse, returning the expired ones
    pub(crate) fn count_down_releases(&mut self) -> Vec<PendingRelease> {
        if self.pending_releases.is_empty() {
            return Vec::new();
        }

        for release in &mut self.pending_releases {
            release.remaining = release.remaining.saturating_sub(1);
        }

        let (expired, pending): (Vec<_>, Vec<_>) = self
            .pending_releases
            .drain(..)
            .partition(|release| release.remaining == 0);
        self.pending_releases = pending;
        expired
    }

    /// Take every pending release at once (transport stop)
    pub(crate) fn drain_releases(&mut self) -> Vec<PendingRelease> {
        std::mem::take(&mut self.pending_releases)
    }

    pub fn pending_release_count(&self) -> usize {
        self.pending_releases.len()
    }
}

fn validate_structure(steps: u32, fills: u32) -> Result<(), ConfigurationError> {
    if steps < 1 {
        return Err(ConfigurationError::StepsOutOfRange(steps));
    }
    if fills > steps {
        return Err(ConfigurationError::FillsExceedSteps { fills, steps });
    }
    Ok(())
}

fn validate_channel(channel: u8) -> Result<(), ConfigurationError> {
    if channel > 15 {
        return Err(ConfigurationError::InvalidChannel(channel));
    }
    Ok(())
}

fn validate_midi_value(field: &'static str, value: u8) -> Result<(), ConfigurationError> {
    if value > 127 {
        return Err(ConfigurationError::InvalidMidiValue { field, value });
    }
    Ok(())
}
