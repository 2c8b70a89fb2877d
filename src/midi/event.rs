// MIDI event types - raw message parsing and encoding
// Channel voice messages keep their channel (0-15), triggers match on it

use crate::sequencer::output::{NoteEvent, NoteKind};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

const TIMING_CLOCK: u8 = 0xF8;
const START: u8 = 0xFA;
const CONTINUE: u8 = 0xFB;
const STOP: u8 = 0xFC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    /// 24 per quarter note on the wire, one pulse each for the scheduler
    Clock,
    Start,
    Continue,
    Stop,
}

impl MidiEvent {
    /// Parse a raw MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;

        // System realtime, single byte
        match status {
            TIMING_CLOCK => return Some(MidiEvent::Clock),
            START => return Some(MidiEvent::Start),
            CONTINUE => return Some(MidiEvent::Continue),
            STOP => return Some(MidiEvent::Stop),
            _ => {}
        }

        let channel = status & 0x0F;
        let [first, second, ..] = *data else {
            return None;
        };
        // Data bytes never have the high bit set
        if first > 0x7F || second > 0x7F {
            return None;
        }

        match status & 0xF0 {
            NOTE_ON => {
                // Velocity 0 = Note Off
                if second == 0 {
                    Some(MidiEvent::NoteOff {
                        channel,
                        note: first,
                    })
                } else {
                    Some(MidiEvent::NoteOn {
                        channel,
                        note: first,
                        velocity: second,
                    })
                }
            }
            NOTE_OFF => Some(MidiEvent::NoteOff {
                channel,
                note: first,
            }),
            _ => None,
        }
    }

    /// Encode back to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => vec![NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiEvent::NoteOff { channel, note } => {
                vec![NOTE_OFF | (channel & 0x0F), note & 0x7F, 0]
            }
            MidiEvent::Clock => vec![TIMING_CLOCK],
            MidiEvent::Start => vec![START],
            MidiEvent::Continue => vec![CONTINUE],
            MidiEvent::Stop => vec![STOP],
        }
    }

    /// System realtime messages drive the external clock
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            MidiEvent::Clock | MidiEvent::Start | MidiEvent::Continue | MidiEvent::Stop
        )
    }
}

impl From<&NoteEvent> for MidiEvent {
    fn from(note: &NoteEvent) -> Self {
        match note.kind {
            NoteKind::NoteOn => MidiEvent::NoteOn {
                channel: note.channel,
                note: note.pitch,
                velocity: note.velocity,
            },
            NoteKind::NoteOff => MidiEvent::NoteOff {
                channel: note.channel,
                note: note.pitch,
            },
        }
    }
}
