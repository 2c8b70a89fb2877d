// MIDI Input - external clock, transport and trigger notes
// The midir callback runs on its own thread and only pushes into a ring buffer

use crate::messaging::channels::MidiProducer;
use crate::midi::event::MidiEvent;
use crate::sequencer::error::SequencerError;
use midir::{Ignore, MidiInput as MidirInput, MidiInputConnection};
use ringbuf::traits::Producer;

const CLIENT_NAME: &str = "euclid_seq input";

pub struct MidiInput {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl MidiInput {
    /// Connect to a port (see `find_port` for the selector) and forward
    /// every parsed message to the scheduler.
    pub fn connect(selector: Option<&str>, mut midi_tx: MidiProducer) -> Result<Self, SequencerError> {
        let mut midi_in = MidirInput::new(CLIENT_NAME)
            .map_err(|e| SequencerError::Midi(format!("MIDI init error: {}", e)))?;
        // Timing clock and transport are needed, sysex and active sensing are not
        midi_in.ignore(Ignore::SysexAndActiveSense);

        let (port, port_name) = super::find_port(&midi_in, selector).ok_or_else(|| {
            SequencerError::Midi(format!(
                "MIDI input port not found: {}",
                selector.unwrap_or("<first>")
            ))
        })?;

        let mut dropped: u64 = 0;
        let connection = midi_in
            .connect(
                &port,
                "euclid-seq-in",
                move |_timestamp, message, _| {
                    let Some(event) = MidiEvent::from_bytes(message) else {
                        return;
                    };
                    // try_push is not blocking
                    if midi_tx.try_push(event).is_err() {
                        dropped += 1;
                        if dropped.is_power_of_two() {
                            tracing::warn!(dropped, "MIDI input buffer full, event ignored");
                        }
                    }
                },
                (),
            )
            .map_err(|e| SequencerError::Midi(format!("MIDI connection failed: {}", e)))?;

        tracing::info!(port = %port_name, "MIDI input connected");

        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Available input port names
    pub fn list_ports() -> Result<Vec<String>, SequencerError> {
        let midi_in = MidirInput::new(CLIENT_NAME)
            .map_err(|e| SequencerError::Midi(format!("MIDI init error: {}", e)))?;
        Ok(super::port_names(&midi_in))
    }
}
