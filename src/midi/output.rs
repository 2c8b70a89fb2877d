// MIDI Output - delivers pattern notes to a midir port

use crate::midi::event::MidiEvent;
use crate::sequencer::error::SequencerError;
use crate::sequencer::output::{OutputAdapter, OutputEvent};
use midir::{MidiOutput as MidirOutput, MidiOutputConnection};

const CLIENT_NAME: &str = "euclid_seq output";

pub struct MidiOutput {
    port_name: String,
    connection: MidiOutputConnection,
}

impl MidiOutput {
    pub fn connect(selector: Option<&str>) -> Result<Self, SequencerError> {
        let midi_out = MidirOutput::new(CLIENT_NAME)
            .map_err(|e| SequencerError::Midi(format!("Failed to create MIDI output: {}", e)))?;

        let (port, port_name) = super::find_port(&midi_out, selector).ok_or_else(|| {
            SequencerError::Midi(format!(
                "MIDI output port not found: {}",
                selector.unwrap_or("<first>")
            ))
        })?;

        let connection = midi_out
            .connect(&port, "euclid-seq-out")
            .map_err(|e| SequencerError::Midi(format!("Failed to connect: {}", e)))?;

        tracing::info!(port = %port_name, "MIDI output connected");
        Ok(Self {
            port_name,
            connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn send(&mut self, event: &MidiEvent) -> Result<(), SequencerError> {
        self.connection
            .send(&event.to_bytes())
            .map_err(|e| SequencerError::Midi(format!("Failed to send {:?}: {}", event, e)))
    }

    /// Available output port names
    pub fn list_ports() -> Result<Vec<String>, SequencerError> {
        let midi_out = MidirOutput::new(CLIENT_NAME)
            .map_err(|e| SequencerError::Midi(format!("Failed to create MIDI output: {}", e)))?;
        Ok(super::port_names(&midi_out))
    }
}

impl OutputAdapter for MidiOutput {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn deliver(&mut self, event: &OutputEvent) -> Result<(), SequencerError> {
        match event {
            OutputEvent::Note(note) => self.send(&MidiEvent::from(note)),
            OutputEvent::Osc(_) => Ok(()),
        }
    }
}
