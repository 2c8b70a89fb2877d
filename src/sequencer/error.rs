// Sequencer errors - configuration rejection, clock liveness, output backpressure

use crate::sequencer::pattern::PatternId;
use std::time::Duration;

/// Rejected configuration mutation.
///
/// Returned synchronously by every call that tries to change pattern or
/// clock configuration. The target keeps its previous valid state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Steps must be at least 1 (got {0})")]
    StepsOutOfRange(u32),

    #[error("Fills ({fills}) cannot exceed steps ({steps})")]
    FillsExceedSteps { fills: u32, steps: u32 },

    #[error("Quantization must be between 1 and {max} (got {quantization})")]
    QuantizationOutOfRange { quantization: u32, max: u32 },

    #[error("MIDI channel must be 0-15 (got {0})")]
    InvalidChannel(u8),

    #[error("MIDI {field} must be 0-127 (got {value})")]
    InvalidMidiValue { field: &'static str, value: u8 },

    #[error("Note length must be at least 1 pulse")]
    InvalidNoteLength,

    #[error("Tempo must be between {min} and {max} BPM (got {bpm})")]
    InvalidTempo { bpm: f64, min: f64, max: f64 },

    #[error("Pulses per quarter note must be between 1 and {max} (got {ppqn})")]
    InvalidPpqn { ppqn: u32, max: u32 },

    #[error("Pattern too long: {steps} steps of {step_length} pulses")]
    PatternTooLong { steps: u32, step_length: u32 },

    #[error("MIDI velocity must be 1-127 (got {0})")]
    InvalidVelocity(u8),

    #[error("External clock requires an enabled MIDI input")]
    ExternalClockUnavailable,

    #[error("Unknown pattern {0}")]
    UnknownPattern(PatternId),

    #[error("Pattern {0} already exists")]
    DuplicatePattern(PatternId),
}

/// The external clock has been silent longer than the liveness window.
///
/// Pattern positions hold their last value until a tick resumes or the
/// transport is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("External clock silent for {silent_for:?} (timeout {timeout:?})")]
pub struct ClockLivenessError {
    pub silent_for: Duration,
    pub timeout: Duration,
}

/// The output buffer could not accept events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Output sink backpressure: {dropped} event(s) dropped, {held} release(s) held")]
pub struct SinkBackpressure {
    pub dropped: u64,
    pub held: usize,
}

/// Top level error for the engine and its adapters
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Clock error: {0}")]
    ClockLiveness(#[from] ClockLivenessError),

    #[error("Output error: {0}")]
    Backpressure(#[from] SinkBackpressure),

    #[error("Command queue full")]
    QueueFull,

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("OSC error: {0}")]
    Osc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn thread: {0}")]
    Thread(String),
}
