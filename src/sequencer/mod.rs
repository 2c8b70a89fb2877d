// Sequencer module - Euclidean pattern generation and pulse scheduling
// Pure rhythm/timing code at the bottom, threads and queues in `engine`

pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod output;
pub mod pattern;
pub mod rhythm;
pub mod scheduler;
pub mod timeline;
pub mod transport;
pub mod trigger;

pub use clock::{ClockEngine, ClockSignal, InternalClock, PulseAcceptance};
pub use context::{ContextOptions, SchedulerContext};
pub use engine::{EngineConfig, EngineHandle, SequencerEngine};
pub use error::{ClockLivenessError, ConfigurationError, SequencerError, SinkBackpressure};
pub use output::{
    EventSink, NoteEvent, NoteKind, OscEvent, OutputAdapter, OutputBuffer, OutputEvent,
};
pub use pattern::{
    MidiOutSettings, Pattern, PatternId, PatternSettings, PatternSnapshot, TriggerSettings,
};
pub use scheduler::PatternScheduler;
pub use timeline::{DEFAULT_PPQN, Tempo};
pub use transport::{ClockMode, SharedTransportState, TransportState};
pub use trigger::{GateChange, GateKind, TriggerEvent, TriggerInput};
