// Euclid Seq - Library exports for the binary, tests and benchmarks

pub mod config;
pub mod messaging;
pub mod midi;
pub mod osc;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use config::{ConfigError, SequencerConfig};
pub use messaging::channels::{create_command_channel, create_notification_channel};
pub use messaging::command::Command;
pub use messaging::notification::{Notification, NotificationCategory, NotificationLevel};
pub use midi::event::MidiEvent;
pub use sequencer::{
    ClockMode, ConfigurationError, EngineConfig, EngineHandle, EventSink, MidiOutSettings,
    OutputEvent, Pattern, PatternId, PatternScheduler, PatternSettings, PatternSnapshot,
    SchedulerContext, SequencerEngine, SequencerError, Tempo, TransportState, TriggerSettings,
};
