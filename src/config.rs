// Configuration - engine settings loaded from a RON file

use crate::sequencer::context::ContextOptions;
use crate::sequencer::engine::EngineConfig;
use crate::sequencer::timeline::{self, DEFAULT_BPM, DEFAULT_PPQN, MAX_PPQN, Tempo};
use crate::sequencer::transport::ClockMode;
use crate::sequencer::trigger::DEFAULT_TRIGGER_QUEUE;
use crate::sequencer::output::DEFAULT_BACKLOG_CAPACITY;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "euclid_seq";
const CONFIG_FILE: &str = "config.ron";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to write config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub ppqn: u32,
    pub tempo_bpm: f64,
    pub clock_mode: ClockMode,
    /// Silence after which the external clock is reported as stalled
    pub external_clock_timeout_ms: u64,

    // Ring buffer capacities
    pub command_capacity: usize,
    pub midi_capacity: usize,
    pub pulse_capacity: usize,
    pub output_capacity: usize,
    pub notification_capacity: usize,

    /// Port index or name fragment
    pub midi_in_port: Option<String>,
    pub midi_out_port: Option<String>,
    /// "host:port"
    pub osc_target: Option<String>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            ppqn: DEFAULT_PPQN,
            tempo_bpm: DEFAULT_BPM,
            clock_mode: ClockMode::Internal,
            external_clock_timeout_ms: 500,
            command_capacity: 256,
            midi_capacity: 512,
            pulse_capacity: 256,
            output_capacity: 1024,
            notification_capacity: 256,
            midi_in_port: None,
            midi_out_port: None,
            osc_target: None,
        }
    }
}

impl SequencerConfig {
    /// `<config dir>/euclid_seq/config.ron`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = ron::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist; the default path is optional
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading config");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = ron::ser::to_string_pretty(self, PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        timeline::validate_ppqn(self.ppqn)
            .map_err(|e| ConfigError::Invalid(format!("ppqn: {}", e)))?;
        Tempo::new(self.tempo_bpm)
            .map_err(|e| ConfigError::Invalid(format!("tempo_bpm: {}", e)))?;
        if self.external_clock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "external_clock_timeout_ms must be at least 1".into(),
            ));
        }

        let capacities = [
            ("command_capacity", self.command_capacity),
            ("midi_capacity", self.midi_capacity),
            ("pulse_capacity", self.pulse_capacity),
            ("output_capacity", self.output_capacity),
            ("notification_capacity", self.notification_capacity),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
        }
        Ok(())
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.external_clock_timeout_ms)
    }

    /// Engine parameters. `external_input` tells whether a MIDI input is connected.
    pub fn engine_config(&self, external_input: bool) -> EngineConfig {
        EngineConfig {
            context: ContextOptions {
                ppqn: self.ppqn,
                tempo_bpm: self.tempo_bpm,
                clock_mode: self.clock_mode,
                liveness_timeout: self.liveness_timeout(),
                external_input,
                trigger_capacity: DEFAULT_TRIGGER_QUEUE,
                backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            },
            command_capacity: self.command_capacity,
            midi_capacity: self.midi_capacity,
            pulse_capacity: self.pulse_capacity,
            output_capacity: self.output_capacity,
            notification_capacity: self.notification_capacity,
        }
    }
}
