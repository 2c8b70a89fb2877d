// Timeline - Pulse-based musical time
// All durations are measured in pulses at a fixed PPQN resolution

use crate::sequencer::error::ConfigurationError;
use std::fmt;
use std::time::Duration;

/// Pulses per quarter note used when nothing else is configured
pub const DEFAULT_PPQN: u32 = 96;

/// Finest supported clock resolution
pub const MAX_PPQN: u32 = 3840;

/// Default tempo for new projects
pub const DEFAULT_BPM: f64 = 120.0;

/// Accepted tempo range
pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 1000.0;

/// Default pattern quantization (sixteenth notes)
pub const DEFAULT_QUANTIZATION: u32 = 16;

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    /// Creates a new tempo within `MIN_BPM..=MAX_BPM`
    pub fn new(bpm: f64) -> Result<Self, ConfigurationError> {
        // NaN fails the range check too
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(ConfigurationError::InvalidTempo {
                bpm,
                min: MIN_BPM,
                max: MAX_BPM,
            });
        }
        Ok(Self { bpm })
    }

    /// Tempo from a project record; out of range values fall back to the default
    pub fn or_default(bpm: f64) -> Self {
        Self::new(bpm).unwrap_or_default()
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Interval between two pulses: `60000 / (bpm * ppqn)` milliseconds
    pub fn pulse_interval(&self, ppqn: u32) -> Duration {
        Duration::from_secs_f64(self.beat_duration_seconds() / ppqn.max(1) as f64)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: DEFAULT_BPM }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

pub fn validate_ppqn(ppqn: u32) -> Result<(), ConfigurationError> {
    if ppqn == 0 || ppqn > MAX_PPQN {
        return Err(ConfigurationError::InvalidPpqn {
            ppqn,
            max: MAX_PPQN,
        });
    }
    Ok(())
}

/// Pulses in one whole note
pub fn pulses_per_whole_note(ppqn: u32) -> u32 {
    ppqn.saturating_mul(4)
}

/// Finest quantization that still leaves one pulse per step
pub fn max_quantization(ppqn: u32) -> u32 {
    pulses_per_whole_note(ppqn)
}

/// Pulses per step: `(ppqn * 4) / quantization`
pub fn step_length(ppqn: u32, quantization: u32) -> Result<u32, ConfigurationError> {
    let max = max_quantization(ppqn);
    if quantization == 0 || quantization > max {
        return Err(ConfigurationError::QuantizationOutOfRange { quantization, max });
    }
    Ok(pulses_per_whole_note(ppqn) / quantization)
}

/// Pulses per full cycle: `steps * step_length`, rejected when it does not fit a `u32`
pub fn pattern_length(steps: u32, step_length: u32) -> Result<u32, ConfigurationError> {
    steps
        .checked_mul(step_length)
        .ok_or(ConfigurationError::PatternTooLong { steps, step_length })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_creation() {
        let tempo = Tempo::new(140.0).unwrap();
        assert_eq!(tempo.bpm(), 140.0);
        assert_eq!(Tempo::default().bpm(), 120.0);
    }

    #[test]
    fn test_invalid_tempo() {
        assert!(Tempo::new(0.0).is_err());
        assert!(Tempo::new(-10.0).is_err());
        assert!(Tempo::new(f64::NAN).is_err());
        assert!(Tempo::new(f64::INFINITY).is_err());
        assert_eq!(Tempo::or_default(-1.0).bpm(), DEFAULT_BPM);
    }

    #[test]
    fn test_tiny_and_huge_tempo_rejected() {
        assert!(matches!(
            Tempo::new(1e-300),
            Err(ConfigurationError::InvalidTempo { .. })
        ));
        assert!(Tempo::new(MAX_BPM + 1.0).is_err());
        assert_eq!(Tempo::or_default(1e-300).bpm(), DEFAULT_BPM);

        // Both ends of the range give a representable interval at the finest resolution
        let slow = Tempo::new(MIN_BPM).unwrap().pulse_interval(1);
        assert_eq!(slow, Duration::from_secs(60));
        let fast = Tempo::new(MAX_BPM).unwrap().pulse_interval(MAX_PPQN);
        assert!(fast > Duration::ZERO);
    }

    #[test]
    fn test_ppqn_bounds() {
        assert!(validate_ppqn(96).is_ok());
        assert!(validate_ppqn(MAX_PPQN).is_ok());
        assert_eq!(
            validate_ppqn(0).unwrap_err(),
            ConfigurationError::InvalidPpqn {
                ppqn: 0,
                max: MAX_PPQN
            }
        );
        assert!(validate_ppqn(u32::MAX).is_err());
    }

    #[test]
    fn test_pattern_length_overflow() {
        assert_eq!(pattern_length(16, 24).unwrap(), 384);
        assert_eq!(
            pattern_length(11_200_000, 384).unwrap_err(),
            ConfigurationError::PatternTooLong {
                steps: 11_200_000,
                step_length: 384
            }
        );
    }

    #[test]
    fn test_pulse_interval() {
        // 120 BPM, 96 PPQN: 60000 / (120 * 96) = 5.2083 ms
        let interval = Tempo::new(120.0).unwrap().pulse_interval(96);
        assert!((interval.as_secs_f64() * 1000.0 - 5.208_333).abs() < 1e-3);

        // 60 BPM, 1 PPQN: one pulse per second
        let interval = Tempo::new(60.0).unwrap().pulse_interval(1);
        assert_eq!(interval, Duration::from_secs(1));
    }

    #[test]
    fn test_step_length() {
        assert_eq!(step_length(96, 16).unwrap(), 24);
        assert_eq!(step_length(96, 4).unwrap(), 96);
        assert_eq!(step_length(96, 384).unwrap(), 1);
        assert!(step_length(96, 0).is_err());
        assert!(step_length(96, 385).is_err());
    }

    #[test]
    fn test_tempo_display() {
        assert_eq!(Tempo::default().to_string(), "120.0 BPM");
    }
}
