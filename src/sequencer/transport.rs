// Transport - Run state, clock mode and shared observation
// The scheduler thread writes, observers and the internal clock read via atomics

use super::timeline::Tempo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Running,
}

impl TransportState {
    pub fn is_running(&self) -> bool {
        matches!(self, TransportState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped)
    }
}

/// Where pulses come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockMode {
    /// Internal timer at the current tempo
    #[default]
    Internal,
    /// One pulse per external clock tick
    External,
}

impl From<u8> for ClockMode {
    fn from(value: u8) -> Self {
        match value {
            1 => ClockMode::External,
            _ => ClockMode::Internal,
        }
    }
}

impl From<ClockMode> for u8 {
    fn from(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Internal => 0,
            ClockMode::External => 1,
        }
    }
}

/// Shared transport state
/// Thread-safe via atomics; only the scheduler thread stores
#[derive(Debug)]
pub struct SharedTransportState {
    running: AtomicBool,
    stalled: AtomicBool,
    clock_mode: AtomicU8,
    tempo_bits: AtomicU64,
    pulse_count: AtomicU64,
}

impl SharedTransportState {
    /// Create new shared transport state
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> TransportState {
        if self.running.load(Ordering::Acquire) {
            TransportState::Running
        } else {
            TransportState::Stopped
        }
    }

    pub fn set_state(&self, state: TransportState) {
        self.running.store(state.is_running(), Ordering::Release);
    }

    /// External clock silent beyond its timeout
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Relaxed)
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }

    pub fn clock_mode(&self) -> ClockMode {
        ClockMode::from(self.clock_mode.load(Ordering::Acquire))
    }

    pub fn set_clock_mode(&self, mode: ClockMode) {
        self.clock_mode.store(mode.into(), Ordering::Release);
    }

    pub fn tempo(&self) -> Tempo {
        Tempo::or_default(f64::from_bits(self.tempo_bits.load(Ordering::Acquire)))
    }

    pub fn set_tempo(&self, tempo: Tempo) {
        self.tempo_bits.store(tempo.bpm().to_bits(), Ordering::Release);
    }

    /// Pulses processed since the last rewind
    pub fn pulse_count(&self) -> u64 {
        self.pulse_count.load(Ordering::Relaxed)
    }

    pub fn set_pulse_count(&self, pulses: u64) {
        self.pulse_count.store(pulses, Ordering::Relaxed);
    }
}

impl Default for SharedTransportState {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            clock_mode: AtomicU8::new(ClockMode::Internal.into()),
            tempo_bits: AtomicU64::new(Tempo::default().bpm().to_bits()),
            pulse_count: AtomicU64::new(0),
        }
    }
}
