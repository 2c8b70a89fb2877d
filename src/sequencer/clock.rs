// Clock engine - Pulse source arbitration and transport control
// Internal timer thread or external ticks, both only enqueue signals

use super::error::{ClockLivenessError, SequencerError};
use super::timeline::Tempo;
use super::transport::{ClockMode, SharedTransportState, TransportState};
use crate::messaging::channels::PulseProducer;
use ringbuf::traits::Producer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Raw pulse notification from a clock source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSignal {
    InternalPulse,
    ExternalTick,
}

/// What the engine did with a clock signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseAcceptance {
    /// Process one pulse
    Pulse,
    /// Process one pulse, the external clock came back after a stall
    PulseAfterStall,
    /// Wrong source for the current mode, or transport stopped
    Ignored,
}

impl PulseAcceptance {
    pub fn is_pulse(&self) -> bool {
        !matches!(self, PulseAcceptance::Ignored)
    }
}

/// Clock engine
///
/// Owned by the scheduler thread. Decides which incoming signals become
/// pulses and tracks the external clock's liveness. Switching mode takes
/// effect immediately: signals from the deselected source are ignored from
/// that point on, nothing is drained.
#[derive(Debug)]
pub struct ClockEngine {
    state: TransportState,
    mode: ClockMode,
    tempo: Tempo,
    ppqn: u32,
    liveness_timeout: Duration,
    last_external_tick: Option<Instant>,
    stalled: bool,
    pulses: u64,
    shared: Arc<SharedTransportState>,
}

impl ClockEngine {
    pub fn new(
        ppqn: u32,
        tempo: Tempo,
        mode: ClockMode,
        liveness_timeout: Duration,
        shared: Arc<SharedTransportState>,
    ) -> Self {
        shared.set_state(TransportState::Stopped);
        shared.set_clock_mode(mode);
        shared.set_tempo(tempo);
        shared.set_stalled(false);
        shared.set_pulse_count(0);

        Self {
            state: TransportState::Stopped,
            mode,
            tempo,
            ppqn,
            liveness_timeout,
            last_external_tick: None,
            stalled: false,
            pulses: 0,
            shared,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Pulses accepted since the last rewind
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }

    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }

    /// Interval of the internal timer, None in external mode
    pub fn pulse_interval(&self) -> Option<Duration> {
        match self.mode {
            ClockMode::Internal => Some(self.tempo.pulse_interval(self.ppqn)),
            ClockMode::External => None,
        }
    }

    /// Stopped -> Running. Returns false if already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state.is_running() {
            return false;
        }
        self.state = TransportState::Running;
        // Liveness window starts now, not at the last tick before the stop
        self.last_external_tick = Some(now);
        self.set_stalled(false);
        self.shared.set_state(self.state);
        true
    }

    /// Running -> Stopped. Positions are not touched here.
    pub fn stop(&mut self) -> bool {
        if self.state.is_stopped() {
            return false;
        }
        self.state = TransportState::Stopped;
        self.set_stalled(false);
        self.shared.set_state(self.state);
        true
    }

    pub fn rewind(&mut self) {
        self.pulses = 0;
        self.shared.set_pulse_count(0);
    }

    /// Applies from the next internal pulse boundary on
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        self.shared.set_tempo(tempo);
    }

    pub fn set_mode(&mut self, mode: ClockMode, now: Instant) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.last_external_tick = Some(now);
        self.set_stalled(false);
        self.shared.set_clock_mode(mode);
    }

    /// Filter one clock signal
    pub fn accept(&mut self, signal: ClockSignal, now: Instant) -> PulseAcceptance {
        let from_active_source = matches!(
            (signal, self.mode),
            (ClockSignal::InternalPulse, ClockMode::Internal)
                | (ClockSignal::ExternalTick, ClockMode::External)
        );
        if !from_active_source {
            return PulseAcceptance::Ignored;
        }

        if signal == ClockSignal::ExternalTick {
            self.last_external_tick = Some(now);
        }

        if !self.state.is_running() {
            return PulseAcceptance::Ignored;
        }

        self.pulses += 1;
        self.shared.set_pulse_count(self.pulses);

        if self.stalled {
            self.set_stalled(false);
            PulseAcceptance::PulseAfterStall
        } else {
            PulseAcceptance::Pulse
        }
    }

    /// Report the external clock once when it goes silent while running
    pub fn check_liveness(&mut self, now: Instant) -> Option<ClockLivenessError> {
        if self.mode != ClockMode::External || !self.state.is_running() || self.stalled {
            return None;
        }

        let last = self.last_external_tick?;
        let silent_for = now.saturating_duration_since(last);
        if silent_for < self.liveness_timeout {
            return None;
        }

        self.set_stalled(true);
        Some(ClockLivenessError {
            silent_for,
            timeout: self.liveness_timeout,
        })
    }

    fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
        self.shared.set_stalled(stalled);
    }
}

/// Polling period while the internal clock is idle
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Pulse deadlines of the internal clock.
///
/// The interval is only read when the next deadline is scheduled, so a tempo
/// change never moves a deadline that is already pending.
#[derive(Debug, Default)]
pub(crate) struct PulseTimer {
    next_deadline: Option<Instant>,
}

impl PulseTimer {
    /// Forget the schedule, the next poll fires at once
    pub(crate) fn reset(&mut self) {
        self.next_deadline = None;
    }

    /// Time left before the pending pulse, `None` when it is due
    pub(crate) fn remaining(&mut self, now: Instant) -> Option<Duration> {
        let deadline = *self.next_deadline.get_or_insert(now);
        (now < deadline).then(|| deadline - now)
    }

    /// Schedule the pulse after the one that just fired
    pub(crate) fn schedule_next(&mut self, now: Instant, interval: Duration) {
        let deadline = self.next_deadline.unwrap_or(now);
        let mut next = deadline + interval;
        // Too far behind (suspended process): resync instead of bursting
        if now.saturating_duration_since(next) > interval.saturating_mul(4) {
            next = now + interval;
        }
        self.next_deadline = Some(next);
    }
}

/// Internal tempo timer
///
/// Runs on its own thread and only pushes `ClockSignal::InternalPulse` into
/// a ring buffer. It follows the shared transport state: it ticks while the
/// transport is running in internal mode and reads the tempo once per pulse,
/// so tempo changes apply from the next boundary.
pub struct InternalClock {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl InternalClock {
    pub fn spawn(
        shared: Arc<SharedTransportState>,
        ppqn: u32,
        mut pulse_tx: PulseProducer,
    ) -> Result<Self, SequencerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("euclid-clock".into())
            .spawn(move || {
                let mut timer = PulseTimer::default();
                let mut dropped: u64 = 0;

                while !shutdown_flag.load(Ordering::Acquire) {
                    let active = shared.state().is_running()
                        && shared.clock_mode() == ClockMode::Internal;
                    if !active {
                        timer.reset();
                        thread::sleep(IDLE_POLL);
                        continue;
                    }

                    let now = Instant::now();
                    if let Some(wait) = timer.remaining(now) {
                        thread::sleep(wait.min(IDLE_POLL));
                        continue;
                    }

                    if pulse_tx.try_push(ClockSignal::InternalPulse).is_err() {
                        dropped += 1;
                        if dropped.is_power_of_two() {
                            tracing::warn!(dropped, "Pulse queue full, internal pulse dropped");
                        }
                    }

                    timer.schedule_next(now, shared.tempo().pulse_interval(ppqn));
                }

                dropped
            })
            .map_err(|e| SequencerError::Thread(e.to_string()))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the timer thread and wait for it
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(dropped) if dropped > 0 => {
                    tracing::warn!(dropped, "Internal clock dropped pulses");
                }
                Ok(_) => {}
                Err(_) => tracing::error!("Internal clock thread panicked"),
            }
        }
    }
}

impl Drop for InternalClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::create_pulse_channel;
    use ringbuf::traits::Consumer;

    fn engine(mode: ClockMode) -> ClockEngine {
        ClockEngine::new(
            96,
            Tempo::default(),
            mode,
            Duration::from_millis(500),
            SharedTransportState::new(),
        )
    }

    #[test]
    fn test_start_stop() {
        let mut clock = engine(ClockMode::Internal);
        let now = Instant::now();

        assert!(clock.state().is_stopped());
        assert!(clock.start(now));
        assert!(!clock.start(now));
        assert!(clock.shared_state().state().is_running());
        assert!(clock.stop());
        assert!(!clock.stop());
        assert!(clock.shared_state().state().is_stopped());
    }

    #[test]
    fn test_accepts_only_active_source() {
        let mut clock = engine(ClockMode::Internal);
        let now = Instant::now();
        clock.start(now);

        assert_eq!(clock.accept(ClockSignal::InternalPulse, now), PulseAcceptance::Pulse);
        assert_eq!(clock.accept(ClockSignal::ExternalTick, now), PulseAcceptance::Ignored);

        clock.set_mode(ClockMode::External, now);
        assert_eq!(clock.accept(ClockSignal::InternalPulse, now), PulseAcceptance::Ignored);
        assert_eq!(clock.accept(ClockSignal::ExternalTick, now), PulseAcceptance::Pulse);
        assert_eq!(clock.pulse_count(), 2);
    }

    #[test]
    fn test_ignores_pulses_while_stopped() {
        let mut clock = engine(ClockMode::Internal);
        let now = Instant::now();
        assert_eq!(clock.accept(ClockSignal::InternalPulse, now), PulseAcceptance::Ignored);
        assert_eq!(clock.pulse_count(), 0);
    }

    #[test]
    fn test_liveness_reported_once() {
        let mut clock = engine(ClockMode::External);
        let start = Instant::now();
        clock.start(start);

        assert!(clock.check_liveness(start + Duration::from_millis(100)).is_none());

        let err = clock
            .check_liveness(start + Duration::from_millis(600))
            .expect("stall expected");
        assert_eq!(err.timeout, Duration::from_millis(500));
        assert!(clock.is_stalled());
        assert!(clock.shared_state().is_stalled());

        // Reported only once per stall
        assert!(clock.check_liveness(start + Duration::from_millis(900)).is_none());

        // A tick resumes
        let resumed = clock.accept(ClockSignal::ExternalTick, start + Duration::from_millis(950));
        assert_eq!(resumed, PulseAcceptance::PulseAfterStall);
        assert!(!clock.is_stalled());
    }

    #[test]
    fn test_no_liveness_check_in_internal_mode() {
        let mut clock = engine(ClockMode::Internal);
        let start = Instant::now();
        clock.start(start);
        assert!(clock.check_liveness(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_stop_clears_stall() {
        let mut clock = engine(ClockMode::External);
        let start = Instant::now();
        clock.start(start);
        clock.check_liveness(start + Duration::from_secs(1));
        assert!(clock.is_stalled());

        clock.stop();
        assert!(!clock.is_stalled());
    }

    #[test]
    fn test_tempo_and_interval() {
        let mut clock = engine(ClockMode::Internal);
        clock.set_tempo(Tempo::new(60.0).unwrap());
        assert_eq!(clock.shared_state().tempo().bpm(), 60.0);

        let interval = clock.pulse_interval().unwrap();
        assert!((interval.as_secs_f64() - 1.0 / 96.0).abs() < 1e-9);

        clock.set_mode(ClockMode::External, Instant::now());
        assert!(clock.pulse_interval().is_none());
    }

    #[test]
    fn test_tempo_change_applies_from_next_boundary() {
        let slow = Tempo::new(60.0).unwrap().pulse_interval(96);
        let fast = Tempo::new(240.0).unwrap().pulse_interval(96);
        let start = Instant::now();
        let mut timer = PulseTimer::default();

        // First pulse fires at once
        assert_eq!(timer.remaining(start), None);
        timer.schedule_next(start, slow);

        // Tempo goes up mid-interval: the pending deadline does not move
        let mid = start + slow / 2;
        assert_eq!(timer.remaining(mid), Some(slow - slow / 2));

        let first = start + slow;
        assert_eq!(timer.remaining(first), None);
        timer.schedule_next(first, fast);
        assert_eq!(timer.remaining(first), Some(fast));
        assert_eq!(timer.remaining(first + fast), None);
    }

    #[test]
    fn test_pulse_timer_keeps_phase_and_resyncs() {
        let interval = Duration::from_millis(10);
        let start = Instant::now();
        let mut timer = PulseTimer::default();
        timer.remaining(start);

        // Serviced slightly late: the grid is kept
        timer.schedule_next(start + Duration::from_millis(2), interval);
        assert_eq!(
            timer.remaining(start + Duration::from_millis(2)),
            Some(Duration::from_millis(8))
        );

        // Far behind: restart from now instead of bursting
        let late = start + Duration::from_secs(1);
        timer.schedule_next(late, interval);
        assert_eq!(timer.remaining(late), Some(interval));

        timer.reset();
        assert_eq!(timer.remaining(late), None);
    }

    #[test]
    fn test_internal_clock_produces_pulses() {
        let shared = SharedTransportState::new();
        shared.set_tempo(Tempo::new(600.0).unwrap());
        let (pulse_tx, mut pulse_rx) = create_pulse_channel(1024);
        let mut clock = InternalClock::spawn(Arc::clone(&shared), 96, pulse_tx).unwrap();

        // Idle while stopped
        thread::sleep(Duration::from_millis(20));
        assert!(pulse_rx.try_pop().is_none());

        shared.set_state(TransportState::Running);
        thread::sleep(Duration::from_millis(100));
        shared.set_state(TransportState::Stopped);
        clock.shutdown();

        let mut count = 0;
        while let Some(signal) = pulse_rx.try_pop() {
            assert_eq!(signal, ClockSignal::InternalPulse);
            count += 1;
        }
        // 600 BPM * 96 PPQN ~ 1.04 ms per pulse
        assert!(count > 10, "expected pulses, got {}", count);
    }
}
