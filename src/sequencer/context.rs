// Scheduler context - Single owner of patterns, clock, trigger queue and output
// Commands, clock signals and MIDI input all funnel through here

use super::clock::{ClockEngine, ClockSignal, PulseAcceptance};
use super::error::{ClockLivenessError, ConfigurationError};
use super::output::{DEFAULT_BACKLOG_CAPACITY, EventSink, OutputBuffer, OutputEvent};
use super::pattern::{Pattern, PatternId, PatternSettings, PatternSnapshot, TriggerSettings};
use super::scheduler::{self, PatternScheduler};
use super::timeline::{self, DEFAULT_BPM, DEFAULT_PPQN, Tempo};
use super::transport::{ClockMode, SharedTransportState, TransportState};
use super::trigger::{DEFAULT_TRIGGER_QUEUE, GateChange, TriggerEvent, TriggerInput};
use crate::messaging::command::Command;
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::midi::event::MidiEvent;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default window after which a silent external clock is reported
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Construction parameters for a `SchedulerContext`
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub ppqn: u32,
    pub tempo_bpm: f64,
    pub clock_mode: ClockMode,
    pub liveness_timeout: Duration,
    /// An external clock source (MIDI input) is connected
    pub external_input: bool,
    pub trigger_capacity: usize,
    pub backlog_capacity: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            ppqn: DEFAULT_PPQN,
            tempo_bpm: DEFAULT_BPM,
            clock_mode: ClockMode::Internal,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            external_input: true,
            trigger_capacity: DEFAULT_TRIGGER_QUEUE,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

/// Everything the scheduler thread mutates, behind one owner.
///
/// Playback policy lives here: transport start runs every pattern that is
/// not trigger-gated, transport stop halts all of them and flushes their
/// pending releases, rewind sends every pattern back to step 0.
#[derive(Debug)]
pub struct SchedulerContext {
    scheduler: PatternScheduler,
    clock: ClockEngine,
    triggers: TriggerInput,
    output: OutputBuffer,
    external_input: bool,
    outbox: Vec<Notification>,
}

impl SchedulerContext {
    pub fn new(
        options: ContextOptions,
        shared: Arc<SharedTransportState>,
    ) -> Result<Self, ConfigurationError> {
        timeline::validate_ppqn(options.ppqn)?;
        let tempo = Tempo::new(options.tempo_bpm)?;

        let mut outbox = Vec::new();
        let mut mode = options.clock_mode;
        if mode == ClockMode::External && !options.external_input {
            tracing::warn!("No MIDI input for the external clock, using the internal clock");
            outbox.push(Notification::warning(
                NotificationCategory::Clock,
                ConfigurationError::ExternalClockUnavailable.to_string(),
            ));
            mode = ClockMode::Internal;
        }

        Ok(Self {
            scheduler: PatternScheduler::new(options.ppqn),
            clock: ClockEngine::new(
                options.ppqn,
                tempo,
                mode,
                options.liveness_timeout,
                shared,
            ),
            triggers: TriggerInput::new(options.trigger_capacity),
            output: OutputBuffer::new(options.backlog_capacity),
            external_input: options.external_input,
            outbox,
        })
    }

    // --- Observation ---

    pub fn scheduler(&self) -> &PatternScheduler {
        &self.scheduler
    }

    pub fn clock(&self) -> &ClockEngine {
        &self.clock
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.scheduler.get(id)
    }

    pub fn transport_state(&self) -> TransportState {
        self.clock.state()
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.clock.mode()
    }

    pub fn tempo(&self) -> Tempo {
        self.clock.tempo()
    }

    pub fn ppqn(&self) -> u32 {
        self.scheduler.ppqn()
    }

    pub fn snapshots(&self) -> Vec<PatternSnapshot> {
        self.scheduler.snapshots()
    }

    /// Configuration records in collection order, for saving
    pub fn settings(&self) -> Vec<PatternSettings> {
        self.scheduler
            .patterns()
            .iter()
            .map(|p| p.settings().clone())
            .collect()
    }

    /// Defaults for the next pattern a control surface creates
    pub fn next_default_settings(&self) -> PatternSettings {
        self.scheduler.next_default_settings()
    }

    /// Drain notifications produced since the last call
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // --- Commands ---

    /// Apply one control command. On error nothing was changed.
    ///
    /// `Quit` is handled by the engine loop and is a no-op here.
    pub fn apply_command<S: EventSink + ?Sized>(
        &mut self,
        command: Command,
        now: Instant,
        sink: &mut S,
    ) -> Result<(), ConfigurationError> {
        match command {
            Command::Start => {
                self.start(now);
            }
            Command::Stop => self.stop(sink),
            Command::Rewind => self.rewind(),
            Command::SetTempo(bpm) => self.set_tempo(bpm)?,
            Command::SetClockMode(mode) => self.set_clock_mode(mode, now)?,

            Command::AddPattern(settings) => {
                self.add_pattern(*settings)?;
            }
            Command::RemovePattern(id) => self.remove_pattern(id, sink)?,
            Command::UpdatePattern(id, settings) => self.update_pattern(id, *settings)?,
            Command::LoadProject { tempo, patterns } => {
                self.load_patterns(tempo, patterns, now, sink)?;
            }
            Command::Clear => self.clear(sink),

            Command::SetStructure {
                id,
                steps,
                fills,
                rotation,
            } => self
                .scheduler
                .pattern_mut(id)?
                .set_structure(steps, fills, rotation)?,
            Command::SetSteps { id, steps } => self.scheduler.pattern_mut(id)?.set_steps(steps)?,
            Command::SetFills { id, fills } => self.scheduler.pattern_mut(id)?.set_fills(fills)?,
            Command::SetRotation { id, rotation } => {
                self.scheduler.pattern_mut(id)?.set_rotation(rotation)
            }
            Command::SetQuantization { id, quantization } => self
                .scheduler
                .pattern_mut(id)?
                .set_quantization(quantization)?,
            Command::SetMidiOut { id, settings } => {
                self.scheduler.pattern_mut(id)?.set_midi_out(settings)?
            }
            Command::SetTrigger { id, settings } => self.set_trigger(id, settings)?,
            Command::SetOscAddress { id, address } => {
                self.scheduler.pattern_mut(id)?.set_osc_out_address(address)
            }
            Command::SetName { id, name } => self.scheduler.pattern_mut(id)?.set_name(name),
            Command::SetMute { id, mute } => self.scheduler.pattern_mut(id)?.set_mute(mute),
            Command::SetSolo { id, solo } => self.scheduler.pattern_mut(id)?.set_solo(solo),

            Command::Quit => {}
        }
        Ok(())
    }

    // --- Transport ---

    /// Start the transport and every pattern that is not trigger-gated.
    /// Returns false if it was already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if !self.clock.start(now) {
            return false;
        }
        for pattern in self.scheduler.patterns_mut() {
            if !pattern.trigger().enabled {
                pattern.start();
            }
        }
        tracing::info!(pulse = self.clock.pulse_count(), "Transport started");
        true
    }

    /// Stop the transport and every pattern, releasing sounding notes now
    pub fn stop<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        if self.clock.stop() {
            tracing::info!(pulse = self.clock.pulse_count(), "Transport stopped");
        }
        for pattern in self.scheduler.patterns_mut() {
            pattern.stop();
        }

        let pulse = self.clock.pulse_count();
        let output = &mut self.output;
        self.scheduler
            .release_all(pulse, |event| output.emit(sink, event));
        self.report_backpressure();
    }

    /// Every pattern back to position 0, the next pulse plays step 0
    pub fn rewind(&mut self) {
        for pattern in self.scheduler.patterns_mut() {
            pattern.rewind();
        }
        self.clock.rewind();
        tracing::debug!("Transport rewound");
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), ConfigurationError> {
        let tempo = Tempo::new(bpm)?;
        self.clock.set_tempo(tempo);
        tracing::debug!(%tempo, "Tempo changed");
        Ok(())
    }

    /// Switch the pulse source immediately. Pattern positions are kept.
    pub fn set_clock_mode(&mut self, mode: ClockMode, now: Instant) -> Result<(), ConfigurationError> {
        if mode == ClockMode::External && !self.external_input {
            self.outbox.push(Notification::warning(
                NotificationCategory::Clock,
                ConfigurationError::ExternalClockUnavailable.to_string(),
            ));
            return Err(ConfigurationError::ExternalClockUnavailable);
        }
        if self.clock.mode() == mode {
            return Ok(());
        }

        self.clock.set_mode(mode, now);
        tracing::info!(?mode, "Clock source switched");
        self.outbox.push(Notification::info(
            NotificationCategory::Clock,
            format!("Clock source: {:?}", mode),
        ));
        Ok(())
    }

    // --- Pattern collection ---

    /// Create a pattern. It joins playback right away if the transport runs.
    pub fn add_pattern(&mut self, settings: PatternSettings) -> Result<PatternId, ConfigurationError> {
        let id = self.scheduler.add(settings)?;
        if self.clock.state().is_running() {
            if let Some(pattern) = self.scheduler.get_mut(id) {
                if !pattern.trigger().enabled {
                    pattern.start();
                }
            }
        }
        tracing::debug!(%id, "Pattern added");
        Ok(id)
    }

    /// Remove a pattern, releasing any note it still holds
    pub fn remove_pattern<S: EventSink + ?Sized>(
        &mut self,
        id: PatternId,
        sink: &mut S,
    ) -> Result<(), ConfigurationError> {
        let mut pattern = self
            .scheduler
            .remove(id)
            .ok_or(ConfigurationError::UnknownPattern(id))?;

        let pulse = self.clock.pulse_count();
        let output = &mut self.output;
        let mut emit = |event: OutputEvent| output.emit(sink, event);
        for release in pattern.drain_releases() {
            scheduler::emit_release(&pattern, release, pulse, &mut emit);
        }
        self.report_backpressure();
        tracing::debug!(%id, "Pattern removed");
        Ok(())
    }

    /// Replace a pattern's whole configuration
    pub fn update_pattern(
        &mut self,
        id: PatternId,
        settings: PatternSettings,
    ) -> Result<(), ConfigurationError> {
        let transport_running = self.clock.state().is_running();
        let pattern = self.scheduler.pattern_mut(id)?;
        let was_gated = pattern.trigger().enabled;
        pattern.apply_settings(settings)?;
        sync_gate(pattern, was_gated, transport_running);
        Ok(())
    }

    pub fn set_trigger(
        &mut self,
        id: PatternId,
        trigger: TriggerSettings,
    ) -> Result<(), ConfigurationError> {
        let transport_running = self.clock.state().is_running();
        let pattern = self.scheduler.pattern_mut(id)?;
        let was_gated = pattern.trigger().enabled;
        pattern.set_trigger(trigger)?;
        sync_gate(pattern, was_gated, transport_running);
        Ok(())
    }

    /// New project: no patterns, pulse counter and tempo back to defaults
    pub fn clear<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        let pulse = self.clock.pulse_count();
        let output = &mut self.output;
        self.scheduler
            .release_all(pulse, |event| output.emit(sink, event));
        self.report_backpressure();

        self.scheduler.clear();
        self.triggers.clear();
        self.clock.rewind();
        self.clock.set_tempo(Tempo::default());
        tracing::info!("Patterns cleared");
    }

    /// Open project: replace the collection with `records`, in order.
    ///
    /// Every record is checked before anything is touched. Record IDs are
    /// kept. With an external clock the transport starts right away.
    pub fn load_patterns<S: EventSink + ?Sized>(
        &mut self,
        tempo_bpm: f64,
        records: Vec<PatternSettings>,
        now: Instant,
        sink: &mut S,
    ) -> Result<Vec<PatternId>, ConfigurationError> {
        let ppqn = self.scheduler.ppqn();
        let mut seen = HashSet::new();
        for record in &records {
            record.validate(ppqn)?;
            if let Some(id) = record.id {
                if !seen.insert(id) {
                    return Err(ConfigurationError::DuplicatePattern(id));
                }
            }
        }

        self.clear(sink);
        self.clock.set_tempo(Tempo::or_default(tempo_bpm));

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.add_pattern(record)?);
        }
        tracing::info!(patterns = ids.len(), tempo = %self.clock.tempo(), "Patterns loaded");

        if self.clock.mode() == ClockMode::External {
            self.start(now);
        }
        Ok(ids)
    }

    // --- Input ---

    /// Queue a gate event for the next tick boundary
    pub fn enqueue_trigger(&mut self, event: TriggerEvent) -> bool {
        if self.triggers.enqueue(event) {
            return true;
        }
        let dropped = self.triggers.dropped();
        if dropped.is_power_of_two() {
            tracing::warn!(dropped, "Trigger queue full, event dropped");
            self.outbox.push(Notification::warning(
                NotificationCategory::Trigger,
                format!("Trigger queue full ({} dropped)", dropped),
            ));
        }
        false
    }

    /// Apply queued gate events now
    pub fn apply_triggers(&mut self) -> Vec<GateChange> {
        let changes = self.triggers.apply(&mut self.scheduler);
        for change in &changes {
            tracing::trace!(pattern = %change.pattern_id, running = change.running, "Gate");
        }
        changes
    }

    /// Route one incoming MIDI message
    pub fn handle_midi<S: EventSink + ?Sized>(&mut self, event: MidiEvent, now: Instant, sink: &mut S) {
        let external = self.clock.mode() == ClockMode::External;

        match event {
            MidiEvent::NoteOn { channel, note, .. } => {
                self.enqueue_trigger(TriggerEvent::note_on(channel, note));
            }
            MidiEvent::NoteOff { channel, note } => {
                self.enqueue_trigger(TriggerEvent::note_off(channel, note));
            }
            MidiEvent::Clock => {
                self.handle_clock_signal(ClockSignal::ExternalTick, now, sink);
            }
            MidiEvent::Start if external => {
                self.rewind();
                self.start(now);
                self.notify_transport("External start");
            }
            MidiEvent::Continue if external => {
                self.start(now);
                self.notify_transport("External continue");
            }
            MidiEvent::Stop if external => {
                self.stop(sink);
                self.notify_transport("External stop");
            }
            _ => {}
        }

        // Without pulses the queue would only be applied at the next start
        if !self.clock.state().is_running() {
            self.apply_triggers();
        }
    }

    /// Feed one clock signal. Returns true if it was processed as a pulse.
    pub fn handle_clock_signal<S: EventSink + ?Sized>(
        &mut self,
        signal: ClockSignal,
        now: Instant,
        sink: &mut S,
    ) -> bool {
        match self.clock.accept(signal, now) {
            PulseAcceptance::Ignored => false,
            PulseAcceptance::PulseAfterStall => {
                tracing::info!("External clock resumed");
                self.outbox.push(Notification::info(
                    NotificationCategory::Clock,
                    "External clock resumed".to_string(),
                ));
                self.process_pulse(sink);
                true
            }
            PulseAcceptance::Pulse => {
                self.process_pulse(sink);
                true
            }
        }
    }

    /// Report a silent external clock, once per stall
    pub fn check_liveness(&mut self, now: Instant) -> Option<ClockLivenessError> {
        let error = self.clock.check_liveness(now)?;
        tracing::warn!(silent_for = ?error.silent_for, "External clock stalled");
        self.outbox.push(Notification::warning(
            NotificationCategory::Clock,
            error.to_string(),
        ));
        Some(error)
    }

    /// Retry held releases between pulses
    pub fn poll_output<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        if self.output.held() > 0 {
            self.output.retry_backlog(sink);
        }
        self.report_backpressure();
    }

    pub fn output_dropped(&self) -> u64 {
        self.output.dropped_total()
    }

    fn notify_transport(&mut self, message: &str) {
        tracing::debug!("{}", message);
        self.outbox.push(Notification::info(
            NotificationCategory::Transport,
            message.to_string(),
        ));
    }

    fn process_pulse<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        // accept() already counted this pulse
        let pulse = self.clock.pulse_count().saturating_sub(1);

        self.output.retry_backlog(sink);
        self.apply_triggers();

        let output = &mut self.output;
        self.scheduler
            .tick(pulse, |event| output.emit(sink, event));
        self.report_backpressure();
    }

    fn report_backpressure(&mut self) {
        if let Some(report) = self.output.take_backpressure() {
            tracing::warn!(dropped = report.dropped, held = report.held, "Output sink full");
            self.outbox.push(Notification::warning(
                NotificationCategory::Output,
                report.to_string(),
            ));
        }
    }
}

/// Keep a pattern's run state consistent after its gate setting changed
fn sync_gate(pattern: &mut Pattern, was_gated: bool, transport_running: bool) {
    let gated = pattern.trigger().enabled;
    if gated == was_gated {
        return;
    }
    if gated {
        // Waits for its first trigger
        pattern.stop();
    } else if transport_running {
        pattern.start();
    }
}
