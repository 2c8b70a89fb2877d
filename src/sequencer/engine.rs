// Sequencer engine - Scheduler, output and clock threads around a SchedulerContext
// Threads only talk through lock-free ring buffers and atomics

use super::clock::InternalClock;
use super::context::{ContextOptions, SchedulerContext};
use super::error::{ConfigurationError, SequencerError};
use super::output::OutputAdapter;
use super::pattern::{
    MidiOutSettings, PatternId, PatternSettings, PatternSnapshot, TriggerSettings,
    generate_pattern_id,
};
use super::timeline::{self, Tempo};
use super::transport::{ClockMode, SharedTransportState};
use crate::messaging::channels::{
    CommandConsumer, CommandProducer, MidiConsumer, MidiProducer, NotificationConsumer,
    NotificationProducer, OutputConsumer, OutputProducer, PulseConsumer, create_command_channel,
    create_midi_channel, create_notification_channel, create_output_channel, create_pulse_channel,
};
use crate::messaging::command::Command;
use crate::messaging::notification::{Notification, NotificationCategory};
use ringbuf::traits::{Consumer, Producer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between polls when a thread had nothing to do
const IDLE_SLEEP: Duration = Duration::from_micros(250);

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub context: ContextOptions,
    pub command_capacity: usize,
    pub midi_capacity: usize,
    pub pulse_capacity: usize,
    pub output_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context: ContextOptions::default(),
            command_capacity: 256,
            midi_capacity: 512,
            pulse_capacity: 256,
            output_capacity: 1024,
            notification_capacity: 256,
        }
    }
}

/// Running engine. Dropping it stops every thread.
pub struct SequencerEngine {
    shutdown: Arc<AtomicBool>,
    output_shutdown: Arc<AtomicBool>,
    scheduler_thread: Option<thread::JoinHandle<()>>,
    output_thread: Option<thread::JoinHandle<()>>,
    clock: InternalClock,
}

impl SequencerEngine {
    /// Start the engine with its own MIDI queue.
    ///
    /// Returns the engine, the control handle and the producer a MIDI input
    /// (or a test) feeds clock ticks and trigger notes into.
    pub fn spawn(
        config: EngineConfig,
        adapters: Vec<Box<dyn OutputAdapter>>,
    ) -> Result<(Self, EngineHandle, MidiProducer), SequencerError> {
        let (midi_tx, midi_rx) = create_midi_channel(config.midi_capacity);
        let (engine, handle) = Self::with_midi_input(config, adapters, midi_rx)?;
        Ok((engine, handle, midi_tx))
    }

    /// Start the engine on a MIDI queue that is already being fed
    pub fn with_midi_input(
        config: EngineConfig,
        adapters: Vec<Box<dyn OutputAdapter>>,
        midi_rx: MidiConsumer,
    ) -> Result<(Self, EngineHandle), SequencerError> {
        let shared = SharedTransportState::new();
        let ppqn = config.context.ppqn;
        let context = SchedulerContext::new(config.context.clone(), Arc::clone(&shared))?;

        let (command_tx, command_rx) = create_command_channel(config.command_capacity);
        let (pulse_tx, pulse_rx) = create_pulse_channel(config.pulse_capacity);
        let (output_tx, output_rx) = create_output_channel(config.output_capacity);
        let (notification_tx, notification_rx) =
            create_notification_channel(config.notification_capacity);

        let snapshots = Arc::new(Mutex::new(context.snapshots()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let output_shutdown = Arc::new(AtomicBool::new(false));

        let clock = InternalClock::spawn(Arc::clone(&shared), ppqn, pulse_tx)?;

        let output_thread = spawn_output_thread(output_rx, adapters, Arc::clone(&output_shutdown))?;

        let scheduler = SchedulerLoop {
            context,
            commands: command_rx,
            midi: midi_rx,
            pulses: pulse_rx,
            output: output_tx,
            notifications: notification_tx,
            snapshots: Arc::clone(&snapshots),
            shutdown: Arc::clone(&shutdown),
        };
        let scheduler_thread = match scheduler.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                output_shutdown.store(true, Ordering::Release);
                return Err(e);
            }
        };

        tracing::info!(ppqn, "Sequencer engine started");

        let engine = Self {
            shutdown,
            output_shutdown,
            scheduler_thread: Some(scheduler_thread),
            output_thread: Some(output_thread),
            clock,
        };
        let handle = EngineHandle {
            commands: command_tx,
            notifications: notification_rx,
            snapshots,
            shared,
            ppqn,
        };
        Ok((engine, handle))
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the scheduler (flushing releases), then the output and clock threads
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.scheduler_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }

        self.output_shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.output_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Output thread panicked");
            }
        }

        self.clock.shutdown();
    }
}

impl Drop for SequencerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Control surface side of the engine.
///
/// Pattern records are checked here before they are queued, so the caller
/// gets configuration errors synchronously. Errors that depend on the
/// scheduler's current state (unknown pattern, fills above the current
/// steps) come back as notifications.
pub struct EngineHandle {
    commands: CommandProducer,
    notifications: NotificationConsumer,
    snapshots: Arc<Mutex<Vec<PatternSnapshot>>>,
    shared: Arc<SharedTransportState>,
    ppqn: u32,
}

impl EngineHandle {
    pub fn send(&mut self, command: Command) -> Result<(), SequencerError> {
        self.commands
            .try_push(command)
            .map_err(|_| SequencerError::QueueFull)
    }

    pub fn start(&mut self) -> Result<(), SequencerError> {
        self.send(Command::Start)
    }

    pub fn stop(&mut self) -> Result<(), SequencerError> {
        self.send(Command::Stop)
    }

    pub fn rewind(&mut self) -> Result<(), SequencerError> {
        self.send(Command::Rewind)
    }

    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), SequencerError> {
        Tempo::new(bpm)?;
        self.send(Command::SetTempo(bpm))
    }

    pub fn set_clock_mode(&mut self, mode: ClockMode) -> Result<(), SequencerError> {
        self.send(Command::SetClockMode(mode))
    }

    /// Queue a new pattern. The ID is assigned here so it can be returned.
    pub fn add_pattern(&mut self, mut settings: PatternSettings) -> Result<PatternId, SequencerError> {
        settings.validate(self.ppqn)?;
        let id = *settings.id.get_or_insert_with(generate_pattern_id);
        self.send(Command::AddPattern(Box::new(settings)))?;
        Ok(id)
    }

    pub fn remove_pattern(&mut self, id: PatternId) -> Result<(), SequencerError> {
        self.send(Command::RemovePattern(id))
    }

    pub fn update_pattern(
        &mut self,
        id: PatternId,
        settings: PatternSettings,
    ) -> Result<(), SequencerError> {
        settings.validate(self.ppqn)?;
        self.send(Command::UpdatePattern(id, Box::new(settings)))
    }

    pub fn set_structure(
        &mut self,
        id: PatternId,
        steps: u32,
        fills: u32,
        rotation: i32,
    ) -> Result<(), SequencerError> {
        if steps < 1 {
            return Err(ConfigurationError::StepsOutOfRange(steps).into());
        }
        if fills > steps {
            return Err(ConfigurationError::FillsExceedSteps { fills, steps }.into());
        }
        self.send(Command::SetStructure {
            id,
            steps,
            fills,
            rotation,
        })
    }

    pub fn set_rotation(&mut self, id: PatternId, rotation: i32) -> Result<(), SequencerError> {
        self.send(Command::SetRotation { id, rotation })
    }

    pub fn set_quantization(&mut self, id: PatternId, quantization: u32) -> Result<(), SequencerError> {
        timeline::step_length(self.ppqn, quantization)?;
        self.send(Command::SetQuantization { id, quantization })
    }

    pub fn set_midi_out(&mut self, id: PatternId, settings: MidiOutSettings) -> Result<(), SequencerError> {
        settings.validate()?;
        self.send(Command::SetMidiOut { id, settings })
    }

    pub fn set_trigger(&mut self, id: PatternId, settings: TriggerSettings) -> Result<(), SequencerError> {
        settings.validate()?;
        self.send(Command::SetTrigger { id, settings })
    }

    pub fn set_mute(&mut self, id: PatternId, mute: bool) -> Result<(), SequencerError> {
        self.send(Command::SetMute { id, mute })
    }

    pub fn set_solo(&mut self, id: PatternId, solo: bool) -> Result<(), SequencerError> {
        self.send(Command::SetSolo { id, solo })
    }

    /// Replace every pattern (project load)
    pub fn load_patterns(
        &mut self,
        tempo: f64,
        patterns: Vec<PatternSettings>,
    ) -> Result<(), SequencerError> {
        for settings in &patterns {
            settings.validate(self.ppqn)?;
        }
        self.send(Command::LoadProject { tempo, patterns })
    }

    pub fn clear(&mut self) -> Result<(), SequencerError> {
        self.send(Command::Clear)
    }

    pub fn quit(&mut self) -> Result<(), SequencerError> {
        self.send(Command::Quit)
    }

    /// Latest published pattern states, collection order
    pub fn snapshots(&self) -> Vec<PatternSnapshot> {
        self.snapshots
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn transport(&self) -> &SharedTransportState {
        &self.shared
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Some(notification) = self.notifications.try_pop() {
            drained.push(notification);
        }
        drained
    }
}

/// State moved into the scheduler thread
struct SchedulerLoop {
    context: SchedulerContext,
    commands: CommandConsumer,
    midi: MidiConsumer,
    pulses: PulseConsumer,
    output: OutputProducer,
    notifications: NotificationProducer,
    snapshots: Arc<Mutex<Vec<PatternSnapshot>>>,
    shutdown: Arc<AtomicBool>,
}

impl SchedulerLoop {
    fn spawn(self) -> Result<thread::JoinHandle<()>, SequencerError> {
        thread::Builder::new()
            .name("euclid-scheduler".into())
            .spawn(move || self.run())
            .map_err(|e| SequencerError::Thread(e.to_string()))
    }

    fn run(mut self) {
        let mut stale = false;

        while !self.shutdown.load(Ordering::Acquire) {
            let mut busy = false;

            // 1. Control commands, before the pulses they precede
            while let Some(command) = self.commands.try_pop() {
                busy = true;
                if matches!(command, Command::Quit) {
                    tracing::info!("Quit requested");
                    self.finish();
                    return;
                }
                self.apply(command);
            }

            // 2. MIDI input: triggers, external clock, realtime transport
            while let Some(event) = self.midi.try_pop() {
                busy = true;
                self.context
                    .handle_midi(event, Instant::now(), &mut self.output);
            }

            // 3. Internal pulses
            while let Some(signal) = self.pulses.try_pop() {
                busy = true;
                self.context
                    .handle_clock_signal(signal, Instant::now(), &mut self.output);
            }

            self.context.check_liveness(Instant::now());
            self.context.poll_output(&mut self.output);
            self.forward_notifications();

            stale |= busy;
            if stale {
                // Never wait on an observer
                if let Ok(mut snapshots) = self.snapshots.try_lock() {
                    *snapshots = self.context.snapshots();
                    stale = false;
                }
            }

            if !busy {
                thread::sleep(IDLE_SLEEP);
            }
        }

        self.finish();
    }

    fn apply(&mut self, command: Command) {
        let target = command.pattern_id();
        if let Err(e) = self
            .context
            .apply_command(command, Instant::now(), &mut self.output)
        {
            tracing::warn!("Command rejected: {}", e);
            let mut notification =
                Notification::error(NotificationCategory::Configuration, e.to_string());
            if let Some(id) = target {
                notification = notification.for_pattern(id);
            }
            self.notify(notification);
        }
    }

    /// Silence everything before the thread exits
    fn finish(&mut self) {
        self.context.stop(&mut self.output);
        self.forward_notifications();
        if let Ok(mut snapshots) = self.snapshots.lock() {
            *snapshots = self.context.snapshots();
        }
        tracing::info!("Scheduler stopped");
    }

    fn notify(&mut self, notification: Notification) {
        if self.notifications.try_push(notification).is_err() {
            tracing::debug!("Notification queue full");
        }
    }

    fn forward_notifications(&mut self) {
        for notification in self.context.take_notifications() {
            self.notify(notification);
        }
    }
}

fn spawn_output_thread(
    mut output_rx: OutputConsumer,
    mut adapters: Vec<Box<dyn OutputAdapter>>,
    shutdown: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, SequencerError> {
    thread::Builder::new()
        .name("euclid-output".into())
        .spawn(move || {
            let mut failures: u64 = 0;

            loop {
                // Read the flag first so the final drain sees everything the
                // scheduler pushed before it exited
                let stopping = shutdown.load(Ordering::Acquire);

                let mut delivered = false;
                while let Some(event) = output_rx.try_pop() {
                    delivered = true;
                    for adapter in adapters.iter_mut() {
                        if let Err(e) = adapter.deliver(&event) {
                            failures += 1;
                            if failures.is_power_of_two() {
                                tracing::warn!(adapter = adapter.name(), failures, "Delivery failed: {}", e);
                            }
                        }
                    }
                }

                if stopping {
                    break;
                }
                if !delivered {
                    thread::sleep(IDLE_SLEEP);
                }
            }
        })
        .map_err(|e| SequencerError::Thread(e.to_string()))
}
