// Communication channels - lock-free SPSC ring buffers
// One channel per producing context, all consumed by the scheduler thread
// except output and notifications which flow out of it

use crate::messaging::command::Command;
use crate::messaging::notification::Notification;
use crate::midi::event::MidiEvent;
use crate::sequencer::clock::ClockSignal;
use crate::sequencer::output::OutputEvent;
use ringbuf::{HeapRb, traits::Split};

pub type CommandProducer = ringbuf::HeapProd<Command>;
pub type CommandConsumer = ringbuf::HeapCons<Command>;

pub fn create_command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let rb = HeapRb::<Command>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// MIDI input callback -> scheduler (trigger notes, clock ticks, realtime transport)
pub type MidiProducer = ringbuf::HeapProd<MidiEvent>;
pub type MidiConsumer = ringbuf::HeapCons<MidiEvent>;

pub fn create_midi_channel(capacity: usize) -> (MidiProducer, MidiConsumer) {
    let rb = HeapRb::<MidiEvent>::new(capacity);
    rb.split()
}

/// Internal clock thread -> scheduler
pub type PulseProducer = ringbuf::HeapProd<ClockSignal>;
pub type PulseConsumer = ringbuf::HeapCons<ClockSignal>;

pub fn create_pulse_channel(capacity: usize) -> (PulseProducer, PulseConsumer) {
    let rb = HeapRb::<ClockSignal>::new(capacity);
    rb.split()
}

/// Scheduler -> output adapters
pub type OutputProducer = ringbuf::HeapProd<OutputEvent>;
pub type OutputConsumer = ringbuf::HeapCons<OutputEvent>;

pub fn create_output_channel(capacity: usize) -> (OutputProducer, OutputConsumer) {
    let rb = HeapRb::<OutputEvent>::new(capacity);
    rb.split()
}
