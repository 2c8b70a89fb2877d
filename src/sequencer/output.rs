// Output events - What the scheduler emits for MIDI/OSC adapters
// Emission never blocks: a full sink drops NoteOns and holds NoteOffs

use super::error::{SequencerError, SinkBackpressure};
use super::pattern::PatternId;
use crate::messaging::channels::OutputProducer;
use ringbuf::traits::Producer;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    NoteOn,
    NoteOff,
}

/// Note trigger or release for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub pattern_id: PatternId,
    pub kind: NoteKind,
    pub channel: u8,
    pub pitch: u8,
    /// 0 for NoteOff
    pub velocity: u8,
    /// Clock pulse the event belongs to
    pub pulse: u64,
}

/// OSC message for one pattern: `[pitch, velocity]`, velocity 0 on release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscEvent {
    pub pattern_id: PatternId,
    pub address: String,
    pub payload: Vec<i32>,
    pub pulse: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Note(NoteEvent),
    Osc(OscEvent),
}

impl OutputEvent {
    pub fn pattern_id(&self) -> PatternId {
        match self {
            OutputEvent::Note(note) => note.pattern_id,
            OutputEvent::Osc(osc) => osc.pattern_id,
        }
    }

    /// Releases are never dropped while there is backlog room
    pub fn is_release(&self) -> bool {
        match self {
            OutputEvent::Note(note) => note.kind == NoteKind::NoteOff,
            OutputEvent::Osc(osc) => osc.payload.get(1) == Some(&0),
        }
    }

    pub fn as_note(&self) -> Option<&NoteEvent> {
        match self {
            OutputEvent::Note(note) => Some(note),
            OutputEvent::Osc(_) => None,
        }
    }
}

/// Non-blocking consumer of output events.
///
/// `try_emit` hands the event back when it cannot be accepted right now.
pub trait EventSink {
    fn try_emit(&mut self, event: OutputEvent) -> Result<(), OutputEvent>;
}

/// Unbounded collector, used in tests and offline rendering
impl EventSink for Vec<OutputEvent> {
    fn try_emit(&mut self, event: OutputEvent) -> Result<(), OutputEvent> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for OutputProducer {
    fn try_emit(&mut self, event: OutputEvent) -> Result<(), OutputEvent> {
        self.try_push(event)
    }
}

/// Delivery side of the output queue (MIDI port, OSC socket).
///
/// Runs on the output thread, never on the scheduler thread. Adapters skip
/// the event kinds they do not handle.
pub trait OutputAdapter: Send {
    fn name(&self) -> &str;
    fn deliver(&mut self, event: &OutputEvent) -> Result<(), SequencerError>;
}

/// Default number of releases held back while the sink is full
pub const DEFAULT_BACKLOG_CAPACITY: usize = 256;

/// Bounded backpressure policy in front of an `EventSink`.
///
/// While the sink is full, NoteOn and OSC note events are dropped and
/// counted; releases wait in a bounded backlog retried at the next tick.
/// Events queued behind a non-empty backlog keep their order.
#[derive(Debug)]
pub struct OutputBuffer {
    backlog: VecDeque<OutputEvent>,
    backlog_capacity: usize,
    dropped_total: u64,
    episode_dropped: u64,
    overflowing: bool,
    report_pending: bool,
}

impl OutputBuffer {
    pub fn new(backlog_capacity: usize) -> Self {
        Self {
            backlog: VecDeque::with_capacity(backlog_capacity),
            backlog_capacity,
            dropped_total: 0,
            episode_dropped: 0,
            overflowing: false,
            report_pending: false,
        }
    }

    pub fn emit<S: EventSink + ?Sized>(&mut self, sink: &mut S, event: OutputEvent) {
        if self.backlog.is_empty() {
            match sink.try_emit(event) {
                Ok(()) => {
                    self.overflowing = false;
                    return;
                }
                Err(event) => {
                    self.begin_overflow();
                    self.hold_or_drop(event);
                }
            }
        } else {
            self.hold_or_drop(event);
        }
    }

    /// Flush held releases, oldest first, until the sink refuses again
    pub fn retry_backlog<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        if self.backlog.is_empty() {
            return;
        }
        while let Some(event) = self.backlog.pop_front() {
            if let Err(event) = sink.try_emit(event) {
                self.backlog.push_front(event);
                return;
            }
        }
        self.overflowing = false;
    }

    /// One report per overflow episode
    pub fn take_backpressure(&mut self) -> Option<SinkBackpressure> {
        if !self.report_pending {
            return None;
        }
        self.report_pending = false;
        Some(SinkBackpressure {
            dropped: self.episode_dropped,
            held: self.backlog.len(),
        })
    }

    pub fn held(&self) -> usize {
        self.backlog.len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    fn begin_overflow(&mut self) {
        if !self.overflowing {
            self.overflowing = true;
            self.report_pending = true;
            self.episode_dropped = 0;
        }
    }

    fn hold_or_drop(&mut self, event: OutputEvent) {
        if event.is_release() && self.backlog.len() < self.backlog_capacity {
            self.backlog.push_back(event);
        } else {
            self.dropped_total += 1;
            self.episode_dropped += 1;
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_CAPACITY)
    }
}
