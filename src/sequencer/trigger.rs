// Trigger input - External notes gate individual patterns
// Events are queued and applied at the next tick boundary

use super::pattern::PatternId;
use super::scheduler::PatternScheduler;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// (Re)start from step 0
    NoteOn,
    /// Stop, keeping the position
    NoteOff,
}

/// External note event as seen by the trigger matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: GateKind,
    pub channel: u8,
    pub pitch: u8,
}

impl TriggerEvent {
    pub fn note_on(channel: u8, pitch: u8) -> Self {
        Self {
            kind: GateKind::NoteOn,
            channel,
            pitch,
        }
    }

    pub fn note_off(channel: u8, pitch: u8) -> Self {
        Self {
            kind: GateKind::NoteOff,
            channel,
            pitch,
        }
    }
}

/// Pattern run-state change caused by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateChange {
    pub pattern_id: PatternId,
    pub running: bool,
}

/// Default bound on queued trigger events between two ticks
pub const DEFAULT_TRIGGER_QUEUE: usize = 128;

/// Pending gate events, oldest first
#[derive(Debug)]
pub struct TriggerInput {
    pending: VecDeque<TriggerEvent>,
    capacity: usize,
    dropped: u64,
}

impl TriggerInput {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Queue an event. Returns false when the queue is full and the event is dropped.
    pub fn enqueue(&mut self, event: TriggerEvent) -> bool {
        if self.pending.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.pending.push_back(event);
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Apply every queued event to the matching patterns.
    ///
    /// NoteOn restarts from position 0 (also when already running), so the
    /// next pulse plays step 0. NoteOff stops the pattern where it stands.
    pub fn apply(&mut self, scheduler: &mut PatternScheduler) -> Vec<GateChange> {
        let mut changes = Vec::new();

        while let Some(event) = self.pending.pop_front() {
            for pattern in scheduler.patterns_mut() {
                if !pattern.trigger().matches(event.channel, event.pitch) {
                    continue;
                }

                match event.kind {
                    GateKind::NoteOn => pattern.restart(),
                    GateKind::NoteOff => pattern.stop(),
                }

                changes.push(GateChange {
                    pattern_id: pattern.id(),
                    running: pattern.is_running(),
                });
            }
        }

        changes
    }
}

impl Default for TriggerInput {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::pattern::{PatternSettings, TriggerSettings};

    fn gated(scheduler: &mut PatternScheduler, channel: u8, pitch: u8) -> PatternId {
        scheduler
            .add(PatternSettings {
                steps: 4,
                fills: 2,
                trigger: TriggerSettings {
                    enabled: true,
                    channel,
                    pitch,
                },
                ..PatternSettings::default()
            })
            .unwrap()
    }

    #[test]
    fn test_note_on_restarts() {
        let mut scheduler = PatternScheduler::new(96);
        let id = gated(&mut scheduler, 9, 36);
        let mut input = TriggerInput::default();

        input.enqueue(TriggerEvent::note_on(9, 36));
        assert_eq!(input.pending(), 1);

        let changes = input.apply(&mut scheduler);
        assert_eq!(
            changes,
            vec![GateChange {
                pattern_id: id,
                running: true
            }]
        );
        let pattern = scheduler.get(id).unwrap();
        assert!(pattern.is_running());
        assert!(pattern.is_cued());
        assert_eq!(pattern.position(), 0);
        assert_eq!(input.pending(), 0);
    }

    #[test]
    fn test_retrigger_while_running_rewinds() {
        let mut scheduler = PatternScheduler::new(96);
        let id = gated(&mut scheduler, 9, 36);
        let mut input = TriggerInput::default();

        input.enqueue(TriggerEvent::note_on(9, 36));
        input.apply(&mut scheduler);
        for pulse in 0..30 {
            scheduler.tick(pulse, |_| {});
        }
        assert_eq!(scheduler.get(id).unwrap().position(), 29);

        input.enqueue(TriggerEvent::note_on(9, 36));
        input.apply(&mut scheduler);
        assert_eq!(scheduler.get(id).unwrap().position(), 0);
    }

    #[test]
    fn test_note_off_keeps_position() {
        let mut scheduler = PatternScheduler::new(96);
        let id = gated(&mut scheduler, 9, 36);
        let mut input = TriggerInput::default();

        input.enqueue(TriggerEvent::note_on(9, 36));
        input.apply(&mut scheduler);
        for pulse in 0..10 {
            scheduler.tick(pulse, |_| {});
        }

        input.enqueue(TriggerEvent::note_off(9, 36));
        input.apply(&mut scheduler);
        let pattern = scheduler.get(id).unwrap();
        assert!(!pattern.is_running());
        assert_eq!(pattern.position(), 9);
    }

    #[test]
    fn test_non_matching_ignored() {
        let mut scheduler = PatternScheduler::new(96);
        let id = gated(&mut scheduler, 9, 36);
        let plain = scheduler.add(PatternSettings::default()).unwrap();
        let mut input = TriggerInput::default();

        input.enqueue(TriggerEvent::note_on(9, 38));
        input.enqueue(TriggerEvent::note_on(0, 36));
        // Trigger disabled on the plain pattern even though 9/60 is its default
        input.enqueue(TriggerEvent::note_on(9, 60));

        assert!(input.apply(&mut scheduler).is_empty());
        assert!(!scheduler.get(id).unwrap().is_running());
        assert!(!scheduler.get(plain).unwrap().is_running());
    }

    #[test]
    fn test_queue_bounded() {
        let mut input = TriggerInput::new(2);
        assert!(input.enqueue(TriggerEvent::note_on(0, 1)));
        assert!(input.enqueue(TriggerEvent::note_on(0, 2)));
        assert!(!input.enqueue(TriggerEvent::note_on(0, 3)));
        assert_eq!(input.dropped(), 1);
    }
}
