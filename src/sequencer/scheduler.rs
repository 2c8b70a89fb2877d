// Pattern scheduler - Advances every pattern by one pulse
// Applies mute/solo and counts down pending releases

use super::error::ConfigurationError;
use super::output::{NoteEvent, NoteKind, OscEvent, OutputEvent};
use super::pattern::{Pattern, PatternId, PatternSettings, PatternSnapshot, PendingRelease};

/// Owns the pattern collection in insertion order
#[derive(Debug, Clone)]
pub struct PatternScheduler {
    patterns: Vec<Pattern>,
    ppqn: u32,
    created: usize,
}

impl PatternScheduler {
    pub fn new(ppqn: u32) -> Self {
        Self {
            patterns: Vec::new(),
            ppqn,
            created: 0,
        }
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: PatternId) -> Option<&mut Pattern> {
        self.patterns.iter_mut().find(|p| p.id() == id)
    }

    /// Same as `get_mut`, as a configuration error when missing
    pub fn pattern_mut(&mut self, id: PatternId) -> Result<&mut Pattern, ConfigurationError> {
        self.get_mut(id)
            .ok_or(ConfigurationError::UnknownPattern(id))
    }

    pub(crate) fn patterns_mut(&mut self) -> impl Iterator<Item = &mut Pattern> {
        self.patterns.iter_mut()
    }

    /// Defaults for the next new pattern, note length scaled to this PPQN
    pub fn next_default_settings(&self) -> PatternSettings {
        let mut settings = PatternSettings::numbered(self.created + 1);
        settings.midi_out.note_length = (self.ppqn / 4).max(1);
        settings
    }

    /// Create a pattern at the end of the collection
    pub fn add(&mut self, settings: PatternSettings) -> Result<PatternId, ConfigurationError> {
        if let Some(id) = settings.id {
            if self.get(id).is_some() {
                return Err(ConfigurationError::DuplicatePattern(id));
            }
        }

        let pattern = Pattern::new(settings, self.ppqn)?;
        let id = pattern.id();
        self.patterns.push(pattern);
        self.created += 1;
        Ok(id)
    }

    /// Remove a pattern, handing it back so its releases can be flushed
    pub fn remove(&mut self, id: PatternId) -> Option<Pattern> {
        let index = self.patterns.iter().position(|p| p.id() == id)?;
        Some(self.patterns.remove(index))
    }

    pub fn clear(&mut self) -> Vec<Pattern> {
        self.created = 0;
        std::mem::take(&mut self.patterns)
    }

    /// Is any pattern soloed right now?
    pub fn any_soloed(&self) -> bool {
        self.patterns.iter().any(|p| p.is_soloed())
    }

    /// Solo wins over mute; without any solo, mute silences
    pub fn is_audible(pattern: &Pattern, any_soloed: bool) -> bool {
        if any_soloed {
            pattern.is_soloed()
        } else {
            !pattern.is_muted()
        }
    }

    /// Process one pulse for every pattern, in collection order
    pub fn tick<F>(&mut self, pulse: u64, mut emit: F)
    where
        F: FnMut(OutputEvent),
    {
        // Flags may have changed since the last tick
        let any_soloed = self.any_soloed();

        for pattern in &mut self.patterns {
            for release in pattern.count_down_releases() {
                emit_release(pattern, release, pulse, &mut emit);
            }

            if !pattern.is_running() {
                continue;
            }

            let Some(step) = pattern.advance() else {
                continue;
            };

            if pattern.is_step_active(step) && Self::is_audible(pattern, any_soloed) {
                emit_trigger(pattern, pulse, &mut emit);
            }
        }
    }

    /// Emit every pending release now (transport stop)
    pub fn release_all<F>(&mut self, pulse: u64, mut emit: F)
    where
        F: FnMut(OutputEvent),
    {
        for pattern in &mut self.patterns {
            for release in pattern.drain_releases() {
                emit_release(pattern, release, pulse, &mut emit);
            }
        }
    }

    pub fn snapshots(&self) -> Vec<PatternSnapshot> {
        self.patterns.iter().map(Pattern::snapshot).collect()
    }
}

fn emit_trigger<F>(pattern: &mut Pattern, pulse: u64, emit: &mut F)
where
    F: FnMut(OutputEvent),
{
    let midi = *pattern.midi_out();

    emit(OutputEvent::Note(NoteEvent {
        pattern_id: pattern.id(),
        kind: NoteKind::NoteOn,
        channel: midi.channel,
        pitch: midi.pitch,
        velocity: midi.velocity,
        pulse,
    }));

    if !pattern.osc_out_address().is_empty() {
        emit(OutputEvent::Osc(OscEvent {
            pattern_id: pattern.id(),
            address: pattern.osc_out_address().to_string(),
            payload: vec![midi.pitch as i32, midi.velocity as i32],
            pulse,
        }));
    }

    pattern.schedule_release(midi.channel, midi.pitch, midi.note_length);
}

/// Release the note that was actually sent, even if the settings changed since
pub(crate) fn emit_release<F>(pattern: &Pattern, release: PendingRelease, pulse: u64, emit: &mut F)
where
    F: FnMut(OutputEvent),
{
    emit(OutputEvent::Note(NoteEvent {
        pattern_id: pattern.id(),
        kind: NoteKind::NoteOff,
        channel: release.channel,
        pitch: release.pitch,
        velocity: 0,
        pulse,
    }));

    if !pattern.osc_out_address().is_empty() {
        emit(OutputEvent::Osc(OscEvent {
            pattern_id: pattern.id(),
            address: pattern.osc_out_address().to_string(),
            payload: vec![release.pitch as i32, 0],
            pulse,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::pattern::MidiOutSettings;

    fn settings(steps: u32, fills: u32) -> PatternSettings {
        PatternSettings {
            steps,
            fills,
            ..PatternSettings::default()
        }
    }

    fn run(scheduler: &mut PatternScheduler, pulses: u64) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        for pulse in 0..pulses {
            scheduler.tick(pulse, |event| events.push(event));
        }
        events
    }

    fn note_ons(events: &[OutputEvent]) -> Vec<NoteEvent> {
        events
            .iter()
            .filter_map(OutputEvent::as_note)
            .filter(|n| n.kind == NoteKind::NoteOn)
            .copied()
            .collect()
    }

    #[test]
    fn test_add_remove() {
        let mut scheduler = PatternScheduler::new(96);
        let a = scheduler.add(settings(8, 3)).unwrap();
        let b = scheduler.add(settings(4, 1)).unwrap();

        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.patterns()[0].id(), a);
        assert_eq!(scheduler.patterns()[1].id(), b);

        let removed = scheduler.remove(a).unwrap();
        assert_eq!(removed.id(), a);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.remove(a).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler.add(settings(8, 3)).unwrap();
        let again = PatternSettings {
            id: Some(id),
            ..settings(4, 2)
        };
        assert_eq!(
            scheduler.add(again),
            Err(ConfigurationError::DuplicatePattern(id))
        );
    }

    #[test]
    fn test_default_settings_numbering() {
        let mut scheduler = PatternScheduler::new(48);
        assert_eq!(scheduler.next_default_settings().name, "Pattern 1");
        scheduler.add(scheduler.next_default_settings()).unwrap();
        let next = scheduler.next_default_settings();
        assert_eq!(next.name, "Pattern 2");
        assert_eq!(next.midi_out.note_length, 12);
    }

    #[test]
    fn test_stopped_patterns_do_not_advance() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler.add(settings(4, 4)).unwrap();

        let events = run(&mut scheduler, 50);
        assert!(events.is_empty());
        assert_eq!(scheduler.get(id).unwrap().position(), 0);
    }

    #[test]
    fn test_note_on_and_release() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler
            .add(PatternSettings {
                midi_out: MidiOutSettings {
                    channel: 2,
                    pitch: 36,
                    velocity: 90,
                    note_length: 6,
                },
                ..settings(4, 1)
            })
            .unwrap();
        scheduler.get_mut(id).unwrap().start();

        let events = run(&mut scheduler, 7);
        assert_eq!(events.len(), 2);

        let on = events[0].as_note().unwrap();
        assert_eq!(on.kind, NoteKind::NoteOn);
        assert_eq!((on.channel, on.pitch, on.velocity, on.pulse), (2, 36, 90, 0));

        let off = events[1].as_note().unwrap();
        assert_eq!(off.kind, NoteKind::NoteOff);
        assert_eq!((off.channel, off.pitch, off.pulse), (2, 36, 6));
    }

    #[test]
    fn test_mute_suppresses() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler.add(settings(4, 4)).unwrap();
        let pattern = scheduler.get_mut(id).unwrap();
        pattern.start();
        pattern.set_mute(true);

        let events = run(&mut scheduler, 96);
        assert!(events.is_empty());
        // Still advancing while muted
        assert_eq!(scheduler.get(id).unwrap().position(), 95);
    }

    #[test]
    fn test_solo_wins_over_mute() {
        let mut scheduler = PatternScheduler::new(96);
        let x = scheduler.add(settings(4, 4)).unwrap();
        let y = scheduler.add(settings(4, 4)).unwrap();

        let px = scheduler.get_mut(x).unwrap();
        px.start();
        px.set_solo(true);
        px.set_mute(true);
        scheduler.get_mut(y).unwrap().start();

        let ons = note_ons(&run(&mut scheduler, 96));
        assert_eq!(ons.len(), 4);
        assert!(ons.iter().all(|n| n.pattern_id == x));
    }

    #[test]
    fn test_release_survives_mute() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler.add(settings(4, 4)).unwrap();
        scheduler.get_mut(id).unwrap().start();

        let mut events = Vec::new();
        scheduler.tick(0, |e| events.push(e));
        assert_eq!(note_ons(&events).len(), 1);

        scheduler.get_mut(id).unwrap().set_mute(true);
        for pulse in 1..30 {
            scheduler.tick(pulse, |e| events.push(e));
        }
        let offs = events.iter().filter(|e| e.is_release()).count();
        assert_eq!(offs, 1);
    }

    #[test]
    fn test_release_all() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler.add(settings(4, 4)).unwrap();
        scheduler.get_mut(id).unwrap().start();
        run(&mut scheduler, 1);
        assert_eq!(scheduler.get(id).unwrap().pending_release_count(), 1);

        let mut flushed = Vec::new();
        scheduler.release_all(1, |e| flushed.push(e));
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].is_release());
        assert_eq!(scheduler.get(id).unwrap().pending_release_count(), 0);
    }

    #[test]
    fn test_osc_events() {
        let mut scheduler = PatternScheduler::new(96);
        let id = scheduler
            .add(PatternSettings {
                osc_out_address: "/epg/kick".into(),
                ..settings(1, 1)
            })
            .unwrap();
        scheduler.get_mut(id).unwrap().start();

        let events = run(&mut scheduler, 1);
        assert_eq!(events.len(), 2);
        match &events[1] {
            OutputEvent::Osc(osc) => {
                assert_eq!(osc.address, "/epg/kick");
                assert_eq!(osc.payload, vec![60, 100]);
            }
            other => panic!("Expected OSC event, got {:?}", other),
        }
    }
}
