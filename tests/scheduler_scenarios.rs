//! Scheduling scenarios driven through the SchedulerContext
//!
//! Pulses are fed by hand so every test is deterministic.

use euclid_seq::sequencer::clock::ClockSignal;
use euclid_seq::sequencer::context::ContextOptions;
use euclid_seq::sequencer::output::{NoteKind, OutputEvent};
use euclid_seq::sequencer::rhythm::generate;
use euclid_seq::sequencer::transport::SharedTransportState;
use euclid_seq::{MidiEvent, PatternSettings, SchedulerContext, TriggerSettings};
use rand::Rng;
use std::time::Instant;

fn context() -> SchedulerContext {
    SchedulerContext::new(ContextOptions::default(), SharedTransportState::new()).unwrap()
}

fn pattern(steps: u32, fills: u32) -> PatternSettings {
    PatternSettings {
        steps,
        fills,
        ..PatternSettings::default()
    }
}

fn run(ctx: &mut SchedulerContext, pulses: usize) -> Vec<OutputEvent> {
    let mut sink = Vec::new();
    let now = Instant::now();
    for _ in 0..pulses {
        ctx.handle_clock_signal(ClockSignal::InternalPulse, now, &mut sink);
    }
    sink
}

fn note_on_pulses(events: &[OutputEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(OutputEvent::as_note)
        .filter(|n| n.kind == NoteKind::NoteOn)
        .map(|n| n.pulse)
        .collect()
}

#[test]
fn test_tresillo_pattern_fires_on_its_onsets() {
    let mut ctx = context();
    ctx.add_pattern(pattern(8, 3)).unwrap();
    ctx.start(Instant::now());

    // 8 steps of 24 pulses: one cycle is 192 pulses
    let events = run(&mut ctx, 192);
    assert_eq!(note_on_pulses(&events), vec![0, 72, 144]);
}

#[test]
fn test_four_on_the_floor_every_step() {
    let mut ctx = context();
    let id = ctx.add_pattern(pattern(4, 4)).unwrap();

    let pattern = ctx.pattern(id).unwrap();
    assert_eq!(pattern.step_length(), 24);
    assert_eq!(pattern.pattern_length(), 96);

    ctx.start(Instant::now());
    let events = run(&mut ctx, 192);
    assert_eq!(
        note_on_pulses(&events),
        vec![0, 24, 48, 72, 96, 120, 144, 168]
    );
}

#[test]
fn test_solo_silences_everything_else() {
    let mut ctx = context();
    let x = ctx
        .add_pattern(PatternSettings {
            solo: true,
            ..pattern(4, 2)
        })
        .unwrap();
    let y = ctx.add_pattern(pattern(4, 4)).unwrap();
    ctx.start(Instant::now());

    let events = run(&mut ctx, 96);
    let ons: Vec<_> = events
        .iter()
        .filter_map(OutputEvent::as_note)
        .filter(|n| n.kind == NoteKind::NoteOn)
        .collect();

    assert_eq!(ons.len(), 2);
    assert!(ons.iter().all(|n| n.pattern_id == x));
    // Y keeps moving even though it is silent
    assert_eq!(ctx.pattern(y).unwrap().position(), 95);
}

#[test]
fn test_trigger_starts_stopped_pattern_at_step_zero() {
    let mut ctx = context();
    let id = ctx
        .add_pattern(PatternSettings {
            trigger: TriggerSettings {
                enabled: true,
                channel: 9,
                pitch: 36,
            },
            ..pattern(8, 3)
        })
        .unwrap();
    ctx.start(Instant::now());

    // Gated: the transport alone does not run it
    assert!(run(&mut ctx, 50).is_empty());
    let pattern = ctx.pattern(id).unwrap();
    assert!(!pattern.is_running());
    assert_eq!(pattern.position(), 0);

    let mut sink = Vec::new();
    ctx.handle_midi(
        MidiEvent::NoteOn {
            channel: 9,
            note: 36,
            velocity: 127,
        },
        Instant::now(),
        &mut sink,
    );
    assert!(sink.is_empty());

    let events = run(&mut ctx, 1);
    let pattern = ctx.pattern(id).unwrap();
    assert!(pattern.is_running());
    assert_eq!(pattern.position(), 0);
    assert!(pattern.rhythm()[0]);
    assert_eq!(note_on_pulses(&events).len(), 1);
}

#[test]
fn test_trigger_note_off_holds_position() {
    let mut ctx = context();
    let id = ctx
        .add_pattern(PatternSettings {
            trigger: TriggerSettings {
                enabled: true,
                channel: 0,
                pitch: 48,
            },
            ..pattern(4, 1)
        })
        .unwrap();
    ctx.start(Instant::now());

    let mut sink = Vec::new();
    let now = Instant::now();
    ctx.handle_midi(MidiEvent::NoteOn { channel: 0, note: 48, velocity: 90 }, now, &mut sink);
    run(&mut ctx, 40);
    ctx.handle_midi(MidiEvent::NoteOff { channel: 0, note: 48 }, now, &mut sink);
    run(&mut ctx, 40);

    let pattern = ctx.pattern(id).unwrap();
    assert!(!pattern.is_running());
    assert_eq!(pattern.position(), 39);
}

#[test]
fn test_stop_releases_every_sounding_note() {
    let mut ctx = context();
    for _ in 0..3 {
        ctx.add_pattern(pattern(4, 4)).unwrap();
    }
    ctx.start(Instant::now());
    let events = run(&mut ctx, 5);
    assert_eq!(note_on_pulses(&events).len(), 3);

    let mut flushed = Vec::new();
    ctx.stop(&mut flushed);
    assert_eq!(flushed.len(), 3);
    assert!(flushed.iter().all(OutputEvent::is_release));
}

#[test]
fn test_rotation_change_keeps_position() {
    let mut ctx = context();
    let id = ctx.add_pattern(pattern(8, 3)).unwrap();
    ctx.start(Instant::now());
    run(&mut ctx, 30);

    let mut sink = Vec::new();
    ctx.apply_command(
        euclid_seq::Command::SetRotation { id, rotation: 1 },
        Instant::now(),
        &mut sink,
    )
    .unwrap();

    let pattern = ctx.pattern(id).unwrap();
    assert_eq!(pattern.position(), 29);
    let expected: Vec<bool> = {
        let base = generate(8, 3).unwrap();
        (0..8).map(|i| base[(i + 1) % 8]).collect()
    };
    assert_eq!(pattern.rhythm(), expected.as_slice());
}

#[test]
fn test_position_invariant_under_random_mutation() {
    let mut rng = rand::thread_rng();
    let mut ctx = context();
    let ids: Vec<_> = (0..4)
        .map(|_| ctx.add_pattern(pattern(16, 5)).unwrap())
        .collect();
    ctx.start(Instant::now());

    let mut sink = Vec::new();
    let now = Instant::now();
    for _ in 0..2000 {
        let id = ids[rng.gen_range(0..ids.len())];
        let command = match rng.gen_range(0..5) {
            0 => {
                let steps = rng.gen_range(1..=32);
                euclid_seq::Command::SetStructure {
                    id,
                    steps,
                    fills: rng.gen_range(0..=steps),
                    rotation: rng.gen_range(-40..=40),
                }
            }
            1 => euclid_seq::Command::SetQuantization {
                id,
                quantization: [1, 2, 3, 4, 8, 12, 16, 32, 64][rng.gen_range(0..9)],
            },
            2 => euclid_seq::Command::SetMute {
                id,
                mute: rng.gen_bool(0.5),
            },
            3 => euclid_seq::Command::SetSolo {
                id,
                solo: rng.gen_bool(0.2),
            },
            _ => euclid_seq::Command::SetRotation {
                id,
                rotation: rng.gen_range(-8..=8),
            },
        };
        ctx.apply_command(command, now, &mut sink).unwrap();

        for _ in 0..rng.gen_range(0..50) {
            ctx.handle_clock_signal(ClockSignal::InternalPulse, now, &mut sink);
        }

        for pattern in ctx.scheduler().patterns() {
            assert!(pattern.position() < pattern.pattern_length());
            assert_eq!(pattern.rhythm().len(), pattern.steps() as usize);
        }
    }
}

#[test]
fn test_output_order_follows_insertion() {
    let mut ctx = context();
    let ids: Vec<_> = (0..5)
        .map(|_| ctx.add_pattern(pattern(4, 4)).unwrap())
        .collect();
    ctx.start(Instant::now());

    let events = run(&mut ctx, 1);
    let order: Vec<_> = events.iter().map(OutputEvent::pattern_id).collect();
    assert_eq!(order, ids);
}
