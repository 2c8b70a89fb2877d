//! Fuzzing tests for the MIDI parser
//!
//! The parser runs inside the MIDI input callback: garbage in must never
//! panic, and well-formed input must survive an encode/parse cycle.

use euclid_seq::MidiEvent;
use rand::Rng;

/// Fuzz the MIDI parser with random byte sequences
#[test]
fn fuzz_midi_parser_random_bytes() {
    let mut rng = rand::thread_rng();

    for _ in 0..2000 {
        let length = rng.gen_range(1..=16);
        let random_bytes: Vec<u8> = (0..length).map(|_| rng.gen_range(0..=255)).collect();

        if let Some(event) = MidiEvent::from_bytes(&random_bytes) {
            // Anything accepted encodes to valid MIDI
            let encoded = event.to_bytes();
            assert!(encoded[0] >= 0x80);
            assert!(encoded[1..].iter().all(|&b| b <= 0x7F));
        }
    }
}

/// Fuzz with specific MIDI message shapes
#[test]
fn fuzz_midi_parser_patterns() {
    let mut rng = rand::thread_rng();

    for _ in 0..1000 {
        let channel = rng.gen_range(0..=15u8);
        let note = rng.gen_range(0..=127u8);
        let velocity = rng.gen_range(0..=127u8);

        match rng.gen_range(0..=3) {
            0 => {
                let result = MidiEvent::from_bytes(&[0x90 | channel, note, velocity]);
                if velocity == 0 {
                    assert_eq!(result, Some(MidiEvent::NoteOff { channel, note }));
                } else {
                    assert_eq!(
                        result,
                        Some(MidiEvent::NoteOn {
                            channel,
                            note,
                            velocity
                        })
                    );
                }
            }
            1 => {
                let result = MidiEvent::from_bytes(&[0x80 | channel, note, velocity]);
                assert_eq!(result, Some(MidiEvent::NoteOff { channel, note }));
            }
            2 => {
                // Truncated channel message
                let result = MidiEvent::from_bytes(&[0x90 | channel, note]);
                assert!(result.is_none());
            }
            _ => {
                let byte = [0xF8, 0xFA, 0xFB, 0xFC][rng.gen_range(0..4)];
                let event = MidiEvent::from_bytes(&[byte]).unwrap();
                assert!(event.is_realtime());
                assert_eq!(event.to_bytes(), vec![byte]);
            }
        }
    }
}

/// Data bytes on their own are not messages
#[test]
fn test_midi_parser_invalid_status() {
    for byte in 0x00..=0x7F {
        assert!(MidiEvent::from_bytes(&[byte]).is_none());
        assert!(MidiEvent::from_bytes(&[byte, 0x40, 0x40]).is_none());
    }
}

/// Unsupported channel and system messages are skipped
#[test]
fn test_midi_parser_unsupported_messages() {
    // Program change, channel aftertouch, poly aftertouch
    assert!(MidiEvent::from_bytes(&[0xC0, 0x05]).is_none());
    assert!(MidiEvent::from_bytes(&[0xD0, 0x40]).is_none());
    assert!(MidiEvent::from_bytes(&[0xA0, 0x40, 0x40]).is_none());
    // Song position, active sensing, reset
    assert!(MidiEvent::from_bytes(&[0xF2, 0x00, 0x00]).is_none());
    assert!(MidiEvent::from_bytes(&[0xFE]).is_none());
    assert!(MidiEvent::from_bytes(&[0xFF]).is_none());
}
