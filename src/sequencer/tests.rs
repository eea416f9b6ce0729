//! Playback scenarios run through the real parser and sequencer against
//! the recording engine stub.
//!
//! The stub clock stands at 0 with a 48 kHz sample rate, so one quant step
//! at the default tempo 100 and quant 4 is ms_to_frames(150) = 7200 frames.

use crate::midi::message::MidiMessage;
use crate::sequencer::Sequencer;
use crate::testing::MockEngine;

const QUANT: u32 = 7200;

fn setup(text: &str) -> (MockEngine, Sequencer) {
    let engine = MockEngine::new();
    let mut seq = Sequencer::new(&engine);
    let mut input = text.as_bytes();
    seq.read_from_stream(&mut input, &engine).unwrap();
    (engine, seq)
}

/// Play to the end of the program and release whatever is still sounding.
fn play_all(engine: &MockEngine, seq: &mut Sequencer) {
    while seq.play_next_line(engine, None) {}
    seq.silence(engine, None);
}

fn note_ons(msgs: &[MidiMessage]) -> Vec<&MidiMessage> {
    msgs.iter().filter(|m| m.data[0] & 0xF0 == 0x90).collect()
}

fn note_offs(msgs: &[MidiMessage]) -> Vec<&MidiMessage> {
    msgs.iter().filter(|m| m.data[0] & 0xF0 == 0x80).collect()
}

#[test]
fn test_single_note_sounds_for_one_quant_step() {
    let (engine, mut seq) = setup("C4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].bytes(), &[0x90, 0x3C, 0x40]);
    assert_eq!(msgs[0].time, 0);
    assert_eq!(msgs[1].bytes(), &[0x80, 0x3C, 0x00]);
    assert_eq!(msgs[1].time, QUANT - 1);
}

#[test]
fn test_timed_note_schedules_its_own_off() {
    let (engine, mut seq) = setup("C4@200\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].time, 0);
    // 200 ms at 48 kHz, minus the two-frame lead.
    assert_eq!(msgs[1].data[0], 0x80);
    assert_eq!(msgs[1].time, 9598);
}

#[test]
fn test_chord_row_staggers_columns() {
    let (engine, mut seq) = setup("C4 E4 G4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let ons = note_ons(&msgs);
    assert_eq!(ons.len(), 3);
    for (column, on) in ons.iter().enumerate() {
        assert_eq!(on.time, column as u32);
    }
    assert_eq!(ons[0].data[1], 60);
    assert_eq!(ons[1].data[1], 64);
    assert_eq!(ons[2].data[1], 67);

    let offs = note_offs(&msgs);
    assert_eq!(offs.len(), 3);
    for (column, off) in offs.iter().enumerate() {
        assert_eq!(off.time, QUANT - 1 - column as u32);
    }
}

#[test]
fn test_tempo_change_shrinks_the_quant_step() {
    let (engine, mut seq) = setup("tempo 120\n-4/4\nC4\n");
    play_all(&engine, &mut seq);

    // 60000 / 120 / 4 = 125 ms, which is 6000 frames.
    let msgs = engine.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].time, 0);
    assert_eq!(msgs[1].time, 5999);
}

#[test]
fn test_bar_nominator_updates_the_quant() {
    let (engine, mut seq) = setup("-8/4\nC4\n");
    play_all(&engine, &mut seq);

    // 60000 / 100 / 8 = 75 ms, which is 3600 frames.
    let msgs = engine.messages();
    assert_eq!(msgs[1].time, 3599);
}

#[test]
fn test_controller_ramp_spreads_over_one_quant_step() {
    let (engine, mut seq) = setup("$7=0..127:1+0/1\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(msgs.len(), 128);
    assert_eq!(msgs[0].bytes(), &[0xB0, 7, 0]);
    assert_eq!(msgs[0].time, 0);

    // 7200 / 127 truncates to 56 frames per value.
    assert_eq!(msgs[1].bytes(), &[0xB0, 7, 1]);
    assert_eq!(msgs[1].time, 56);

    let last = &msgs[127];
    assert_eq!(last.bytes(), &[0xB0, 7, 127]);
    assert_eq!(last.time, 56 * 127);
}

#[test]
fn test_zero_span_ramp_is_a_single_shot() {
    let (engine, mut seq) = setup("$7=64..64:2\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].bytes(), &[0xB0, 7, 64]);
    assert_eq!(msgs[0].time, 0);
}

#[test]
fn test_counted_loop_plays_exactly_n_times() {
    let (engine, mut seq) = setup("loop 3\nC4\nendloop\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let ons = note_ons(&msgs);
    let offs = note_offs(&msgs);
    assert_eq!(ons.len(), 3);
    assert_eq!(offs.len(), 3);

    let on_times: Vec<u32> = ons.iter().map(|m| m.time).collect();
    assert_eq!(on_times, vec![0, QUANT, 2 * QUANT]);
    let off_times: Vec<u32> = offs.iter().map(|m| m.time).collect();
    assert_eq!(off_times, vec![QUANT - 1, 2 * QUANT - 1, 3 * QUANT - 1]);
}

#[test]
fn test_nested_loops_multiply() {
    let (engine, mut seq) = setup("loop 2\nloop 2\nC4\nendloop\nendloop\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let on_times: Vec<u32> = note_ons(&msgs).iter().map(|m| m.time).collect();
    assert_eq!(on_times, vec![0, QUANT, 2 * QUANT, 3 * QUANT]);
}

#[test]
fn test_uncounted_loop_repeats_forever() {
    let (engine, mut seq) = setup("loop\nC4\nendloop\n");
    for _ in 0..5 {
        assert!(seq.play_next_line(&engine, None));
    }
}

#[test]
fn test_pedal_holds_the_note_across_its_line() {
    let (engine, mut seq) = setup("C4\n|\nD4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let held: Vec<&MidiMessage> = msgs
        .iter()
        .filter(|m| m.data[0] & 0xF0 == 0x80 && m.data[1] == 60)
        .collect();
    // The off lands when the third line starts, not when the pedal played.
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].time, 2 * QUANT - 1);
}

#[test]
fn test_timed_note_is_not_stopped_again() {
    let (engine, mut seq) = setup("C4@100\nD4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let offs_for_c: Vec<&MidiMessage> = msgs
        .iter()
        .filter(|m| m.data[0] & 0xF0 == 0x80 && m.data[1] == 60)
        .collect();
    assert_eq!(offs_for_c.len(), 1);
    assert_eq!(offs_for_c[0].time, 100 * 48 - 2);
}

#[test]
fn test_endless_note_waits_for_the_column() {
    let (engine, mut seq) = setup("C4.\nD4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let offs_for_c: Vec<&MidiMessage> = msgs
        .iter()
        .filter(|m| m.data[0] & 0xF0 == 0x80 && m.data[1] == 60)
        .collect();
    // No off of its own; silenced when the next line takes the column.
    assert_eq!(offs_for_c.len(), 1);
    assert_eq!(offs_for_c[0].time, QUANT - 1);
}

#[test]
fn test_subpattern_plays_one_line_per_invocation() {
    let (engine, mut seq) = setup("define intro\nC4\nD4\nend\nintro\nwait 1\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    let ons = note_ons(&msgs);
    assert_eq!(ons.len(), 2);
    assert_eq!((ons[0].data[1], ons[0].time), (60, 0));
    // The wait sustained the pattern into its second line.
    assert_eq!((ons[1].data[1], ons[1].time), (62, QUANT));

    let offs = note_offs(&msgs);
    assert_eq!(offs.len(), 2);
    assert_eq!((offs[0].data[1], offs[0].time), (60, QUANT - 1));
    assert_eq!((offs[1].data[1], offs[1].time), (62, 2 * QUANT - 1));
}

#[test]
fn test_column_routing_reaches_the_message() {
    let (engine, mut seq) = setup("port 1 synth 3\nC4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(msgs[0].data[0], 0x93);
    assert_eq!(msgs[0].port.map(|p| p.index()), Some(1));
}

#[test]
fn test_unparsable_lines_are_skipped() {
    let (engine, mut seq) = setup("H9 garbage\nC4\n");
    play_all(&engine, &mut seq);

    let msgs = engine.messages();
    assert_eq!(note_ons(&msgs).len(), 1);
    assert_eq!(msgs[0].data[1], 60);
}
