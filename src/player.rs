//! Top-level playback driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::audio::MidiEngine;
use crate::sequencer::Sequencer;

const DRAIN_NAP: Duration = Duration::from_millis(200);

/// Play the program to its end, or until `playing` clears.
///
/// After the last line the remaining active notes are released, then the
/// call lingers until the engine has delivered everything it queued.
/// Clears `playing` on the way out.
pub fn play(engine: &dyn MidiEngine, seq: &mut Sequencer, playing: &AtomicBool) {
    while playing.load(Ordering::Relaxed) && seq.play_next_line(engine, None) {}

    seq.silence(engine, None);

    while engine.has_pending() && playing.load(Ordering::Relaxed) {
        thread::sleep(DRAIN_NAP);
    }
    thread::sleep(DRAIN_NAP);

    playing.store(false, Ordering::Relaxed);
}
