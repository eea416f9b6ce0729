//! Command-line entry point: read a pattern from stdin and play it.

use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::*;
use env_logger::Env;

use stanza::audio::{JackEngine, MidiEngine};
use stanza::player;
use stanza::sequencer::Sequencer;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("{} {e:#}", "error:".red().bold());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let engine = Arc::new(JackEngine::new().context("cannot reach the jack server")?);
    let playing = engine.playing();

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let engine = engine.clone();
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            log::warn!("signal received, shutting down");
            engine.stop_sounds();
            engine.stop_playing();
            interrupted.store(true, Ordering::Relaxed);
        })
        .context("cannot install the signal handler")?;
    }

    let mut seq = Sequencer::new(engine.as_ref());
    let stdin = io::stdin();
    seq.read_from_stream(&mut stdin.lock(), engine.as_ref())
        .context("cannot read the pattern")?;

    player::play(engine.as_ref(), &mut seq, &playing);

    // Give the last audio cycles a chance to drain before closing.
    engine.stop_sounds();
    thread::sleep(Duration::from_millis(200));
    engine.shutdown();

    if interrupted.load(Ordering::Relaxed) {
        process::exit(1);
    }
    Ok(())
}
