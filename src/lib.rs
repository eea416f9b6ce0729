//! # stanza
//!
//! stanza is a text-driven MIDI tracker. It reads a line-oriented pattern
//! language from standard input and plays it in real time through a JACK
//! client, one MIDI message per scheduled frame.
//!
//! ## Modules
//!
//! - `parser`: turns pattern lines into events while carrying defaults,
//!   key signatures, aliases and the column-to-port routing.
//! - `sequencer`: walks the parsed program, expands loops and sub-patterns,
//!   and executes events against the engine on a virtual clock.
//! - `midi`: the message value, status constants, and the time-ordered
//!   heap of outbound messages.
//! - `audio`: the engine contract and the JACK implementation with its
//!   pump thread and realtime process callback.
//! - `player`: the top-level loop that drives playback and drains the
//!   queues at the end.

pub mod audio;
pub mod error;
pub mod midi;
pub mod parser;
pub mod player;
pub mod sequencer;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the types most callers need.
pub use audio::{JackEngine, MidiEngine};
pub use error::{EngineError, ParseError};
pub use midi::{MidiMessage, TimeHeap};
pub use sequencer::Sequencer;
