//! MIDI message values, status constants, and the outbound time heap.

pub mod heap;
pub mod message;

pub use heap::TimeHeap;
pub use message::{FrameTime, MidiMessage, PortId};

pub const NOTE_ON: u8 = 0x90;
pub const NOTE_OFF: u8 = 0x80;
pub const CONTROLLER: u8 = 0xB0;
pub const PITCH_BEND: u8 = 0xE0;
pub const ALL_SOUND_OFF: u8 = 0x7B;
