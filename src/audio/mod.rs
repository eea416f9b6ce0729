//! The audio backend: the engine contract and its JACK implementation.

pub mod engine;

pub use engine::JackEngine;

use crate::error::EngineError;
use crate::midi::message::{FrameTime, MidiMessage, PortId};

/// What the sequencer, parser and events need from the MIDI backend.
///
/// `JackEngine` is the production implementation; the test suites substitute
/// a recording stub so playback can be checked without a running server.
pub trait MidiEngine {
    /// Sample rate of the backend clock, in frames per second.
    fn sample_rate(&self) -> u32;

    /// Current time on the backend clock.
    fn current_frame_time(&self) -> FrameTime;

    /// Queue a message for delivery.
    ///
    /// May block briefly while the heap is full; never called from the
    /// realtime thread.
    fn queue(&self, msg: MidiMessage);

    /// Register an output port, or return the existing handle when a port
    /// with the same short name is already registered.
    fn register_output_port(&self, name: &str) -> Result<PortId, EngineError>;

    /// Connect a registered output port to a destination port by name.
    fn connect_port(&self, port: PortId, destination: &str) -> Result<(), EngineError>;

    /// Whether queued messages are still waiting to be delivered.
    fn has_pending(&self) -> bool;

    /// Send All Sound Off to every output port, bypassing the heap.
    fn stop_sounds(&self);

    /// Convert wall-clock milliseconds to frames on the backend clock.
    fn ms_to_frames(&self, ms: u64) -> FrameTime {
        (ms * self.sample_rate() as u64 / 1000) as FrameTime
    }
}
