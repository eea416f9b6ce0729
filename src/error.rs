//! Error types shared across the engine and the pattern parser.

use thiserror::Error;

/// Errors raised by the MIDI engine and its queues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The JACK server could not be reached when opening the client.
    #[error("jack server is not running: {0}")]
    BackendUnavailable(#[source] jack::Error),

    /// The server refused to activate the client.
    #[error("cannot activate jack client: {0}")]
    ActivationFailed(#[source] jack::Error),

    /// The engine is being torn down; queues no longer accept work.
    #[error("the midi engine is shut down")]
    Shutdown,

    /// The fixed output-port table is full.
    #[error("output port limit reached")]
    PortLimit,

    /// A port handle that was never registered.
    #[error("unknown output port")]
    UnknownPort,

    /// Any other error reported by the JACK client library.
    #[error(transparent)]
    Backend(#[from] jack::Error),
}

/// A parse failure carrying the byte offset within the offending line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        ParseError {
            position,
            message: message.into(),
        }
    }

    /// Shift the recorded offset by the position of the enclosing token.
    pub(crate) fn offset_by(mut self, base: usize) -> Self {
        self.position += base;
        self
    }
}
