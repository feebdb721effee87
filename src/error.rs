//! Centralized error type for the legato umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] legato_core::Error),

    #[cfg(feature = "midi")]
    #[error("MIDI: {0}")]
    Midi(#[from] legato_midi::Error),

    #[error("Queue '{0}' declared twice")]
    DuplicateQueue(String),

    #[error("Queue names must not be empty")]
    EmptyQueueName,
}

pub type Result<T> = std::result::Result<T, Error>;
