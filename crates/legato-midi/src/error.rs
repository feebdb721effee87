//! Error types for the MIDI control layer.

use thiserror::Error;

use crate::event::MidiEventKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("MIDI channel {0} out of range (0-15)")]
    InvalidChannel(i32),

    #[error("14-bit controller {0} out of range (0-63)")]
    Control14Range(i32),

    #[error("{0:?} events have no wire encoding")]
    NotWireable(MidiEventKind),

    #[error("{0:?} encodes to more than one message")]
    MultiMessage(MidiEventKind),

    #[error("MIDI parse error: {0}")]
    Parse(String),

    #[error("Unsupported MIDI message: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Control(#[from] legato_core::Error),
}

impl From<midi_msg::ParseError> for Error {
    fn from(e: midi_msg::ParseError) -> Self {
        Error::Parse(format!("{e:?}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
