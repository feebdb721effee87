//! MIDI specialization of the legato control graph.
//!
//! [`MidiEvent`] is a structured channel event (notes, controllers, 14-bit
//! controllers, RPN/NRPN writes) that travels through controls as a boxed
//! value. [`MidiControl`] is a func control locked to that type, with no
//! conversion, for wiring device drivers to the rest of the graph.
//!
//! # Example
//!
//! ```
//! use legato_core::{ConnectFlags, ControlGraph};
//! use legato_midi::{MidiEventKind, MidiGraphExt};
//!
//! let graph = ControlGraph::new();
//! let keyboard = graph.midi_control();
//! let synth = graph.midi_control();
//! synth
//!     .set_callback(|_, _, event| println!("synth got {:?}", event))
//!     .unwrap();
//! keyboard.connect(&synth, ConnectFlags::NONE).unwrap();
//!
//! let sent = keyboard.transmit(MidiEventKind::NoteOn, 0, 60, 100).unwrap();
//! assert_eq!(sent.destinations(), 1);
//! ```

pub mod error;
pub use error::{Error, Result};

pub(crate) mod control;
pub(crate) mod event;

pub use control::{MidiControl, MidiGraphExt};
pub use event::{cc, rpn, ControlData, MidiData, MidiEvent, MidiEventKind, NoteData};
