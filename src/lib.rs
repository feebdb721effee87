//! # Legato - Reactive Control Graph
//!
//! Thread-safe routing of typed values between controls.
//!
//! ## Architecture
//!
//! Legato is an umbrella crate that coordinates:
//! - **legato-core** - Control graph runtime (events, connections, dispatch,
//!   queues, func/value/hub/property controls)
//! - **legato-midi** - Structured MIDI events and `MidiControl`
//!
//! It adds [`ControlEngine`], which owns a graph and its named queues and
//! drives both from a single `pump` call.
//!
//! ## Quick Start
//!
//! ```
//! use legato::prelude::*;
//!
//! let engine = ControlEngine::builder().build().unwrap();
//! let graph = engine.graph();
//!
//! let volume = ValueControl::typed(graph, ValueType::Float, Value::Float(0.5)).unwrap();
//! let meter = graph.value_control();
//! volume.connect(&meter, ConnectOptions::new().init().transform(Transform::scale(100.0)))
//!     .unwrap();
//! assert_eq!(meter.value(), Some(Value::Double(50.0)));
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - `midi`
//! - `midi` - MIDI events and controls

/// Re-export of legato-core for direct access
pub use legato_core as core;

pub use legato_core::{
    ConnectFlags, ConnectOptions, Control, ControlBehavior, ControlFlags, ControlGraph,
    ControlGraphBuilder, ControlId, ControlNotification, ControlQueue, Direction, Dispatch, Event,
    FuncCallbacks, FuncControl, GraphConfig, OriginToken, ParamSpec, Priority, PropChange,
    PropControl, PropertyObject, Transform, Transmit, Value, ValueControl, ValueType,
    WeakControl,
};

// MIDI subsystem
#[cfg(feature = "midi")]
pub use legato_midi as midi;

#[cfg(feature = "midi")]
pub use legato_midi::{MidiControl, MidiEvent, MidiEventKind, MidiGraphExt};

mod builder;
mod engine;
mod error;

pub use builder::ControlEngineBuilder;
pub use engine::{ControlEngine, PumpReport};
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    // Main engine
    pub use crate::{ControlEngine, ControlEngineBuilder, PumpReport};

    // Graph
    pub use crate::core::{
        ConnectFlags, ConnectOptions, Control, ControlFlags, ControlGraph, ControlQueue, Event,
        FuncCallbacks, FuncControl, Transform, Value, ValueControl, ValueType,
    };

    // Property bridge
    pub use crate::core::{OriginToken, PropControl, PropertyObject};

    // MIDI
    #[cfg(feature = "midi")]
    pub use crate::midi::{MidiControl, MidiEvent, MidiEventKind, MidiGraphExt};
}
