//! Thread-safe reactive control graph.
//!
//! Controls are nodes that send and/or receive typed values. Connections
//! carry [`Event`]s from one control's outputs to other controls' inputs,
//! optionally transforming values on the way, and cycles are cut by
//! tracking each event's origin while it is in flight.
//!
//! # Primary API
//!
//! - [`ControlGraph`] / [`ControlGraphBuilder`]: creates controls and runs expiration sweeps
//! - [`Control`]: connect, dispatch and transmit
//! - [`FuncControl`], [`ValueControl`], [`PropControl`]: control variants
//! - [`ControlQueue`]: deferred delivery for single-threaded consumers
//!
//! # Example
//!
//! ```
//! use legato_core::{ConnectOptions, ControlGraph, Transform, Value, ValueControl, ValueType};
//!
//! let graph = ControlGraph::new();
//! let a = ValueControl::typed(&graph, ValueType::Int, Value::Int(5)).unwrap();
//! let b = ValueControl::typed(&graph, ValueType::Float, Value::Float(0.0)).unwrap();
//! a.connect(&b, ConnectOptions::new().init().transform(Transform::scale(2.0))).unwrap();
//! assert_eq!(b.value(), Some(Value::Float(10.0)));
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::GraphConfig;

pub mod connection;
pub use connection::{ConnectFlags, ConnectOptions, Direction, Priority, Transform};

pub mod control;
pub use control::{
    Control, ControlBehavior, ControlFlags, ControlId, ControlNotification, Dispatch, Transmit,
    WeakControl,
};

pub mod controls;
pub use controls::{
    FuncCallbacks, FuncControl, OriginToken, PropChange, PropControl, PropertyObject,
    ValueControl,
};

pub mod event;
pub use event::{ActiveGuard, Event, TransformFn};

mod graph;
pub use graph::{ControlGraph, ControlGraphBuilder};

pub mod param;
pub use param::{Limits, ParamKind, ParamSpec};

pub mod queue;
pub use queue::{ControlQueue, QueueTestFn};

pub mod value;
pub use value::{BoxedType, BoxedValue, Value, ValueType};
