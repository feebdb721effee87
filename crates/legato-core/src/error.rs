//! Error types for legato-core.

use thiserror::Error;

use crate::control::ControlId;
use crate::param::ParamKind;
use crate::value::ValueType;

/// Error type for control graph operations.
///
/// Every variant describes a condition that was resolved at the API boundary:
/// the graph is left exactly as it was before the failing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Control {control} lacks the '{capability}' capability")]
    MissingCapability {
        control: ControlId,
        capability: &'static str,
    },

    #[error("Control {control} already has {limit} output connections")]
    ConnectionLimit { control: ControlId, limit: usize },

    #[error("Control {src} is already connected to {dest}")]
    AlreadyConnected { src: ControlId, dest: ControlId },

    #[error("Control {src} is not connected to {dest}")]
    NotConnected { src: ControlId, dest: ControlId },

    #[error("Control {0} cannot be connected to itself")]
    SelfConnection(ControlId),

    #[error("Control {0} has connections; flags can only change on an unconnected control")]
    HasConnections(ControlId),

    #[error("Control {0} has inputs and needs a set callback to stay writable")]
    ReceiverRequired(ControlId),

    #[error("Control {control} value type is fixed to {current}, cannot change to {requested}")]
    ValueTypeLocked {
        control: ControlId,
        current: ValueType,
        requested: ValueType,
    },

    #[error("Control {0} has no value type")]
    ValueTypeUnset(ControlId),

    #[error("Control {control} only accepts {expected}, got {found}")]
    TypeMismatch {
        control: ControlId,
        expected: ValueType,
        found: ValueType,
    },

    #[error("No value conversion from {from} to {to}")]
    Conversion { from: ValueType, to: ValueType },

    #[error("No parameter conversion from {kind:?} to {to}")]
    SpecConversion { kind: ParamKind, to: ValueType },

    #[error("Control {0} has no parameter spec")]
    NoSpec(ControlId),

    #[error("Control {0} does not accept parameter specs")]
    SpecRejected(ControlId),

    #[error("Control {0} has no readable value")]
    NoValue(ControlId),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Property '{property}': {reason}")]
    PropertyAccess { property: String, reason: String },

    #[error("Property object has been dropped")]
    ObjectGone,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
