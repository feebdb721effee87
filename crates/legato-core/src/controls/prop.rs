//! Property bridge controls.
//!
//! A [`PropControl`] mirrors one named property of an external
//! [`PropertyObject`]. Values received by the control are written into the
//! object; the object reports its own changes back through
//! [`ControlGraph::property_changed`], which makes the control transmit them.
//!
//! Writes carry an [`OriginToken`]. An object that echoes a change caused by
//! the graph hands the token back, so the echo is recognized as part of the
//! same propagation and is not sent around again.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::control::{Control, ControlBehavior, ControlFlags, Transmit};
use crate::event::Event;
use crate::param::ParamSpec;
use crate::value::{Value, ValueType};
use crate::{ControlGraph, Error, Result};

/// An external object exposing named, typed properties.
pub trait PropertyObject: Send + Sync + 'static {
    /// Descriptor of `name`, `None` if the object has no such property.
    fn find_property(&self, name: &str) -> Option<ParamSpec>;

    fn get_property(&self, name: &str) -> Option<Value>;

    /// Write `name`. Implementations that report the change through
    /// [`ControlGraph::property_changed`] should pass `origin` along.
    fn set_property(&self, name: &str, value: &Value, origin: &OriginToken) -> Result<()>;
}

/// Identifies the propagation that caused a property write.
#[derive(Clone)]
pub struct OriginToken(Event);

impl OriginToken {
    /// Token for the propagation `event` belongs to.
    pub fn new(event: &Event) -> Self {
        Self(event.origin_or_self().clone())
    }

    pub fn event(&self) -> &Event {
        &self.0
    }
}

impl fmt::Debug for OriginToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OriginToken").field(&self.0).finish()
    }
}

pub(crate) fn object_addr(object: &dyn PropertyObject) -> usize {
    object as *const dyn PropertyObject as *const () as usize
}

/// Payload of an object-wide property change event.
pub struct PropChange {
    object: Weak<dyn PropertyObject>,
    property: String,
    value: Value,
}

impl PropChange {
    pub fn new<O: PropertyObject>(object: &Arc<O>, property: impl Into<String>, value: Value) -> Self {
        let object: Arc<dyn PropertyObject> = object.clone();
        Self::from_weak(Arc::downgrade(&object), property.into(), value)
    }

    pub(crate) fn from_weak(object: Weak<dyn PropertyObject>, property: String, value: Value) -> Self {
        Self {
            object,
            property,
            value,
        }
    }

    pub fn object(&self) -> Option<Arc<dyn PropertyObject>> {
        self.object.upgrade()
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn object_addr(&self) -> usize {
        self.object.as_ptr() as *const () as usize
    }
}

impl PartialEq for PropChange {
    fn eq(&self, other: &Self) -> bool {
        self.object_addr() == other.object_addr()
            && self.property == other.property
            && self.value == other.value
    }
}

impl fmt::Debug for PropChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropChange")
            .field("object", &format_args!("{:#x}", self.object_addr()))
            .field("property", &self.property)
            .field("value", &self.value)
            .finish()
    }
}

pub(crate) struct PropState {
    object: Weak<dyn PropertyObject>,
    /// `None` for the object-wide events control.
    property: Option<String>,
    spec: Option<ParamSpec>,
}

impl ControlBehavior for PropState {
    fn kind(&self) -> &'static str {
        "prop"
    }

    fn get_spec(&self) -> Option<ParamSpec> {
        self.spec.clone()
    }

    fn get_value(&self, _control: &Control) -> Option<Value> {
        let name = self.property.as_deref()?;
        self.object.upgrade()?.get_property(name)
    }

    fn set_value(&self, control: &Control, event: &Event, value: &Value) {
        let Some(object) = self.object.upgrade() else {
            tracing::debug!("Property control {} outlived its object", control.id());
            return;
        };
        let token = OriginToken::new(event);
        let res = match (self.property.as_deref(), value) {
            (Some(name), value) => object.set_property(name, value, &token),
            (None, Value::PropChange(change)) => {
                object.set_property(change.property(), change.value(), &token)
            }
            (None, other) => Err(Error::InvalidParam(format!(
                "expected a property change, got {}",
                other.value_type()
            ))),
        };
        if let Err(e) = res {
            tracing::warn!("Property write through control {} failed: {}", control.id(), e);
            return;
        }
        control.transmit_event_loop(event);
    }
}

/// Control bound to a property of an external object.
#[derive(Clone)]
pub struct PropControl {
    control: Control,
    state: Arc<PropState>,
}

impl PropControl {
    pub(crate) fn create(
        graph: &ControlGraph,
        object: &Arc<dyn PropertyObject>,
        property: Option<&str>,
    ) -> Result<Self> {
        let (spec, flags, value_type) = match property {
            Some(name) => {
                let spec = object
                    .find_property(name)
                    .ok_or_else(|| Error::PropertyNotFound(name.to_string()))?;
                let mut flags = ControlFlags::NONE;
                if spec.is_readable() {
                    flags |= ControlFlags::SENDS;
                }
                if spec.is_writable() {
                    flags |= ControlFlags::RECVS;
                }
                if flags == ControlFlags::NONE {
                    return Err(Error::PropertyAccess {
                        property: name.to_string(),
                        reason: "neither readable nor writable".into(),
                    });
                }
                let value_type = spec.value_type();
                (Some(spec), flags, value_type)
            }
            None => (None, ControlFlags::SENDRECV, Some(ValueType::PropChange)),
        };
        let state = Arc::new(PropState {
            object: Arc::downgrade(object),
            property: property.map(str::to_string),
            spec,
        });
        let control = graph.create_control(state.clone(), flags, value_type);
        Ok(Self { control, state })
    }

    /// Property name, `None` for the object-wide events control.
    pub fn property(&self) -> Option<&str> {
        self.state.property.as_deref()
    }

    pub fn object(&self) -> Option<Arc<dyn PropertyObject>> {
        self.state.object.upgrade()
    }

    pub(crate) fn weak_object(&self) -> Weak<dyn PropertyObject> {
        self.state.object.clone()
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.state.object.strong_count() == 0
    }

    pub(crate) fn is_bound_to(&self, object: &dyn PropertyObject) -> bool {
        self.state.object.strong_count() > 0
            && self.state.object.as_ptr() as *const () as usize == object_addr(object)
    }

    /// Transmit an externally observed change. `origin` is the token the
    /// object received with the write that caused it, if any.
    pub fn notify(&self, value: Value, origin: Option<&OriginToken>) -> Transmit {
        let event = Event::new(value);
        if let Some(token) = origin {
            event.set_origin(token.event());
        }
        self.control.transmit_event(&event)
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn into_control(self) -> Control {
        self.control
    }
}

impl Deref for PropControl {
    type Target = Control;

    fn deref(&self) -> &Control {
        &self.control
    }
}

impl fmt::Debug for PropControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropControl")
            .field("control", &self.control)
            .field("property", &self.property())
            .finish()
    }
}
