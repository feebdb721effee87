//! Value-slot controls.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::control::{Control, ControlBehavior, ControlFlags};
use crate::event::Event;
use crate::param::ParamSpec;
use crate::value::{Value, ValueType};
use crate::{ControlGraph, Error, Result};

/// Called with the outgoing value when a slot is reassigned or dropped.
pub type ValueDestroyFn = Box<dyn FnOnce(Value) + Send>;

#[derive(Default)]
struct Slot {
    value: Option<Value>,
    destroy: Option<ValueDestroyFn>,
}

impl Slot {
    fn release(&mut self) -> Option<(ValueDestroyFn, Value)> {
        let destroy = self.destroy.take();
        let value = self.value.take();
        destroy.zip(value)
    }
}

#[derive(Default)]
pub(crate) struct ValueState {
    slot: Mutex<Slot>,
    spec: RwLock<Option<ParamSpec>>,
}

impl ControlBehavior for ValueState {
    fn kind(&self) -> &'static str {
        "value"
    }

    fn get_spec(&self) -> Option<ParamSpec> {
        self.spec.read().clone()
    }

    fn accepts_spec(&self) -> bool {
        true
    }

    fn set_spec(&self, spec: ParamSpec) {
        *self.spec.write() = Some(spec);
    }

    fn get_value(&self, _control: &Control) -> Option<Value> {
        self.slot.lock().value.clone()
    }

    fn set_value(&self, _control: &Control, _event: &Event, value: &Value) {
        let old = self.slot.lock().value.replace(value.clone());
        drop(old);
    }
}

impl Drop for ValueState {
    fn drop(&mut self) {
        if let Some((destroy, value)) = self.slot.get_mut().release() {
            destroy(value);
        }
    }
}

/// Control that stores one value, copied in on receive and out on read.
#[derive(Clone)]
pub struct ValueControl {
    control: Control,
    state: Arc<ValueState>,
}

impl ValueControl {
    pub(crate) fn new(graph: &ControlGraph) -> Self {
        let state = Arc::new(ValueState::default());
        let control = graph.create_control(
            state.clone(),
            ControlFlags::SENDRECV | ControlFlags::VALUE,
            None,
        );
        Self { control, state }
    }

    /// Value control with a fixed native type and an initial value.
    pub fn typed(graph: &ControlGraph, ty: ValueType, initial: Value) -> Result<Self> {
        let this = Self::new(graph);
        this.control.set_value_type(ty)?;
        this.assign_value(initial)?;
        Ok(this)
    }

    /// Snapshot of the stored value.
    pub fn value(&self) -> Option<Value> {
        self.state.slot.lock().value.clone()
    }

    /// Replace the stored value without dispatching an event.
    pub fn assign_value(&self, value: Value) -> Result<()> {
        self.install(value, None)
    }

    /// Replace the stored value, handing ownership of the new one to
    /// `destroy` when it is later replaced or the control drops.
    pub fn assign_value_with<F>(&self, value: Value, destroy: F) -> Result<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.install(value, Some(Box::new(destroy)))
    }

    /// Fill the slot with the spec's default value.
    pub fn alloc_value(&self) -> Result<()> {
        let spec = self
            .control
            .get_spec()
            .ok_or(Error::NoSpec(self.control.id()))?;
        let value = spec
            .default_value()
            .ok_or_else(|| Error::InvalidParam(format!("no default for '{}'", spec.name())))?;
        self.install(value, None)
    }

    fn install(&self, value: Value, destroy: Option<ValueDestroyFn>) -> Result<()> {
        let target = self
            .control
            .value_type()
            .or_else(|| self.control.get_spec().and_then(|s| s.value_type()))
            .unwrap_or_else(|| value.value_type());
        let found = value.value_type();
        let value = if found == target {
            value
        } else {
            value
                .convert(target)
                .ok_or(Error::Conversion { from: found, to: target })?
        };
        self.control.set_value_type(target)?;

        let released = {
            let mut slot = self.state.slot.lock();
            let released = slot.release();
            slot.value = Some(value);
            slot.destroy = destroy;
            released
        };
        if let Some((destroy, old)) = released {
            destroy(old);
        }
        Ok(())
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn into_control(self) -> Control {
        self.control
    }
}

impl Deref for ValueControl {
    type Target = Control;

    fn deref(&self) -> &Control {
        &self.control
    }
}

impl fmt::Debug for ValueControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueControl")
            .field("control", &self.control)
            .field("value", &self.value())
            .finish()
    }
}
