//! Callback-backed controls.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::connection::DestroyFn;
use crate::control::{Control, ControlBehavior, ControlFlags};
use crate::event::Event;
use crate::param::ParamSpec;
use crate::value::Value;
use crate::{ControlGraph, Error, Result};

/// Reads a control's current value.
pub type GetFn = dyn Fn(&Control) -> Option<Value> + Send + Sync;
/// Receives a value delivered to a control.
pub type SetFn = dyn Fn(&Control, &Event, &Value) + Send + Sync;

/// Callback set for [`FuncControl::assign_funcs`].
#[derive(Default)]
pub struct FuncCallbacks {
    get: Option<Arc<GetFn>>,
    set: Option<Arc<SetFn>>,
    destroy: Option<DestroyFn>,
}

impl FuncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<F>(mut self, get: F) -> Self
    where
        F: Fn(&Control) -> Option<Value> + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(get));
        self
    }

    pub fn set<F>(mut self, set: F) -> Self
    where
        F: Fn(&Control, &Event, &Value) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }

    /// Runs once, when these callbacks are replaced or the control drops.
    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }
}

impl fmt::Debug for FuncCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncCallbacks")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .field("destroy", &self.destroy.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
struct Funcs {
    get: Option<Arc<GetFn>>,
    set: Option<Arc<SetFn>>,
}

pub(crate) struct FuncState {
    funcs: RwLock<Funcs>,
    destroy: Mutex<Option<DestroyFn>>,
    spec: RwLock<Option<ParamSpec>>,
    spec_settable: AtomicBool,
}

impl Default for FuncState {
    fn default() -> Self {
        Self {
            funcs: RwLock::default(),
            destroy: Mutex::new(None),
            spec: RwLock::new(None),
            spec_settable: AtomicBool::new(true),
        }
    }
}

impl ControlBehavior for FuncState {
    fn kind(&self) -> &'static str {
        "func"
    }

    fn get_spec(&self) -> Option<ParamSpec> {
        self.spec.read().clone()
    }

    fn accepts_spec(&self) -> bool {
        self.spec_settable.load(Ordering::Acquire)
    }

    fn set_spec(&self, spec: ParamSpec) {
        *self.spec.write() = Some(spec);
    }

    fn get_value(&self, control: &Control) -> Option<Value> {
        // Clone out so a callback may reassign funcs.
        let get = self.funcs.read().get.clone()?;
        get(control)
    }

    fn set_value(&self, control: &Control, event: &Event, value: &Value) {
        let set = self.funcs.read().set.clone();
        if let Some(set) = set {
            set(control, event, value);
        }
    }
}

impl Drop for FuncState {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.get_mut().take() {
            destroy();
        }
    }
}

/// Control whose value is read and written through user callbacks.
#[derive(Clone)]
pub struct FuncControl {
    control: Control,
    state: Arc<FuncState>,
}

impl FuncControl {
    pub(crate) fn new(graph: &ControlGraph) -> Self {
        Self::with_flags(graph, ControlFlags::SENDS, None)
    }

    /// Func control with preset flags and native type, for specialized variants.
    pub fn with_flags(
        graph: &ControlGraph,
        flags: ControlFlags,
        value_type: Option<crate::value::ValueType>,
    ) -> Self {
        let state = Arc::new(FuncState::default());
        let control = graph.create_control(state.clone(), flags, value_type);
        Self { control, state }
    }

    /// Replace the callbacks. The control receives only when a set callback
    /// is present, so replacing callbacks on a control that already has
    /// inputs requires one. The previous callbacks are released and the
    /// previous destroy hook runs after the control lock is dropped.
    pub fn assign_funcs(&self, callbacks: FuncCallbacks) -> Result<()> {
        let FuncCallbacks { get, set, destroy } = callbacks;
        let has_set = set.is_some();
        let (old_funcs, old_destroy) = self.control.update_state(|state| {
            if !state.inputs.is_empty() && !has_set {
                return Err(Error::ReceiverRequired(self.control.id()));
            }
            let old_funcs = std::mem::replace(&mut *self.state.funcs.write(), Funcs { get, set });
            let mut flags = state.flags.without(ControlFlags::SENDRECV) | ControlFlags::SENDS;
            if has_set {
                flags |= ControlFlags::RECVS;
            }
            state.flags = flags;
            let old_destroy = std::mem::replace(&mut *self.state.destroy.lock(), destroy);
            Ok((old_funcs, old_destroy))
        })?;
        // Old closures may own the last handle of a peer, whose teardown
        // locks this control.
        drop(old_funcs);
        if let Some(destroy) = old_destroy {
            destroy();
        }
        Ok(())
    }

    /// Make [`Control::set_spec`] fail from now on, for variants whose
    /// descriptor is fixed.
    pub fn reject_specs(&self) {
        self.state.spec_settable.store(false, Ordering::Release);
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn into_control(self) -> Control {
        self.control
    }
}

impl Deref for FuncControl {
    type Target = Control;

    fn deref(&self) -> &Control {
        &self.control
    }
}

impl fmt::Debug for FuncControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FuncControl").field(&self.control).finish()
    }
}
