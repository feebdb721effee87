//! Controls: graph nodes that send and/or receive typed values.
//!
//! A [`Control`] is a cheap shared handle. Each control owns one
//! reader/writer lock guarding its flags, connection lists, active-event
//! list, queue and notification listeners. Variant behavior (callbacks, a
//! value slot, a property bridge) plugs in through [`ControlBehavior`].
//!
//! ```text
//!   producer ──set/transmit──► Control ──snapshot outputs──► dest.set_event()
//!                                 │                              │
//!                                 └── active list (origins) ◄────┘ loop check
//! ```
//!
//! Lock discipline:
//! - a control's own lock is never held while another control's dispatch runs
//!   (fan-out snapshots the output list first);
//! - two control locks are held together only while installing or removing a
//!   connection pair, always in address order;
//! - destroy hooks and notifications run after every lock is released.

mod connect;
mod dispatch;

pub use dispatch::{Dispatch, Transmit};

use std::collections::VecDeque;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, OnceLock, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::connection::{ConnectFlags, Direction, InputConn, OutputConn};
use crate::event::Event;
use crate::param::ParamSpec;
use crate::queue::ControlQueue;
use crate::value::{Value, ValueType};
use crate::{Error, Result};

/// Process-unique control identifier, used in diagnostics and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlId(pub(crate) u64);

impl ControlId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Control capability flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub const NONE: Self = Self(0);
    /// Can originate values (has outputs).
    pub const SENDS: Self = Self(1 << 0);
    /// Accepts values (has inputs).
    pub const RECVS: Self = Self(1 << 1);
    /// Incoming values are passed through without conversion.
    pub const NO_CONV: Self = Self(1 << 2);
    /// Incoming values must already be the native type.
    pub const NATIVE: Self = Self(1 << 3);
    /// Value-slot control.
    pub const VALUE: Self = Self(1 << 4);
    /// Parameter specs are stored without conversion.
    pub const SPEC_NO_CONV: Self = Self(1 << 5);
    pub const SENDRECV: Self = Self(Self::SENDS.0 | Self::RECVS.0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ControlFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ControlFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::SENDS, "SENDS"),
            (Self::RECVS, "RECVS"),
            (Self::NO_CONV, "NO_CONV"),
            (Self::NATIVE, "NATIVE"),
            (Self::VALUE, "VALUE"),
            (Self::SPEC_NO_CONV, "SPEC_NO_CONV"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ControlFlags({})", set.join(" | "))
    }
}

/// Per-variant behavior of a control.
///
/// Implementations keep their own state behind their own synchronization;
/// none of these methods is called while the control's lock is held.
pub trait ControlBehavior: Send + Sync + 'static {
    /// Short variant name for logs.
    fn kind(&self) -> &'static str {
        "control"
    }

    fn get_spec(&self) -> Option<ParamSpec> {
        None
    }

    /// Whether [`set_spec`](Self::set_spec) is supported at all.
    fn accepts_spec(&self) -> bool {
        false
    }

    fn set_spec(&self, _spec: ParamSpec) {}

    /// Current native value, `None` if the variant has no readable value.
    fn get_value(&self, _control: &Control) -> Option<Value> {
        None
    }

    /// Receive a value that already passed type coercion.
    fn set_value(&self, _control: &Control, _event: &Event, _value: &Value) {}
}

/// Behavior of a plain event control: no spec, no value.
pub(crate) struct EventBehavior;

impl ControlBehavior for EventBehavior {}

/// Change notification delivered to [`Control::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNotification {
    Connected {
        peer: ControlId,
        direction: Direction,
        flags: ConnectFlags,
    },
    Disconnected {
        peer: ControlId,
        direction: Direction,
    },
    SpecChanged(ParamSpec),
}

pub(crate) struct ControlState {
    pub flags: ControlFlags,
    pub outputs: Vec<OutputConn>,
    pub inputs: Vec<InputConn>,
    /// Recently seen origins, newest first.
    pub active: VecDeque<Event>,
    pub queue: Option<ControlQueue>,
    pub listeners: Vec<Sender<ControlNotification>>,
}

impl ControlState {
    /// Returns `false` when `origin` is already being delivered through this
    /// control. Inactive entries met along the way move to `expired`.
    pub fn loop_check(&mut self, origin: &Event, expired: &mut SmallVec<[Event; 4]>) -> bool {
        // Only pass-through nodes can close a cycle.
        if !self.flags.contains(ControlFlags::SENDRECV) {
            return true;
        }
        let mut found = false;
        self.active.retain(|e| {
            if !e.is_active() {
                expired.push(e.clone());
                false
            } else {
                found |= e.ptr_eq(origin);
                true
            }
        });
        !found
    }

    pub fn expire_inactive(&mut self) -> Vec<Event> {
        let mut expired = Vec::new();
        self.active.retain(|e| {
            if e.is_active() {
                true
            } else {
                expired.push(e.clone());
                false
            }
        });
        expired
    }
}

pub(crate) struct ControlInner {
    id: ControlId,
    max_outputs: usize,
    value_type: OnceLock<ValueType>,
    state: RwLock<ControlState>,
    behavior: Arc<dyn ControlBehavior>,
}

impl Drop for ControlInner {
    fn drop(&mut self) {
        let me: *const ControlInner = self;
        let state = self.state.get_mut();
        let outputs = std::mem::take(&mut state.outputs);
        let inputs = std::mem::take(&mut state.inputs);

        // Peers are upgraded one at a time and released only after every
        // peer lock is dropped, since releasing one may tear it down too.
        let mut peers: Vec<Control> = Vec::new();
        let mut detached: Vec<OutputConn> = Vec::new();
        for conn in &outputs {
            if let Some(dest) = conn.dest.upgrade() {
                dest.0
                    .state
                    .write()
                    .inputs
                    .retain(|input| input.src.as_ptr() != me);
                peers.push(dest);
            }
        }
        for input in &inputs {
            if let Some(src) = input.src.upgrade() {
                {
                    let mut src_state = src.0.state.write();
                    let mut i = 0;
                    while i < src_state.outputs.len() {
                        if src_state.outputs[i].dest.as_ptr() == me {
                            detached.push(src_state.outputs.remove(i));
                        } else {
                            i += 1;
                        }
                    }
                }
                peers.push(src);
            }
        }
        if !outputs.is_empty() || !detached.is_empty() {
            tracing::debug!(
                "Control {} dropped, tore down {} outputs and {} inputs",
                self.id,
                outputs.len(),
                detached.len()
            );
        }
        // Destroy hooks fire here, with no lock held.
        drop(outputs);
        drop(detached);
        drop(peers);
    }
}

/// Shared handle to a control.
#[derive(Clone)]
pub struct Control(pub(crate) Arc<ControlInner>);

/// Weak handle to a control.
#[derive(Clone, Default)]
pub struct WeakControl(Weak<ControlInner>);

impl WeakControl {
    pub fn upgrade(&self) -> Option<Control> {
        self.0.upgrade().map(Control)
    }

    pub fn ptr_eq(&self, other: &WeakControl) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn points_to(&self, control: &Control) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&control.0))
    }

    fn as_ptr(&self) -> *const ControlInner {
        self.0.as_ptr()
    }
}

impl fmt::Debug for WeakControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(control) => write!(f, "WeakControl({})", control.id()),
            None => f.write_str("WeakControl(<dropped>)"),
        }
    }
}

impl Control {
    pub(crate) fn new(
        id: ControlId,
        behavior: Arc<dyn ControlBehavior>,
        flags: ControlFlags,
        value_type: Option<ValueType>,
        max_outputs: usize,
    ) -> Self {
        let slot = OnceLock::new();
        if let Some(ty) = value_type {
            let _ = slot.set(ty);
        }
        Control(Arc::new(ControlInner {
            id,
            max_outputs,
            value_type: slot,
            state: RwLock::new(ControlState {
                flags,
                outputs: Vec::new(),
                inputs: Vec::new(),
                active: VecDeque::new(),
                queue: None,
                listeners: Vec::new(),
            }),
            behavior,
        }))
    }

    pub fn id(&self) -> ControlId {
        self.0.id
    }

    pub fn kind(&self) -> &'static str {
        self.0.behavior.kind()
    }

    pub fn downgrade(&self) -> WeakControl {
        WeakControl(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Control) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn behavior(&self) -> &Arc<dyn ControlBehavior> {
        &self.0.behavior
    }

    pub(crate) fn state(&self) -> &RwLock<ControlState> {
        &self.0.state
    }

    pub fn flags(&self) -> ControlFlags {
        self.0.state.read().flags
    }

    /// Replace the capability flags. Only allowed while unconnected.
    pub fn set_flags(&self, flags: ControlFlags) -> Result<()> {
        let mut state = self.0.state.write();
        if !state.inputs.is_empty() || !state.outputs.is_empty() {
            return Err(Error::HasConnections(self.id()));
        }
        state.flags = flags;
        Ok(())
    }

    /// Change flags from a variant while checking its own preconditions
    /// under the control lock.
    pub(crate) fn update_state<R>(&self, f: impl FnOnce(&mut ControlState) -> Result<R>) -> Result<R> {
        let mut state = self.0.state.write();
        f(&mut state)
    }

    /// Native value type, `None` for a wildcard control.
    pub fn value_type(&self) -> Option<ValueType> {
        self.0.value_type.get().copied()
    }

    /// Fix the native value type. Write-once: repeating the same type is a
    /// no-op, a different type is rejected.
    pub fn set_value_type(&self, ty: ValueType) -> Result<()> {
        let current = *self.0.value_type.get_or_init(|| ty);
        if current != ty {
            return Err(Error::ValueTypeLocked {
                control: self.id(),
                current,
                requested: ty,
            });
        }
        Ok(())
    }

    pub fn queue(&self) -> Option<ControlQueue> {
        self.0.state.read().queue.clone()
    }

    /// Route deliveries to this control through `queue`, or deliver
    /// immediately with `None`.
    pub fn set_queue(&self, queue: Option<ControlQueue>) {
        let old = std::mem::replace(&mut self.0.state.write().queue, queue);
        drop(old);
    }

    /// Receive connect, disconnect and spec-changed notifications.
    pub fn subscribe(&self) -> Receiver<ControlNotification> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.0.state.write().listeners.push(tx);
        rx
    }

    pub(crate) fn notify(&self, notification: ControlNotification) {
        let mut state = self.0.state.write();
        if state.listeners.is_empty() {
            return;
        }
        // Unbounded channels never block; closed receivers are pruned.
        state
            .listeners
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Controls on one side of this control, in firing order for outputs.
    pub fn connections(&self, direction: Direction) -> Vec<Control> {
        let state = self.0.state.read();
        match direction {
            Direction::Output => state.outputs.iter().filter_map(|c| c.dest.upgrade()).collect(),
            Direction::Input => state.inputs.iter().filter_map(|c| c.src.upgrade()).collect(),
        }
    }

    pub fn output_count(&self) -> usize {
        self.0.state.read().outputs.len()
    }

    pub fn input_count(&self) -> usize {
        self.0.state.read().inputs.len()
    }

    /// Number of origins currently remembered for loop detection.
    pub fn active_event_count(&self) -> usize {
        self.0.state.read().active.len()
    }

    /// Drop remembered origins that are no longer active. Returns the number evicted.
    pub fn expire_events(&self) -> usize {
        let expired = self.0.state.write().expire_inactive();
        expired.len()
    }

    pub fn get_spec(&self) -> Option<ParamSpec> {
        self.0.behavior.get_spec()
    }

    /// Store a parameter spec, converted to the native value type unless
    /// `SPEC_NO_CONV` is set. Rejected specs leave the current one in place.
    pub fn set_spec(&self, spec: ParamSpec) -> Result<()> {
        let spec = self.convert_spec(spec)?;
        self.apply_spec(spec);
        Ok(())
    }

    /// Checks acceptance and converts `spec` without storing it.
    pub(crate) fn convert_spec(&self, spec: ParamSpec) -> Result<ParamSpec> {
        if !self.0.behavior.accepts_spec() {
            return Err(Error::SpecRejected(self.id()));
        }
        match self.value_type() {
            Some(ty)
                if spec.value_type() != Some(ty)
                    && !self.flags().contains(ControlFlags::SPEC_NO_CONV) =>
            {
                spec.convert(ty)
            }
            _ => Ok(spec),
        }
    }

    pub(crate) fn apply_spec(&self, spec: ParamSpec) {
        self.0.behavior.set_spec(spec.clone());
        self.notify(ControlNotification::SpecChanged(spec));
    }

    /// Current value in its native type.
    pub fn get_value_native(&self) -> Result<Value> {
        if !self.flags().contains(ControlFlags::SENDS) {
            return Err(Error::MissingCapability {
                control: self.id(),
                capability: "sends",
            });
        }
        if self.value_type().is_none() {
            return Err(Error::ValueTypeUnset(self.id()));
        }
        self.0
            .behavior
            .get_value(self)
            .ok_or(Error::NoValue(self.id()))
    }

    /// Current value converted to `ty`.
    pub fn get_value(&self, ty: ValueType) -> Result<Value> {
        let value = self.get_value_native()?;
        let from = value.value_type();
        if from == ty {
            return Ok(value);
        }
        value.convert(ty).ok_or(Error::Conversion { from, to: ty })
    }
}

impl PartialEq for Control {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Control {}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("value_type", &self.value_type())
            .finish()
    }
}
