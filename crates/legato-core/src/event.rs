//! Control events: shared envelopes carrying one value through the graph.
//!
//! An [`Event`] has two independent counters. The handle's reference count
//! (the `Arc`) owns the memory, while the *active count* tracks deliveries
//! currently in flight. Loop detection keys on an event's *origin*, the oldest
//! ancestor in a duplicate/transform chain, and treats an origin as re-entrant
//! only while it is still active somewhere in the graph.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use crate::control::Control;
use crate::value::{Value, ValueType};

/// Value transform applied across a connection.
pub type TransformFn = dyn Fn(&Value) -> Value + Send + Sync;

struct EventInner {
    tick: Mutex<Option<Instant>>,
    origin: OnceLock<Event>,
    value: Value,
    active: AtomicUsize,
}

/// Reference-counted event handle. Cloning is a `ref`, dropping an `unref`.
#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl Event {
    /// Un-timestamped event.
    pub fn new(value: Value) -> Self {
        Self::with_tick(value, None)
    }

    /// Event stamped with the current time.
    pub fn stamped(value: Value) -> Self {
        Self::with_tick(value, Some(Instant::now()))
    }

    /// Event for a change on `control`. Without an explicit value the payload
    /// is a weak reference to the control itself.
    pub fn for_control(control: &Control, value: Option<Value>) -> Self {
        Self::new(value.unwrap_or_else(|| Value::Control(control.downgrade())))
    }

    fn with_tick(value: Value, tick: Option<Instant>) -> Self {
        Event(Arc::new(EventInner {
            tick: Mutex::new(tick),
            origin: OnceLock::new(),
            value,
            active: AtomicUsize::new(0),
        }))
    }

    pub fn value(&self) -> &Value {
        &self.0.value
    }

    pub fn tick(&self) -> Option<Instant> {
        *self.0.tick.lock()
    }

    /// Re-stamp with the current time.
    pub fn stamp(&self) {
        *self.0.tick.lock() = Some(Instant::now());
    }

    /// Oldest ancestor, `None` for a self-originated event.
    pub fn origin(&self) -> Option<&Event> {
        self.0.origin.get()
    }

    /// The identity used for loop detection.
    pub fn origin_or_self(&self) -> &Event {
        self.origin().unwrap_or(self)
    }

    /// Set the origin. The chain is flattened so the stored origin is always
    /// the oldest ancestor.
    ///
    /// # Panics
    ///
    /// If the event already has an origin, or `origin` resolves to this event.
    pub fn set_origin(&self, origin: &Event) {
        let root = origin.origin_or_self().clone();
        assert!(!root.ptr_eq(self), "event cannot be its own origin");
        if self.0.origin.set(root).is_err() {
            panic!("event origin already set");
        }
    }

    /// Copy of the tick, origin and value. Counters start fresh.
    pub fn duplicate(&self) -> Event {
        let dup = Self::with_tick(self.0.value.clone(), self.tick());
        if let Some(origin) = self.origin() {
            let _ = dup.0.origin.set(origin.clone());
        }
        dup
    }

    /// New event whose value is `func` applied to this event's value.
    ///
    /// The tick is carried forward and the origin becomes this event's origin
    /// (or this event). When `to` is given the result is coerced to that type
    /// if a conversion exists.
    pub fn transform(&self, to: Option<ValueType>, func: &TransformFn) -> Event {
        let mut value = func(&self.0.value);
        if let Some(ty) = to {
            if value.value_type() != ty {
                if let Some(converted) = value.convert(ty) {
                    value = converted;
                }
            }
        }
        let out = Self::with_tick(value, self.tick());
        let _ = out.0.origin.set(self.origin_or_self().clone());
        out
    }

    /// Memory reference count (number of live handles).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn active_count(&self) -> usize {
        self.0.active.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    pub fn active_ref(&self) {
        self.0.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the active count. Never goes below zero.
    pub fn active_unref(&self) {
        let res = self
            .0
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if res.is_err() {
            tracing::error!("active_unref on inactive event {:?}", self);
        }
    }

    /// Active-ref that is released when the guard drops.
    pub fn activate(&self) -> ActiveGuard {
        self.active_ref();
        ActiveGuard {
            event: self.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("ptr", &Arc::as_ptr(&self.0))
            .field("value", &self.0.value)
            .field("active", &self.active_count())
            .field("has_origin", &self.origin().is_some())
            .finish()
    }
}

/// Holds one active reference on an event.
#[must_use = "the active reference is released when the guard drops"]
pub struct ActiveGuard {
    event: Event,
}

impl ActiveGuard {
    pub fn event(&self) -> &Event {
        &self.event
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.event.active_unref();
    }
}

impl fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActiveGuard").field(&self.event).finish()
    }
}
