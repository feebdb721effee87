//! Event dispatch and fan-out.

use std::borrow::Cow;
use std::sync::Arc;

use smallvec::SmallVec;

use super::{Control, ControlFlags};
use crate::event::{ActiveGuard, Event, TransformFn};
use crate::value::Value;
use crate::{Error, Result};

/// Outcome of handing one event to one control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The receive behavior ran.
    Delivered,
    /// The event waits in the control's queue.
    Queued,
    /// The event's origin is already passing through this control.
    LoopSuppressed,
}

/// Outcome of fanning an event out over a control's outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    /// Dispatched to `destinations` outputs; `failed` of them rejected it.
    Sent { destinations: usize, failed: usize },
    /// The transmitting control is already carrying this event's origin.
    LoopSuppressed,
}

impl Transmit {
    pub fn destinations(&self) -> usize {
        match self {
            Transmit::Sent { destinations, .. } => *destinations,
            Transmit::LoopSuppressed => 0,
        }
    }
}

/// One fan-out target captured under the source lock.
struct Route {
    dest: Control,
    transform: Option<Arc<TransformFn>>,
}

type Routes = SmallVec<[Route; 16]>;
type Expired = SmallVec<[Event; 4]>;

/// Active references on an event and, if distinct, its origin for the
/// duration of one dispatch.
struct InFlight {
    _event: ActiveGuard,
    _origin: Option<ActiveGuard>,
}

impl InFlight {
    fn new(event: &Event) -> (Self, Event) {
        let origin = event.origin_or_self().clone();
        let guard = InFlight {
            _event: event.activate(),
            _origin: (!origin.ptr_eq(event)).then(|| origin.activate()),
        };
        (guard, origin)
    }
}

impl Control {
    /// Set the control's value through a new self-originated event,
    /// honoring the control's queue.
    pub fn set_value(&self, value: Value) -> Result<Dispatch> {
        self.set_value_impl(value, true)
    }

    /// Like [`set_value`](Self::set_value) but always delivers immediately.
    pub fn set_value_no_queue(&self, value: Value) -> Result<Dispatch> {
        self.set_value_impl(value, false)
    }

    fn set_value_impl(&self, value: Value, use_queue: bool) -> Result<Dispatch> {
        let event = Event::new(value);
        let _active = event.activate();
        let queue = {
            let mut state = self.state().write();
            state.active.push_front(event.clone());
            if use_queue {
                state.queue.clone()
            } else {
                None
            }
        };
        if let Some(queue) = queue {
            if queue.should_queue(self, &event) {
                queue.add_event(self, &event);
                return Ok(Dispatch::Queued);
            }
        }
        self.deliver(&event)?;
        Ok(Dispatch::Delivered)
    }

    /// Main dispatch entry point: loop check, then queue or deliver.
    pub fn set_event(&self, event: &Event) -> Result<Dispatch> {
        self.set_event_impl(event, true)
    }

    /// Dispatch with the loop check but bypassing any queue.
    pub fn set_event_no_queue(&self, event: &Event) -> Result<Dispatch> {
        self.set_event_impl(event, false)
    }

    /// Deliver immediately, with no loop check and no queue. Used for events
    /// whose loop check already happened, such as queued ones.
    pub fn set_event_no_queue_loop(&self, event: &Event) -> Result<Dispatch> {
        let _active = event.activate();
        self.deliver(event)?;
        Ok(Dispatch::Delivered)
    }

    fn set_event_impl(&self, event: &Event, use_queue: bool) -> Result<Dispatch> {
        let (_in_flight, origin) = InFlight::new(event);
        let mut expired = Expired::new();
        let queue = {
            let mut state = self.state().write();
            if !state.loop_check(&origin, &mut expired) {
                drop(state);
                tracing::trace!("Loop suppressed at control {}", self.id());
                return Ok(Dispatch::LoopSuppressed);
            }
            state.active.push_front(origin);
            if use_queue {
                state.queue.clone()
            } else {
                None
            }
        };
        drop(expired);

        if let Some(queue) = queue {
            if queue.should_queue(self, event) {
                queue.add_event(self, event);
                return Ok(Dispatch::Queued);
            }
        }
        self.deliver(event)?;
        Ok(Dispatch::Delivered)
    }

    /// Coerce and hand the event's value to the receive behavior.
    fn deliver(&self, event: &Event) -> Result<()> {
        let flags = self.flags();
        if !flags.contains(ControlFlags::RECVS) {
            return Err(Error::MissingCapability {
                control: self.id(),
                capability: "receives",
            });
        }
        let value = self.coerce(flags, event.value())?;
        tracing::trace!("Delivering {:?} to control {}", value, self.id());
        self.behavior().set_value(self, event, &value);
        Ok(())
    }

    /// Convert `value` to this control's native type following its flags.
    pub(crate) fn coerce<'v>(&self, flags: ControlFlags, value: &'v Value) -> Result<Cow<'v, Value>> {
        let Some(ty) = self.value_type() else {
            return Ok(Cow::Borrowed(value));
        };
        let found = value.value_type();
        if found == ty {
            return Ok(Cow::Borrowed(value));
        }
        if flags.contains(ControlFlags::NATIVE) {
            return Err(Error::TypeMismatch {
                control: self.id(),
                expected: ty,
                found,
            });
        }
        if flags.contains(ControlFlags::NO_CONV) {
            return Ok(Cow::Borrowed(value));
        }
        value
            .convert(ty)
            .map(Cow::Owned)
            .ok_or(Error::Conversion { from: found, to: ty })
    }

    /// Send a value out over every output connection.
    pub fn transmit_value(&self, value: Value) -> Transmit {
        self.transmit_new(Event::new(value))
    }

    /// Send a "value changed" event whose payload refers to this control.
    pub fn transmit_changed(&self) -> Transmit {
        self.transmit_new(Event::for_control(self, None))
    }

    fn transmit_new(&self, event: Event) -> Transmit {
        let _active = event.activate();
        let routes = {
            let mut state = self.state().write();
            state.active.push_front(event.clone());
            snapshot(&state.outputs)
        };
        self.fan_out(&event, routes)
    }

    /// Send an existing event out, unless its origin is already passing
    /// through this control.
    pub fn transmit_event(&self, event: &Event) -> Transmit {
        let (_in_flight, origin) = InFlight::new(event);
        let mut expired = Expired::new();
        let routes = {
            let mut state = self.state().write();
            if !state.loop_check(&origin, &mut expired) {
                drop(state);
                tracing::trace!("Transmit loop suppressed at control {}", self.id());
                return Transmit::LoopSuppressed;
            }
            state.active.push_front(origin);
            snapshot(&state.outputs)
        };
        drop(expired);
        self.fan_out(event, routes)
    }

    /// Send an existing event out regardless of the loop check. The origin
    /// is still recorded so downstream pass-through nodes can break cycles.
    pub fn transmit_event_loop(&self, event: &Event) -> Transmit {
        let (_in_flight, origin) = InFlight::new(event);
        let mut expired = Expired::new();
        let routes = {
            let mut state = self.state().write();
            if state.loop_check(&origin, &mut expired) {
                state.active.push_front(origin);
            }
            snapshot(&state.outputs)
        };
        drop(expired);
        self.fan_out(event, routes)
    }

    /// Unchecked rebroadcast: fan out without consulting or updating the
    /// active list. Only bus-style controls use this.
    pub(crate) fn rebroadcast(&self, event: &Event) -> Transmit {
        let _active = event.activate();
        let routes = snapshot(&self.state().read().outputs);
        self.fan_out(event, routes)
    }

    fn fan_out(&self, event: &Event, routes: Routes) -> Transmit {
        let mut failed = 0;
        for route in &routes {
            let res = match &route.transform {
                Some(func) => {
                    let transformed = event.transform(route.dest.value_type(), func.as_ref());
                    route.dest.set_event(&transformed)
                }
                None => route.dest.set_event(event),
            };
            if let Err(e) = res {
                failed += 1;
                tracing::warn!(
                    "Control {} rejected event from {}: {}",
                    route.dest.id(),
                    self.id(),
                    e
                );
            }
        }
        Transmit::Sent {
            destinations: routes.len(),
            failed,
        }
    }
}

/// Live destinations only. Edges to a control being dropped are skipped;
/// its teardown removes them.
fn snapshot(outputs: &[crate::connection::OutputConn]) -> Routes {
    outputs
        .iter()
        .filter_map(|conn| {
            Some(Route {
                dest: conn.dest.upgrade()?,
                transform: conn.transform.clone(),
            })
        })
        .collect()
}
