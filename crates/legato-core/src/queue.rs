//! Deferred delivery queues.
//!
//! A [`ControlQueue`] parks events bound for controls owned by a
//! single-threaded domain (a UI pump, say) until the owner drains it with
//! [`ControlQueue::run`]. The loop check already ran when an event was
//! queued, so draining uses the no-queue, no-loop-check delivery path.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use crate::control::Control;
use crate::event::Event;

/// Decides whether an event for `control` is queued (`true`) or delivered
/// immediately (`false`).
pub type QueueTestFn = dyn Fn(&ControlQueue, &Control, &Event) -> bool + Send + Sync;

struct QueueItem {
    control: Control,
    event: Event,
}

impl Drop for QueueItem {
    fn drop(&mut self) {
        self.event.active_unref();
    }
}

struct QueueInner {
    /// Newest first.
    items: RwLock<VecDeque<QueueItem>>,
    test: ArcSwapOption<Box<QueueTestFn>>,
}

/// Shared FIFO of pending (control, event) deliveries.
#[derive(Clone)]
pub struct ControlQueue(Arc<QueueInner>);

impl Default for ControlQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlQueue {
    pub fn new() -> Self {
        Self(Arc::new(QueueInner {
            items: RwLock::new(VecDeque::new()),
            test: ArcSwapOption::empty(),
        }))
    }

    /// Install or clear the queue-vs-deliver predicate. Without one, every
    /// event is queued.
    pub fn set_test_func<F>(&self, test: Option<F>)
    where
        F: Fn(&ControlQueue, &Control, &Event) -> bool + Send + Sync + 'static,
    {
        let boxed = test.map(|f| Arc::new(Box::new(f) as Box<QueueTestFn>));
        self.0.test.store(boxed);
    }

    pub fn clear_test_func(&self) {
        self.0.test.store(None);
    }

    pub(crate) fn should_queue(&self, control: &Control, event: &Event) -> bool {
        match self.0.test.load_full() {
            Some(test) => test(self, control, event),
            None => true,
        }
    }

    /// Park `event` for `control`. The event stays active until drained.
    ///
    /// Callers evaluate the test predicate first.
    pub fn add_event(&self, control: &Control, event: &Event) {
        event.active_ref();
        let item = QueueItem {
            control: control.clone(),
            event: event.clone(),
        };
        self.0.items.write().push_front(item);
    }

    /// Deliver every pending event in insertion order. Returns the number of
    /// events delivered successfully.
    pub fn run(&self) -> usize {
        let items = std::mem::take(&mut *self.0.items.write());
        let mut delivered = 0;
        for item in items.into_iter().rev() {
            match item.control.set_event_no_queue_loop(&item.event) {
                Ok(_) => delivered += 1,
                Err(e) => tracing::warn!(
                    "Queued event for control {} rejected: {}",
                    item.control.id(),
                    e
                ),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &ControlQueue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ControlQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlQueue")
            .field("pending", &self.len())
            .field("has_test", &self.0.test.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Dispatch;
    use crate::value::Value;
    use crate::ControlGraph;

    #[test]
    fn test_queue_keeps_event_active_until_run() {
        let graph = ControlGraph::new();
        let v = graph.value_control();
        let q = ControlQueue::new();
        v.set_queue(Some(q.clone()));

        let e = Event::new(Value::Int(3));
        assert_eq!(v.set_event(&e), Ok(Dispatch::Queued));
        assert_eq!(e.active_count(), 1);
        assert_eq!(v.value(), None);
        assert_eq!(q.len(), 1);

        assert_eq!(q.run(), 1);
        assert_eq!(e.active_count(), 0);
        assert_eq!(v.value(), Some(Value::Int(3)));
        assert!(q.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let graph = ControlGraph::new();
        let v = graph.value_control();
        let q = ControlQueue::new();
        let e1 = Event::new(Value::Int(1));
        let e2 = Event::new(Value::Int(2));
        q.add_event(&v, &e1);
        q.add_event(&v, &e2);
        q.run();
        // Last delivered wins in the value slot.
        assert_eq!(v.value(), Some(Value::Int(2)));
    }

    #[test]
    fn test_predicate_selects_immediate_delivery() {
        let graph = ControlGraph::new();
        let v = graph.value_control();
        let q = ControlQueue::new();
        v.set_queue(Some(q.clone()));
        q.set_test_func(Some(|_: &ControlQueue, _: &Control, e: &Event| {
            e.value().as_i64().unwrap_or(0) > 10
        }));

        assert_eq!(v.set_value(Value::Int(5)), Ok(Dispatch::Delivered));
        assert_eq!(v.set_value(Value::Int(50)), Ok(Dispatch::Queued));
        assert_eq!(v.value(), Some(Value::Int(5)));

        q.clear_test_func();
        assert_eq!(v.set_value(Value::Int(6)), Ok(Dispatch::Queued));
        assert_eq!(q.run(), 2);
        assert_eq!(v.value(), Some(Value::Int(6)));
    }

    #[test]
    fn test_no_queue_bypasses() {
        let graph = ControlGraph::new();
        let v = graph.value_control();
        let q = ControlQueue::new();
        v.set_queue(Some(q.clone()));
        assert_eq!(v.set_value_no_queue(Value::Int(9)), Ok(Dispatch::Delivered));
        assert!(q.is_empty());
        assert_eq!(
            v.set_event_no_queue(&Event::new(Value::Int(8))),
            Ok(Dispatch::Delivered)
        );
        assert!(q.is_empty());
    }
}
