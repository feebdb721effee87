//! ControlEngine that owns a control graph and drives its queues.

use std::time::Instant;

use dashmap::DashMap;
use legato_core::{ControlGraph, ControlQueue};

#[cfg(feature = "midi")]
use legato_midi::MidiControl;

/// Result of one [`ControlEngine::pump`] tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Queued events delivered across all queues.
    pub delivered: usize,
    /// Events evicted by the expiration sweep, `None` when no sweep was due.
    pub expired: Option<usize>,
}

/// A control graph plus its named delivery queues.
///
/// Controls that must only be touched from one thread (a UI, say) get a
/// queue from [`queue`](Self::queue); that thread calls
/// [`pump`](Self::pump) periodically to deliver what was parked and to run
/// the graph's expiration sweep when it is due.
///
/// # Example
///
/// ```
/// use legato::prelude::*;
/// use std::time::Instant;
///
/// let engine = ControlEngine::builder().queue("ui").build().unwrap();
/// let display = engine.graph().value_control();
/// display.set_queue(Some(engine.queue("ui")));
///
/// display.set_value(Value::Int(3)).unwrap();
/// assert_eq!(display.value(), None);
///
/// let report = engine.pump(Instant::now());
/// assert_eq!(report.delivered, 1);
/// assert_eq!(display.value(), Some(Value::Int(3)));
/// ```
pub struct ControlEngine {
    graph: ControlGraph,
    queues: DashMap<String, ControlQueue>,
}

impl ControlEngine {
    /// Create a new engine builder
    pub fn builder() -> crate::ControlEngineBuilder {
        crate::ControlEngineBuilder::default()
    }

    pub(crate) fn from_parts(graph: ControlGraph, queue_names: Vec<String>) -> Self {
        let queues = DashMap::new();
        for name in queue_names {
            queues.insert(name, ControlQueue::new());
        }
        Self { graph, queues }
    }

    pub fn graph(&self) -> &ControlGraph {
        &self.graph
    }

    /// The queue called `name`, created on first use.
    pub fn queue(&self, name: &str) -> ControlQueue {
        if let Some(queue) = self.queues.get(name) {
            return queue.clone();
        }
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created control queue '{}'", name);
                ControlQueue::new()
            })
            .clone()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Queue names in sorted order.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Detach the queue called `name`. Pending events stay in it; controls
    /// still pointing at it keep queueing into it.
    pub fn remove_queue(&self, name: &str) -> Option<ControlQueue> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    /// Number of events waiting across all queues.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|e| e.value().len()).sum()
    }

    /// Run every queue in name order, then the graph's periodic maintenance.
    ///
    /// Queues are snapshotted first, so handlers may create or look up
    /// queues while they run.
    pub fn pump(&self, now: Instant) -> PumpReport {
        let mut queues: Vec<(String, ControlQueue)> = self
            .queues
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        queues.sort_by(|a, b| a.0.cmp(&b.0));

        let mut delivered = 0;
        for (name, queue) in &queues {
            let n = queue.run();
            if n > 0 {
                tracing::trace!("Queue '{}' delivered {} events", name, n);
            }
            delivered += n;
        }
        let expired = self.graph.maintain(now);
        PumpReport { delivered, expired }
    }

    #[cfg(feature = "midi")]
    pub fn midi_control(&self) -> MidiControl {
        MidiControl::new(&self.graph)
    }
}

impl Default for ControlEngine {
    fn default() -> Self {
        Self::from_parts(ControlGraph::new(), Vec::new())
    }
}

impl std::fmt::Debug for ControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEngine")
            .field("graph", &self.graph)
            .field("queues", &self.queue_names())
            .finish()
    }
}
