//! Builder for configuring and constructing a `ControlEngine`.

use std::time::Duration;

use legato_core::{ControlGraph, GraphConfig};

use crate::{ControlEngine, Error, Result};

/// Graph settings are forwarded to [`ControlGraph::with_config`] and
/// validated there. Queues declared here exist from the start; any other
/// name passed to [`ControlEngine::queue`] is created on first use.
///
/// # Example
///
/// ```
/// use legato::prelude::*;
/// use std::time::Duration;
///
/// let engine = ControlEngine::builder()
///     .max_outputs(16)
///     .expiration_interval(Duration::from_secs(2))
///     .queue("ui")
///     .build()
///     .unwrap();
/// assert_eq!(engine.graph().config().max_outputs, 16);
/// assert!(engine.has_queue("ui"));
/// ```
#[derive(Debug, Default)]
pub struct ControlEngineBuilder {
    config: GraphConfig,
    queues: Vec<String>,
}

impl ControlEngineBuilder {
    /// Default: 64
    pub fn max_outputs(mut self, max: usize) -> Self {
        self.config.max_outputs = max;
        self
    }

    /// Default: 10 seconds
    pub fn expiration_interval(mut self, interval: Duration) -> Self {
        self.config.expiration_interval = interval;
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare a named queue.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queues.push(name.into());
        self
    }

    pub fn build(self) -> Result<ControlEngine> {
        let mut seen = std::collections::HashSet::new();
        for name in &self.queues {
            if name.is_empty() {
                return Err(Error::EmptyQueueName);
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::DuplicateQueue(name.clone()));
            }
        }
        let graph = ControlGraph::with_config(self.config)?;
        tracing::debug!("Built control engine with {} queues", self.queues.len());
        Ok(ControlEngine::from_parts(graph, self.queues))
    }
}
