//! Control graph configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for a [`ControlGraph`](crate::ControlGraph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Ceiling on output connections per control.
    pub max_outputs: usize,
    /// Minimum time between expiration sweeps run by `maintain`.
    pub expiration_interval: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_outputs: 64,
            expiration_interval: Duration::from_secs(10),
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_outputs == 0 || self.max_outputs > 4096 {
            return Err(Error::InvalidConfig(format!(
                "max_outputs {} out of range (1-4096)",
                self.max_outputs
            )));
        }
        if self.expiration_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "expiration_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
