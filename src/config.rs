#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{error::RewindError, step::Step};

/// Construction parameters for a [`HistoryBuffer`](crate::buffer::HistoryBuffer).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RewindConfig {
    /// Maximum number of steps retained. Fixed for the lifetime of the buffer.
    pub capacity: usize,
    /// Step the buffer starts counting from.
    pub start_step: Step,
    /// Never desync a body during resimulation. A benchmark override for measuring the
    /// cost floor of resimulation; results are not correct with it enabled.
    pub skip_desync_test: bool,
    /// Registry capacity reserved up front.
    pub reserve_bodies: usize,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            start_step: 0,
            skip_desync_test: false,
            reserve_bodies: 0,
        }
    }
}

impl RewindConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_start_step(mut self, step: Step) -> Self {
        self.start_step = step;
        self
    }

    pub fn with_skip_desync_test(mut self, skip: bool) -> Self {
        self.skip_desync_test = skip;
        self
    }

    pub fn with_reserve_bodies(mut self, bodies: usize) -> Self {
        self.reserve_bodies = bodies;
        self
    }

    pub fn validate(&self) -> Result<(), RewindError> {
        if self.capacity == 0 {
            return Err(RewindError::ZeroCapacity);
        }
        Ok(())
    }
}
