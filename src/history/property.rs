//! Sparse, time-ordered log of one property of one body.
//!
//! `PropertyHistory` only stores the points at which a value changed. A read "as of" a
//! `StepAndPhase` returns the most recent entry at or before it, so a body that sits still
//! for fifty steps costs a single entry.
use bytemuck::Pod;

use crate::{
    error::RewindError,
    step::{Step, StepAndPhase},
};

/// Byte-wise equality: resimulation must reproduce values bit for bit.
pub fn bitwise_eq<T: Pod>(a: &T, b: &T) -> bool {
    bytemuck::bytes_of(a) == bytemuck::bytes_of(b)
}

#[derive(Debug, Clone)]
pub struct PropertyHistory<T> {
    entries: Vec<(StepAndPhase, T)>,
}

impl<T> Default for PropertyHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PropertyHistory<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_key(&self) -> Option<StepAndPhase> {
        self.entries.last().map(|(key, _)| *key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StepAndPhase, &T)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }

    /// Appends `value`; `key` must be strictly after the last entry.
    pub fn write_monotonic(&mut self, key: StepAndPhase, value: T) -> Result<(), RewindError> {
        if let Some(last) = self.last_key() {
            if key <= last {
                return Err(RewindError::TimeTravel {
                    last,
                    attempted: key,
                });
            }
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Appends `value`, or replaces the last entry when it carries the same key.
    pub fn write_non_decreasing(&mut self, key: StepAndPhase, value: T) -> Result<(), RewindError> {
        match self.entries.last_mut() {
            Some((last, slot)) if *last == key => {
                *slot = value;
                Ok(())
            }
            Some((last, _)) if *last > key => Err(RewindError::TimeTravel {
                last: *last,
                attempted: key,
            }),
            _ => {
                self.entries.push((key, value));
                Ok(())
            }
        }
    }

    /// Guarded write used by the buffer's push paths.
    ///
    /// A clean key past the tail is appended monotonically and a key equal to the tail is
    /// overwritten. When later entries already exist the key is covered by retained
    /// history and nothing is written. Returns whether a value was stored.
    pub fn record(&mut self, key: StepAndPhase, value: T) -> Result<bool, RewindError> {
        match self.last_key() {
            Some(last) if last > key => Ok(false),
            _ if self.is_clean(key) => self.write_monotonic(key, value).map(|_| true),
            _ => self.write_non_decreasing(key, value).map(|_| true),
        }
    }

    /// Latest value at or before `key`.
    pub fn read(&self, key: StepAndPhase) -> Option<&T> {
        let idx = self.entries.partition_point(|(k, _)| *k <= key);
        idx.checked_sub(1).map(|i| &self.entries[i].1)
    }

    /// True if nothing has been written at exactly `key`.
    pub fn is_clean(&self, key: StepAndPhase) -> bool {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(&key))
            .is_err()
    }

    /// True if there is no recorded value as of `key`, or it equals `live` under `eq`.
    pub fn is_in_sync<F>(&self, live: &T, key: StepAndPhase, eq: F) -> bool
    where
        F: Fn(&T, &T) -> bool,
    {
        self.read(key).map_or(true, |recorded| eq(recorded, live))
    }

    /// Drops every entry at or after `key`.
    pub fn clear_from(&mut self, key: StepAndPhase) {
        let idx = self.entries.partition_point(|(k, _)| *k < key);
        self.entries.truncate(idx);
    }

    /// Drops every entry written at `step` or later.
    pub fn clear_from_step_onward(&mut self, step: Step) {
        self.clear_from(StepAndPhase::pre_input(step));
    }

    /// Drops entries no read at or after `horizon` can observe.
    ///
    /// The newest entry before `horizon` is kept since it is still the value as of the
    /// horizon.
    pub fn chop_tail(&mut self, horizon: Step) {
        let before = self.entries.partition_point(|(k, _)| k.step < horizon);
        if before > 1 {
            self.entries.drain(..before - 1);
        }
    }

    /// Empties the log but keeps its allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Pod> PropertyHistory<T> {
    pub fn is_in_sync_bitwise(&self, live: &T, key: StepAndPhase) -> bool {
        self.is_in_sync(live, key, bitwise_eq)
    }
}
