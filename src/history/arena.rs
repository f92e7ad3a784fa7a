//! Slot pool for history records.
//!
//! Records are addressed by a stable `SlotId` for as long as their body is tracked. An
//! evicted record is cleared in place and its slot handed to the next body, so property
//! vectors keep their allocations across rewind-heavy workloads instead of being freed and
//! reallocated.
use crate::{body::Capability, history::record::EntityHistoryRecord, step::Step};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct RecordArena<Id> {
    slots: Vec<EntityHistoryRecord<Id>>,
    free: Vec<SlotId>,
}

impl<Id> Default for RecordArena<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> RecordArena<Id> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        let short = additional.saturating_sub(self.free.len());
        self.slots.reserve(short);
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots ever allocated, occupied or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn acquire(
        &mut self,
        id: Id,
        capability: Capability,
        spawn_step: Option<Step>,
        step: Step,
    ) -> SlotId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot.0].reinit(id, capability, spawn_step, step);
            return slot;
        }
        self.slots
            .push(EntityHistoryRecord::new(id, capability, spawn_step, step));
        SlotId(self.slots.len() - 1)
    }

    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(!self.free.contains(&slot), "slot released twice");
        self.slots[slot.0].clear();
        self.free.push(slot);
    }

    pub fn get(&self, slot: SlotId) -> &EntityHistoryRecord<Id> {
        &self.slots[slot.0]
    }

    pub fn get_mut(&mut self, slot: SlotId) -> &mut EntityHistoryRecord<Id> {
        &mut self.slots[slot.0]
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
