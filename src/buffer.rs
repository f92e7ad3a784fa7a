//! The history buffer: window accounting, the body registry and the push/query surface.
use std::collections::HashMap;

use tracing::trace;

use crate::{
    body::{BodyId, BodyState, Capability, Dynamics, Property, ReconciliationPolicy, SimBodies},
    config::RewindConfig,
    error::RewindError,
    history::{
        arena::{RecordArena, SlotId},
        record::EntityHistoryRecord,
    },
    scheduling::release::ReleaseQueue,
    step::{Phase, Step, StepAndPhase},
    sync::{desync, ResimState, SyncState},
};

pub(crate) fn not_found<Id: BodyId>(id: Id) -> RewindError {
    RewindError::NotFound {
        name: format!("{id:?}"),
    }
}

/// Bounded, step-indexed history of every body that went dirty inside the retained window.
///
/// The buffer is a sequential structure owned by the simulation thread. A tick is driven as
///
/// 1. `push_external_input` for every body the application changed,
/// 2. the host's solve, then `push_solver_result` for every body it moved,
/// 3. `advance_frame` for housekeeping, eviction and desync checks,
/// 4. `finish_frame` to close the step.
///
/// Between ticks the buffer may be rewound with
/// [`rewind_to_step`](HistoryBuffer::rewind_to_step) and read through
/// [`past_state_at`](HistoryBuffer::past_state_at).
#[derive(Debug)]
pub struct HistoryBuffer<Id> {
    pub(crate) config: RewindConfig,
    pub(crate) current_step: Step,
    pub(crate) latest_step: Step,
    pub(crate) saved_step_count: usize,
    pub(crate) earliest_step: Step,
    /// Largest horizon histories were trimmed to; the window never reaches below it.
    pub(crate) trimmed_before: Step,
    pub(crate) resim_state: ResimState,
    pub(crate) needs_save: bool,
    pub(crate) arena: RecordArena<Id>,
    pub(crate) entries: Vec<(Id, SlotId)>,
    pub(crate) index: HashMap<Id, usize>,
    pub(crate) desynced: Vec<Id>,
    pub(crate) pending_release: ReleaseQueue<Id>,
    pub(crate) released: Vec<Id>,
}

impl<Id: BodyId> HistoryBuffer<Id> {
    pub fn new(config: RewindConfig) -> Result<Self, RewindError> {
        config.validate()?;
        let start = config.start_step;
        let mut arena = RecordArena::new();
        arena.reserve(config.reserve_bodies);
        Ok(Self {
            current_step: start,
            latest_step: start,
            saved_step_count: 0,
            earliest_step: start - 1,
            trimmed_before: start - 1,
            resim_state: ResimState::Idle,
            needs_save: false,
            arena,
            entries: Vec::with_capacity(config.reserve_bodies),
            index: HashMap::with_capacity(config.reserve_bodies),
            desynced: Vec::new(),
            pending_release: ReleaseQueue::new(),
            released: Vec::new(),
            config,
        })
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, RewindError> {
        Self::new(RewindConfig::default().with_capacity(capacity))
    }

    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// The present while a resimulation runs; equal to the current step otherwise.
    pub fn latest_step(&self) -> Step {
        self.latest_step.max(self.current_step)
    }

    pub fn saved_step_count(&self) -> usize {
        self.saved_step_count
    }

    pub fn earliest_retrievable_step(&self) -> Step {
        self.earliest_step
    }

    pub fn resim_state(&self) -> ResimState {
        self.resim_state
    }

    pub fn is_resimulating(&self) -> bool {
        self.resim_state != ResimState::Idle
    }

    pub fn is_final_resim(&self) -> bool {
        self.resim_state == ResimState::ResimulatingFinalPass
    }

    /// Whether the current step has written history that the next advance has not saved.
    pub fn needs_save(&self) -> bool {
        self.needs_save
    }

    /// How many steps a destroyed body must stay addressable for rewinds to remain valid.
    pub fn release_delay(&self) -> Step {
        self.config.capacity as Step
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_tracked(&self, id: Id) -> bool {
        self.index.contains_key(&id)
    }

    /// Tracked bodies in registry order.
    pub fn tracked_bodies(&self) -> impl Iterator<Item = Id> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub(crate) fn slot_of(&self, id: Id) -> Option<SlotId> {
        self.index.get(&id).map(|&idx| self.entries[idx].1)
    }

    pub fn record(&self, id: Id) -> Option<&EntityHistoryRecord<Id>> {
        self.slot_of(id).map(|slot| self.arena.get(slot))
    }

    pub fn sync_state(&self, id: Id) -> Option<SyncState> {
        self.record(id).map(EntityHistoryRecord::sync_state)
    }

    /// Bodies currently diverged from their recorded history. Only meaningful while
    /// resimulating.
    pub fn desynced_bodies(&self) -> &[Id] {
        &self.desynced
    }

    /// Grows the registry ahead of a step expected to dirty `additional` new bodies.
    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
        self.index.reserve(additional);
        self.arena.reserve(additional);
    }

    /// Starts tracking `id`. Returns false, changing nothing, if it is already tracked.
    ///
    /// `spawn_step` is the step the body became active; `None` for bodies that have always
    /// existed. A rewind to before the spawn step disables the body.
    pub fn register_body(
        &mut self,
        id: Id,
        capability: Capability,
        spawn_step: Option<Step>,
    ) -> bool {
        if self.is_tracked(id) {
            return false;
        }
        let slot = self
            .arena
            .acquire(id, capability, spawn_step, self.current_step);
        self.index.insert(id, self.entries.len());
        self.entries.push((id, slot));
        true
    }

    /// Where a body's value from before it first went dirty is recorded. Untracked bodies
    /// were unchanged across the whole window, so the value holds from its start.
    fn seed_key(&self) -> StepAndPhase {
        StepAndPhase::pre_input(self.earliest_step.min(self.current_step - 1))
    }

    pub(crate) fn find_or_add(&mut self, id: Id, capability: Capability) -> SlotId {
        match self.slot_of(id) {
            Some(slot) => {
                self.arena.get_mut(slot).capability.policy = capability.policy;
                slot
            }
            None => {
                self.register_body(id, capability, None);
                self.entries[self.entries.len() - 1].1
            }
        }
    }

    /// Swap-removes the registry entry at `idx` and recycles its record.
    pub(crate) fn remove_at(&mut self, idx: usize) {
        let (id, slot) = self.entries.swap_remove(idx);
        self.index.remove(&id);
        if let Some((moved, _)) = self.entries.get(idx) {
            self.index.insert(*moved, idx);
        }
        self.arena.release(slot);
    }

    /// Drops a body's history immediately. Returns whether it was tracked.
    pub fn remove_body(&mut self, id: Id) -> bool {
        let Some(&idx) = self.index.get(&id) else {
            return false;
        };
        self.remove_at(idx);
        true
    }

    /// Schedules a destroyed body for release once no rewind can reach a step where it was
    /// alive. Its history stays available until then.
    pub fn release_body(&mut self, id: Id) {
        if self.pending_release.contains(&id) {
            return;
        }
        let due = self.current_step + self.release_delay();
        trace!(?id, due, "body release scheduled");
        self.pending_release.schedule(id, due);
    }

    /// Bodies whose release came due, for the host to free.
    pub fn drain_released(&mut self) -> Vec<Id> {
        std::mem::take(&mut self.released)
    }

    pub(crate) fn process_releases(&mut self) {
        while let Some(id) = self.pending_release.pop_due(self.current_step) {
            self.remove_body(id);
            trace!(?id, step = self.current_step, "body released");
            self.released.push(id);
        }
    }

    /// Records the dirty properties the application pushed for `id` this step.
    ///
    /// While resimulating, a body that is still in sync replays the very input already on
    /// record, so nothing is written. A body that never changed anything (an empty
    /// `changes`) consumes no history.
    pub fn push_external_input<B: SimBodies<Id = Id>>(
        &mut self,
        bodies: &B,
        id: Id,
        changes: &BodyState,
    ) -> Result<(), RewindError> {
        if self.is_resimulating() && self.sync_state(id) == Some(SyncState::InSync) {
            return Ok(());
        }
        if changes.is_empty() {
            return Ok(());
        }
        let capability = bodies.capability(id).ok_or_else(|| not_found(id))?;
        let step = self.current_step;
        let seed_key = self.seed_key();
        let slot = self.find_or_add(id, capability);
        let record = self.arena.get_mut(slot);
        if record.spawn_step != Some(step) {
            if let Some(live) = bodies.read_state(id) {
                record.seed(seed_key, changes, &live)?;
            }
        }
        if record
            .add_or_get_step_entry(step)
            .write(Phase::PreInput, changes)?
        {
            self.needs_save = true;
        }
        Ok(())
    }

    /// Records what the solver produced for `id` this step: `post_input` is the state
    /// after input was applied, `post_solve` the state after integration and callbacks.
    ///
    /// While resimulating, an `AlwaysTrust` body is taken on faith and nothing is
    /// written; a reconciling body still in sync is first compared against its record
    /// and desynced if the values diverge.
    pub fn push_solver_result<B: SimBodies<Id = Id>>(
        &mut self,
        bodies: &B,
        id: Id,
        post_input: &BodyState,
        post_solve: &BodyState,
    ) -> Result<(), RewindError> {
        let capability = bodies.capability(id).ok_or_else(|| not_found(id))?;
        let step = self.current_step;
        let resimulating = self.is_resimulating();
        let include_dynamics = self.is_final_resim();
        let skip_desync_test = self.config.skip_desync_test;
        let seed_key = self.seed_key();
        let slot = self.find_or_add(id, capability);
        let record = self.arena.get_mut(slot);

        if resimulating && record.sync_state == SyncState::InSync {
            if record.policy() == ReconciliationPolicy::AlwaysTrust {
                return Ok(());
            }
            let diverged = desync::diverges(
                record,
                post_input,
                StepAndPhase::post_input(step),
                include_dynamics,
                skip_desync_test,
            ) || desync::diverges(
                record,
                post_solve,
                StepAndPhase::post_solve(step),
                include_dynamics,
                skip_desync_test,
            );
            if diverged {
                desync::hard_desync(record, StepAndPhase::post_input(step));
                self.desynced.push(id);
            }
        }

        if record.spawn_step != Some(step) {
            record.seed(seed_key, post_input, post_input)?;
        }
        let mut entry = record.add_or_get_step_entry(step);
        entry.write(Phase::PostInput, post_input)?;
        entry.write(Phase::PostSolve, post_solve)?;
        record.last_dirty_step = step;
        self.needs_save = true;
        Ok(())
    }

    /// Marks `id`'s dynamics as touched by a one-off callback this step. The value is
    /// captured during the next `advance_frame` unless the body is reconciled in a
    /// resimulation.
    pub fn defer_dynamics(&mut self, id: Id, dynamics: Dynamics) -> Result<(), RewindError> {
        let slot = self.slot_of(id).ok_or_else(|| not_found(id))?;
        self.arena.get_mut(slot).deferred_dynamics = Some(dynamics);
        Ok(())
    }

    /// Read-only view of `id` as recorded at `(step, phase)`.
    ///
    /// `None` means the body has no history inside the window: its live state has been
    /// unchanged throughout.
    pub fn past_state_at(
        &self,
        id: Id,
        step: Step,
        phase: Phase,
    ) -> Result<Option<PastState<'_, Id>>, RewindError> {
        if step < self.earliest_step {
            return Err(RewindError::OutOfWindow {
                step,
                earliest: self.earliest_step,
            });
        }
        Ok(self.record(id).map(|record| PastState {
            record,
            key: StepAndPhase::new(step, phase),
        }))
    }

    /// Drops every record and pending release, keeping the current step.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.entries.clear();
        self.index.clear();
        self.desynced.clear();
        self.pending_release.clear();
        self.released.clear();
        self.resim_state = ResimState::Idle;
        self.latest_step = self.current_step;
        self.saved_step_count = 0;
        self.earliest_step = self.current_step - 1;
        self.trimmed_before = self.earliest_step;
        self.needs_save = false;
    }
}

/// Immutable snapshot view of one body at a past `StepAndPhase`.
#[derive(Debug, Clone, Copy)]
pub struct PastState<'a, Id> {
    record: &'a EntityHistoryRecord<Id>,
    key: StepAndPhase,
}

impl<Id> PastState<'_, Id> {
    pub fn id(&self) -> &Id {
        self.record.id()
    }

    pub fn key(&self) -> StepAndPhase {
        self.key
    }

    pub fn get<P: Property>(&self) -> Option<P> {
        P::history(self.record).and_then(|history| history.read(self.key).copied())
    }

    pub fn to_state(&self) -> BodyState {
        self.record.snapshot_at(self.key)
    }
}
