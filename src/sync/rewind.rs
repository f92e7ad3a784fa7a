//! Rewinding the live bodies to a past step, and the per-step window advance.
use tracing::{debug, trace, warn};

use crate::{
    body::{
        BodyId, BodyState, DynamicMisc, Dynamics, KinematicTarget, MassProps, Pose, Property,
        ReconciliationPolicy, SimBodies, Velocities,
    },
    buffer::HistoryBuffer,
    error::RewindError,
    history::{property::bitwise_eq, record::EntityHistoryRecord},
    step::{Phase, Step, StepAndPhase},
    sync::{desync, ResimState, SyncState},
};

/// What a successful rewind did to the live bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindSummary<Id> {
    /// Step the buffer was at before the rewind.
    pub from: Step,
    pub target: Step,
    /// Bodies that had at least one property written back.
    pub restored: Vec<Id>,
    /// Bodies disabled because they spawn after the target.
    pub disabled: Vec<Id>,
}

#[derive(Debug, Clone, Copy)]
struct RestorePlan {
    target: StepAndPhase,
    /// Where the live value is saved before restoring, if it is saved at all.
    head: Option<StepAndPhase>,
    solver_only: bool,
}

impl RestorePlan {
    fn for_policy(policy: ReconciliationPolicy, from: Step, target: Step) -> Self {
        let target = StepAndPhase::post_input(target);
        match policy {
            ReconciliationPolicy::Reconcile => Self {
                target,
                head: Some(StepAndPhase::post_input(from)),
                solver_only: false,
            },
            ReconciliationPolicy::AlwaysTrust => Self {
                target,
                head: None,
                solver_only: true,
            },
        }
    }
}

fn restore_property<P: Property, Id>(
    record: &mut EntityHistoryRecord<Id>,
    live: &BodyState,
    restored: &mut BodyState,
    plan: RestorePlan,
) -> Result<bool, RewindError> {
    if plan.solver_only && !P::SOLVER_WRITABLE {
        return Ok(false);
    }
    let (Some(history), Some(current)) = (P::history_mut(record), P::get(live)) else {
        return Ok(false);
    };
    if let Some(head) = plan.head {
        if history.last_key().map_or(true, |last| last < head) {
            history.write_monotonic(head, current)?;
        }
    }
    let Some(past) = history.read(plan.target).copied() else {
        return Ok(false);
    };
    if bitwise_eq(&past, &current) {
        return Ok(false);
    }
    trace!(property = P::NAME, target = %plan.target, "property restored");
    *P::slot(restored) = Some(past);
    Ok(true)
}

/// Restores every property of `record` per `plan`, returning the values to write back.
fn restore_record<Id>(
    record: &mut EntityHistoryRecord<Id>,
    live: &BodyState,
    plan: RestorePlan,
) -> Result<Option<BodyState>, RewindError> {
    let mut restored = BodyState::default();
    let mut changed = restore_property::<Pose, _>(record, live, &mut restored, plan)?;
    changed |= restore_property::<Velocities, _>(record, live, &mut restored, plan)?;
    changed |= restore_property::<KinematicTarget, _>(record, live, &mut restored, plan)?;
    changed |= restore_property::<Dynamics, _>(record, live, &mut restored, plan)?;
    changed |= restore_property::<DynamicMisc, _>(record, live, &mut restored, plan)?;
    changed |= restore_property::<MassProps, _>(record, live, &mut restored, plan)?;
    Ok(changed.then_some(restored))
}

impl<Id: BodyId> HistoryBuffer<Id> {
    fn check_rewind_target(&self, target: Step) -> Result<(), RewindError> {
        if target < self.earliest_step {
            return Err(RewindError::OutOfWindow {
                step: target,
                earliest: self.earliest_step,
            });
        }
        // the next advance would chop the target out of the window
        if target == self.earliest_step
            && self.saved_step_count + 1 == self.config.capacity
            && self.needs_save
        {
            return Err(RewindError::WouldEvict(target));
        }
        if target >= self.current_step {
            return Err(RewindError::NotInPast {
                target,
                current: self.current_step,
            });
        }
        Ok(())
    }

    /// Restores every tracked body to its state at `(target, PostInput)` and starts a
    /// resimulation from there.
    ///
    /// Fails without touching the buffer or the bodies when `target` is outside the
    /// retained window or not in the past.
    pub fn try_rewind_to_step<B: SimBodies<Id = Id>>(
        &mut self,
        target: Step,
        bodies: &mut B,
    ) -> Result<RewindSummary<Id>, RewindError> {
        self.check_rewind_target(target)?;
        let from = self.current_step;
        let mut summary = RewindSummary {
            from,
            target,
            restored: Vec::new(),
            disabled: Vec::new(),
        };

        for &(id, slot) in &self.entries {
            let record = self.arena.get_mut(slot);
            if let Some(live) = bodies.read_state(id) {
                let plan = RestorePlan::for_policy(record.policy(), from, target);
                if let Some(restored) = restore_record(record, &live, plan)? {
                    bodies.write_state(id, &restored);
                    summary.restored.push(id);
                }
            }
            if record.spawn_step.is_some_and(|spawn| spawn > target) {
                if !record.disabled_by_rewind {
                    bodies.set_enabled(id, false);
                    record.disabled_by_rewind = true;
                }
                summary.disabled.push(id);
            }
        }

        self.latest_step = self.latest_step.max(from);
        self.current_step = target;
        self.saved_step_count = 0;
        self.earliest_step = (target - 1).max(self.trimmed_before);
        self.needs_save = false;
        self.desynced.clear();
        self.resim_state = if target + 1 == self.latest_step {
            ResimState::ResimulatingFinalPass
        } else {
            ResimState::Resimulating
        };
        debug!(
            from,
            target,
            restored = summary.restored.len(),
            disabled = summary.disabled.len(),
            state = %self.resim_state,
            "rewound"
        );
        Ok(summary)
    }

    /// [`try_rewind_to_step`](Self::try_rewind_to_step), reporting only success.
    pub fn rewind_to_step<B: SimBodies<Id = Id>>(&mut self, target: Step, bodies: &mut B) -> bool {
        match self.try_rewind_to_step(target, bodies) {
            Ok(_) => true,
            Err(error) => {
                warn!(target, current = self.current_step, %error, "rewind rejected");
                false
            }
        }
    }

    /// Per-step housekeeping, run after the step's results were pushed.
    ///
    /// Slides the window forward, evicts bodies that have been clean for longer than the
    /// window, runs the resimulation desync check, records deferred dynamics and trims
    /// histories to the window.
    pub fn advance_frame<B: SimBodies<Id = Id>>(
        &mut self,
        bodies: &mut B,
    ) -> Result<(), RewindError> {
        self.saved_step_count = (self.saved_step_count + 1).min(self.config.capacity - 1);
        self.earliest_step =
            (self.current_step - 1 - self.saved_step_count as Step).max(self.trimmed_before);
        self.trimmed_before = self.earliest_step;

        let step = self.current_step;
        let earliest = self.earliest_step;
        let resimulating = self.is_resimulating();
        let include_dynamics = self.is_final_resim();
        let skip_desync_test = self.config.skip_desync_test;
        self.desynced.clear();

        let mut idx = 0;
        while idx < self.entries.len() {
            let (id, slot) = self.entries[idx];
            let record = self.arena.get_mut(slot);
            if record.last_dirty_step < earliest && record.sync_state == SyncState::InSync {
                let last_dirty = record.last_dirty_step;
                self.remove_at(idx);
                trace!(?id, last_dirty, earliest, "evicted");
                continue;
            }

            if resimulating
                && record.policy() == ReconciliationPolicy::Reconcile
                && record.sync_state == SyncState::InSync
            {
                if let Some(live) = bodies.read_state(id) {
                    let key = StepAndPhase::post_solve(step);
                    if desync::diverges(record, &live, key, include_dynamics, skip_desync_test) {
                        desync::hard_desync(record, key);
                        record.add_or_get_step_entry(step).write(Phase::PostSolve, &live)?;
                    }
                }
            }
            if record.sync_state == SyncState::HardDesync {
                self.desynced.push(id);
            }

            if let Some(dynamics) = record.deferred_dynamics.take() {
                if !(resimulating && record.sync_state == SyncState::InSync) {
                    record
                        .add_or_get_step_entry(step)
                        .write_property(Phase::PostInput, dynamics)?;
                }
            }

            if record.disabled_by_rewind && record.spawn_step == Some(step + 1) {
                bodies.set_enabled(id, true);
                record.disabled_by_rewind = false;
            }
            record.chop_tail(earliest);
            idx += 1;
        }

        self.needs_save = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        body::Capability,
        config::RewindConfig,
        testing::StateStore,
    };

    fn posed(x: f32) -> BodyState {
        BodyState::default().with(Pose::at([x, 0.0, 0.0]))
    }

    fn tick(buffer: &mut HistoryBuffer<u32>, store: &mut StateStore) {
        buffer.advance_frame(store).unwrap();
        buffer.finish_frame();
    }

    /// Pushes `pose` as input for body `id` and applies it, like a host would.
    fn move_body(buffer: &mut HistoryBuffer<u32>, store: &mut StateStore, id: u32, x: f32) {
        buffer.push_external_input(&*store, id, &posed(x)).unwrap();
        store.apply(id, &posed(x));
    }

    #[test]
    fn test_rewind_restores_position_inside_window() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        let config = RewindConfig::default().with_capacity(4).with_start_step(10);
        let mut buffer = HistoryBuffer::new(config).unwrap();

        for step in 10..13 {
            move_body(&mut buffer, &mut store, 1, step as f32);
            tick(&mut buffer, &mut store);
        }
        assert_eq!(buffer.current_step(), 13);
        assert_eq!(buffer.earliest_retrievable_step(), 8);

        assert!(buffer.rewind_to_step(11, &mut store));
        assert_eq!(store.state(1).pose, Some(Pose::at([11.0, 0.0, 0.0])));
        assert_eq!(buffer.current_step(), 11);
        assert_eq!(buffer.latest_step(), 13);

        assert!(!buffer.rewind_to_step(7, &mut store));
        assert_eq!(buffer.current_step(), 11);
    }

    #[test]
    fn test_rejected_rewind_changes_nothing() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(4).unwrap();
        for _ in 0..3 {
            tick(&mut buffer, &mut store);
        }
        move_body(&mut buffer, &mut store, 1, 5.0);
        assert_eq!(buffer.saved_step_count(), 3);
        assert_eq!(buffer.earliest_retrievable_step(), -2);
        let writes = store.writes();

        assert_eq!(
            buffer.try_rewind_to_step(-3, &mut store),
            Err(RewindError::OutOfWindow {
                step: -3,
                earliest: -2
            })
        );
        assert_eq!(
            buffer.try_rewind_to_step(-2, &mut store),
            Err(RewindError::WouldEvict(-2))
        );
        assert_eq!(
            buffer.try_rewind_to_step(3, &mut store),
            Err(RewindError::NotInPast {
                target: 3,
                current: 3
            })
        );
        assert_eq!(buffer.current_step(), 3);
        assert_eq!(buffer.earliest_retrievable_step(), -2);
        assert_eq!(buffer.resim_state(), ResimState::Idle);
        assert!(buffer.needs_save());
        assert_eq!(store.writes(), writes);

        // once saved, the oldest step is a valid target again
        tick(&mut buffer, &mut store);
        let earliest = buffer.earliest_retrievable_step();
        assert!(buffer.try_rewind_to_step(earliest, &mut store).is_ok());
    }

    #[test]
    fn test_unchanged_properties_are_not_written_back() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        store.insert(2, Capability::fixed(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(8).unwrap();

        move_body(&mut buffer, &mut store, 1, 1.0);
        move_body(&mut buffer, &mut store, 2, 1.0);
        tick(&mut buffer, &mut store);
        move_body(&mut buffer, &mut store, 1, 2.0);
        tick(&mut buffer, &mut store);

        let writes = store.writes();
        let summary = buffer.try_rewind_to_step(0, &mut store).unwrap();
        assert_eq!(summary.restored, vec![1]);
        assert_eq!(summary.from, 2);
        assert_eq!(store.writes(), writes + 1);
        assert_eq!(store.state(1).pose, Some(Pose::at([1.0, 0.0, 0.0])));

        // the head was saved before restoring
        let head = buffer.past_state_at(1, 2, Phase::PostInput).unwrap().unwrap();
        assert_eq!(head.get::<Pose>(), Some(Pose::at([2.0, 0.0, 0.0])));
    }

    #[test]
    fn test_always_trust_restores_solver_values_only() {
        let mut store = StateStore::new();
        let start = posed(0.0)
            .with(Velocities::default())
            .with(KinematicTarget::default());
        store.insert(1, Capability::kinematic().always_trust(), start);
        let mut buffer = HistoryBuffer::with_capacity(8).unwrap();

        let first = posed(1.0).with(KinematicTarget {
            position: [1.0, 0.0, 0.0],
            ..Default::default()
        });
        buffer.push_external_input(&store, 1, &first).unwrap();
        store.apply(1, &first);
        tick(&mut buffer, &mut store);

        let moved_target = KinematicTarget {
            position: [5.0, 0.0, 0.0],
            ..Default::default()
        };
        let second = posed(3.0).with(moved_target);
        buffer.push_external_input(&store, 1, &second).unwrap();
        store.apply(1, &second);
        tick(&mut buffer, &mut store);

        assert!(buffer.rewind_to_step(0, &mut store));
        let live = store.state(1);
        assert_eq!(live.pose, Some(Pose::at([1.0, 0.0, 0.0])));
        assert_eq!(live.kinematic_target, Some(moved_target));
        // no head snapshot for bodies taken on faith
        assert_eq!(
            buffer.record(1).unwrap().history::<Pose>().unwrap().last_key(),
            Some(StepAndPhase::pre_input(1))
        );
    }

    #[test]
    fn test_rewind_before_spawn_disables_body() {
        let mut store = StateStore::new();
        store.insert(1, Capability::dynamic(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(8).unwrap();
        for _ in 0..3 {
            tick(&mut buffer, &mut store);
        }
        assert!(buffer.register_body(1, Capability::dynamic(), Some(3)));
        move_body(&mut buffer, &mut store, 1, 1.0);
        for _ in 0..3 {
            tick(&mut buffer, &mut store);
        }

        let summary = buffer.try_rewind_to_step(1, &mut store).unwrap();
        assert_eq!(summary.disabled, vec![1]);
        assert!(!store.is_enabled(1));

        tick(&mut buffer, &mut store);
        assert!(!store.is_enabled(1));
        // advancing step 2 makes the body live for step 3
        tick(&mut buffer, &mut store);
        assert!(store.is_enabled(1));
        assert_eq!(buffer.current_step(), 3);
    }

    #[test]
    fn test_window_stays_above_trimmed_history_after_rewind() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(4).unwrap();
        for step in 0..8 {
            let x = step as f32;
            move_body(&mut buffer, &mut store, 1, x);
            buffer
                .push_solver_result(&store, 1, &posed(x), &posed(x + 0.5))
                .unwrap();
            store.apply(1, &posed(x + 0.5));
            tick(&mut buffer, &mut store);
        }
        assert_eq!(buffer.earliest_retrievable_step(), 3);

        assert!(buffer.rewind_to_step(3, &mut store));
        assert_eq!(buffer.earliest_retrievable_step(), 3);
        tick(&mut buffer, &mut store);
        assert_eq!(buffer.current_step(), 4);

        let earliest = buffer.earliest_retrievable_step();
        assert_eq!(earliest, 3);
        let past = buffer
            .past_state_at(1, earliest, Phase::PostInput)
            .unwrap()
            .unwrap();
        assert_eq!(past.get::<Pose>(), Some(Pose::at([3.0, 0.0, 0.0])));
        assert!(buffer.past_state_at(1, earliest - 1, Phase::PostInput).is_err());
        assert!(!buffer.rewind_to_step(earliest - 1, &mut store));

        store.apply(1, &posed(40.0));
        assert!(buffer.rewind_to_step(earliest, &mut store));
        assert_eq!(store.state(1).pose, Some(Pose::at([3.0, 0.0, 0.0])));
    }

    #[test]
    fn test_clean_body_is_evicted_after_window() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        let capacity = 4;
        let mut buffer = HistoryBuffer::with_capacity(capacity).unwrap();
        for _ in 0..5 {
            tick(&mut buffer, &mut store);
        }
        assert_eq!(buffer.saved_step_count(), capacity - 1);

        move_body(&mut buffer, &mut store, 1, 1.0);
        tick(&mut buffer, &mut store);
        for _ in 0..capacity {
            tick(&mut buffer, &mut store);
            assert!(buffer.is_tracked(1));
        }
        tick(&mut buffer, &mut store);
        assert!(!buffer.is_tracked(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_histories_stay_bounded() {
        let mut store = StateStore::new();
        store.insert(1, Capability::fixed(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(4).unwrap();
        for step in 0..40 {
            move_body(&mut buffer, &mut store, 1, step as f32);
            tick(&mut buffer, &mut store);
        }
        let pose = buffer.record(1).unwrap().history::<Pose>().unwrap();
        assert!(pose.len() <= 6);
        let earliest = buffer.earliest_retrievable_step();
        let oldest = buffer.past_state_at(1, earliest, Phase::PostSolve).unwrap().unwrap();
        assert_eq!(oldest.get::<Pose>(), Some(Pose::at([earliest as f32, 0.0, 0.0])));
    }

    #[test]
    fn test_deferred_dynamics_recorded_on_advance() {
        let mut store = StateStore::new();
        store.insert(1, Capability::dynamic(), posed(0.0));
        let mut buffer = HistoryBuffer::with_capacity(8).unwrap();
        buffer.register_body(1, Capability::dynamic(), None);

        let impulse = Dynamics {
            linear_impulse: [0.0, 4.0, 0.0],
            ..Default::default()
        };
        buffer.defer_dynamics(1, impulse).unwrap();
        tick(&mut buffer, &mut store);

        let past = buffer.past_state_at(1, 0, Phase::PostInput).unwrap().unwrap();
        assert_eq!(past.get::<Dynamics>(), Some(impulse));
        assert!(buffer.past_state_at(1, 0, Phase::PreInput).unwrap().unwrap().get::<Dynamics>().is_none());
        assert!(buffer.record(1).unwrap().deferred_dynamics.is_none());
    }
}
