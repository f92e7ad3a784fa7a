//! Per-body bundle of property histories.
use crate::{
    body::{
        BodyState, Capability, DynamicMisc, Dynamics, KinematicTarget, MassProps, Pose, Property,
        ReconciliationPolicy, Velocities,
    },
    error::RewindError,
    history::property::PropertyHistory,
    step::{Phase, Step, StepAndPhase},
    sync::SyncState,
};

macro_rules! each_history {
    ($record:expr, $h:ident => $body:expr) => {{
        if let Some($h) = $record.pose.as_mut() {
            $body;
        }
        if let Some($h) = $record.velocities.as_mut() {
            $body;
        }
        if let Some($h) = $record.kinematic_target.as_mut() {
            $body;
        }
        if let Some($h) = $record.dynamics.as_mut() {
            $body;
        }
        if let Some($h) = $record.dynamic_misc.as_mut() {
            $body;
        }
        if let Some($h) = $record.mass_props.as_mut() {
            $body;
        }
    }};
}

fn reuse<T>(slot: &mut Option<PropertyHistory<T>>, wanted: bool) {
    match (slot.as_mut(), wanted) {
        (Some(history), true) => history.clear(),
        (None, true) => *slot = Some(PropertyHistory::new()),
        (_, false) => *slot = None,
    }
}

/// History of one simulated body.
///
/// Which property histories exist is decided by the body's [`Capability`] when the record
/// is created and never changes afterwards.
#[derive(Debug, Clone)]
pub struct EntityHistoryRecord<Id> {
    pub(crate) id: Id,
    pub(crate) capability: Capability,
    pub(crate) spawn_step: Option<Step>,
    pub(crate) last_dirty_step: Step,
    pub(crate) sync_state: SyncState,
    pub(crate) deferred_dynamics: Option<Dynamics>,
    pub(crate) disabled_by_rewind: bool,
    pub(crate) pose: Option<PropertyHistory<Pose>>,
    pub(crate) velocities: Option<PropertyHistory<Velocities>>,
    pub(crate) kinematic_target: Option<PropertyHistory<KinematicTarget>>,
    pub(crate) dynamics: Option<PropertyHistory<Dynamics>>,
    pub(crate) dynamic_misc: Option<PropertyHistory<DynamicMisc>>,
    pub(crate) mass_props: Option<PropertyHistory<MassProps>>,
}

impl<Id> EntityHistoryRecord<Id> {
    pub fn new(id: Id, capability: Capability, spawn_step: Option<Step>, step: Step) -> Self {
        let mut record = Self {
            id,
            capability,
            spawn_step,
            last_dirty_step: step,
            sync_state: SyncState::InSync,
            deferred_dynamics: None,
            disabled_by_rewind: false,
            pose: None,
            velocities: None,
            kinematic_target: None,
            dynamics: None,
            dynamic_misc: None,
            mass_props: None,
        };
        record.allocate();
        record
    }

    /// Re-targets a recycled record at a new body, keeping the history allocations it can.
    pub(crate) fn reinit(
        &mut self,
        id: Id,
        capability: Capability,
        spawn_step: Option<Step>,
        step: Step,
    ) {
        self.id = id;
        self.capability = capability;
        self.spawn_step = spawn_step;
        self.last_dirty_step = step;
        self.sync_state = SyncState::InSync;
        self.deferred_dynamics = None;
        self.disabled_by_rewind = false;
        self.allocate();
    }

    fn allocate(&mut self) {
        let cap = self.capability;
        reuse(&mut self.pose, true);
        reuse(&mut self.velocities, cap.has_velocities());
        reuse(&mut self.kinematic_target, cap.has_kinematic_target());
        reuse(&mut self.dynamics, cap.has_dynamics());
        reuse(&mut self.dynamic_misc, cap.has_dynamics());
        reuse(&mut self.mass_props, cap.has_dynamics());
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn policy(&self) -> ReconciliationPolicy {
        self.capability.policy
    }

    pub fn spawn_step(&self) -> Option<Step> {
        self.spawn_step
    }

    pub fn last_dirty_step(&self) -> Step {
        self.last_dirty_step
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn history<P: Property>(&self) -> Option<&PropertyHistory<P>> {
        P::history(self)
    }

    /// True when no property has a single entry.
    pub fn is_empty(&self) -> bool {
        fn empty<T>(history: &Option<PropertyHistory<T>>) -> bool {
            history.as_ref().map_or(true, PropertyHistory::is_empty)
        }
        empty(&self.pose)
            && empty(&self.velocities)
            && empty(&self.kinematic_target)
            && empty(&self.dynamics)
            && empty(&self.dynamic_misc)
            && empty(&self.mass_props)
    }

    fn property_in_sync<P: Property>(&self, live: &BodyState, key: StepAndPhase) -> bool {
        match (P::history(self), P::get(live)) {
            (Some(history), Some(value)) => history.is_in_sync_bitwise(&value, key),
            _ => true,
        }
    }

    /// Whether every supplied live value matches what was recorded as of `key`.
    ///
    /// `Dynamics` is solver-derived and only compared when `include_dynamics` is set.
    pub fn is_in_sync(&self, live: &BodyState, key: StepAndPhase, include_dynamics: bool) -> bool {
        self.property_in_sync::<Pose>(live, key)
            && self.property_in_sync::<Velocities>(live, key)
            && self.property_in_sync::<KinematicTarget>(live, key)
            && self.property_in_sync::<DynamicMisc>(live, key)
            && self.property_in_sync::<MassProps>(live, key)
            && (!include_dynamics || self.property_in_sync::<Dynamics>(live, key))
    }

    /// Everything recorded as of `key`.
    pub fn snapshot_at(&self, key: StepAndPhase) -> BodyState {
        fn read<P: Property, Id>(record: &EntityHistoryRecord<Id>, key: StepAndPhase) -> Option<P> {
            P::history(record).and_then(|h| h.read(key).copied())
        }
        BodyState {
            pose: read(self, key),
            velocities: read(self, key),
            kinematic_target: read(self, key),
            dynamics: read(self, key),
            dynamic_misc: read(self, key),
            mass_props: read(self, key),
        }
    }

    /// Mutable view for batched writes within `step`.
    pub fn add_or_get_step_entry(&mut self, step: Step) -> StepEntry<'_, Id> {
        StepEntry { record: self, step }
    }

    /// Records the pre-change value of every property `changed` sets whose history is
    /// still empty, so a later rewind can restore what the body looked like before it
    /// first went dirty.
    pub(crate) fn seed(
        &mut self,
        key: StepAndPhase,
        changed: &BodyState,
        source: &BodyState,
    ) -> Result<(), RewindError> {
        self.seed_property::<Pose>(key, changed, source)?;
        self.seed_property::<Velocities>(key, changed, source)?;
        self.seed_property::<KinematicTarget>(key, changed, source)?;
        self.seed_property::<Dynamics>(key, changed, source)?;
        self.seed_property::<DynamicMisc>(key, changed, source)?;
        self.seed_property::<MassProps>(key, changed, source)
    }

    fn seed_property<P: Property>(
        &mut self,
        key: StepAndPhase,
        changed: &BodyState,
        source: &BodyState,
    ) -> Result<(), RewindError> {
        if P::get(changed).is_none() {
            return Ok(());
        }
        if let (Some(history), Some(value)) = (P::history_mut(self), P::get(source)) {
            if history.is_empty() {
                history.write_monotonic(key, value)?;
            }
        }
        Ok(())
    }

    pub fn clear_from_step_onward(&mut self, step: Step) {
        each_history!(self, h => h.clear_from_step_onward(step));
    }

    /// Drops every entry at or after `key` in all histories.
    pub fn clear_from(&mut self, key: StepAndPhase) {
        each_history!(self, h => h.clear_from(key));
    }

    pub fn chop_tail(&mut self, horizon: Step) {
        each_history!(self, h => h.chop_tail(horizon));
    }

    pub(crate) fn clear(&mut self) {
        each_history!(self, h => h.clear());
        self.deferred_dynamics = None;
        self.disabled_by_rewind = false;
        self.sync_state = SyncState::InSync;
    }
}

/// Batched writer for one step of one record.
pub struct StepEntry<'a, Id> {
    record: &'a mut EntityHistoryRecord<Id>,
    step: Step,
}

impl<Id> StepEntry<'_, Id> {
    pub fn step(&self) -> Step {
        self.step
    }

    /// Records `value` at `(step, phase)`. Returns false when the body does not carry the
    /// property or newer history already covers the key.
    pub fn write_property<P: Property>(
        &mut self,
        phase: Phase,
        value: P,
    ) -> Result<bool, RewindError> {
        let key = StepAndPhase::new(self.step, phase);
        let Some(history) = P::history_mut(self.record) else {
            return Ok(false);
        };
        let written = history.record(key, value)?;
        if written {
            self.record.last_dirty_step = self.record.last_dirty_step.max(self.step);
        }
        Ok(written)
    }

    fn write_opt<P: Property>(&mut self, phase: Phase, value: Option<P>) -> Result<bool, RewindError> {
        match value {
            Some(value) => self.write_property(phase, value),
            None => Ok(false),
        }
    }

    /// Records every property `state` sets. Returns whether anything was stored.
    pub fn write(&mut self, phase: Phase, state: &BodyState) -> Result<bool, RewindError> {
        let mut written = self.write_opt(phase, state.pose)?;
        written |= self.write_opt(phase, state.velocities)?;
        written |= self.write_opt(phase, state.kinematic_target)?;
        written |= self.write_opt(phase, state.dynamics)?;
        written |= self.write_opt(phase, state.dynamic_misc)?;
        written |= self.write_opt(phase, state.mass_props)?;
        Ok(written)
    }
}
