//! Host stand-ins for tests.
use std::collections::{BTreeMap, HashMap};

use crate::{
    body::{BodyState, Capability, Pose, SimBodies, Velocities},
    buffer::HistoryBuffer,
    error::RewindError,
    step::Step,
    sync::driver::ResimHost,
};

#[derive(Debug, Clone)]
struct Body {
    capability: Capability,
    state: BodyState,
    enabled: bool,
}

fn apply(state: &mut BodyState, changes: &BodyState) {
    state.pose = changes.pose.or(state.pose);
    state.velocities = changes.velocities.or(state.velocities);
    state.kinematic_target = changes.kinematic_target.or(state.kinematic_target);
    state.dynamics = changes.dynamics.or(state.dynamics);
    state.dynamic_misc = changes.dynamic_misc.or(state.dynamic_misc);
    state.mass_props = changes.mass_props.or(state.mass_props);
}

/// Bodies whose state only changes when a test says so. Counts host writes.
#[derive(Debug, Default)]
pub(crate) struct StateStore {
    bodies: HashMap<u32, Body>,
    writes: usize,
}

impl StateStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: u32, capability: Capability, state: BodyState) {
        self.bodies.insert(
            id,
            Body {
                capability,
                state,
                enabled: true,
            },
        );
    }

    pub(crate) fn set_state(&mut self, id: u32, state: BodyState) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.state = state;
        }
    }

    /// Applies `changes` without counting it as a host write.
    pub(crate) fn apply(&mut self, id: u32, changes: &BodyState) {
        if let Some(body) = self.bodies.get_mut(&id) {
            apply(&mut body.state, changes);
        }
    }

    pub(crate) fn state(&self, id: u32) -> BodyState {
        self.bodies[&id].state
    }

    pub(crate) fn is_enabled(&self, id: u32) -> bool {
        self.bodies[&id].enabled
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes
    }
}

impl SimBodies for StateStore {
    type Id = u32;

    fn capability(&self, id: u32) -> Option<Capability> {
        self.bodies.get(&id).map(|body| body.capability)
    }

    fn read_state(&self, id: u32) -> Option<BodyState> {
        self.bodies.get(&id).map(|body| body.state)
    }

    fn write_state(&mut self, id: u32, state: &BodyState) {
        if let Some(body) = self.bodies.get_mut(&id) {
            apply(&mut body.state, state);
            self.writes += 1;
        }
    }

    fn set_enabled(&mut self, id: u32, enabled: bool) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.enabled = enabled;
        }
    }
}

/// Deterministic point-mass world: every step, scheduled velocity inputs are applied and
/// each moving body advances by its velocity.
#[derive(Debug, Default)]
pub(crate) struct ToyWorld {
    bodies: BTreeMap<u32, Body>,
    inputs: BTreeMap<(Step, u32), [f32; 3]>,
    divergence: HashMap<u32, [f32; 3]>,
    desynced_seen: Vec<(Step, Vec<u32>)>,
}

impl ToyWorld {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(&mut self, id: u32, capability: Capability, position: [f32; 3]) {
        let state = BodyState::default()
            .with(Pose::at(position))
            .with(Velocities::default());
        self.bodies.insert(
            id,
            Body {
                capability,
                state,
                enabled: true,
            },
        );
    }

    /// Schedules a linear velocity change for `id` at `step`, replacing any earlier one.
    pub(crate) fn input(&mut self, step: Step, id: u32, linear: [f32; 3]) {
        self.inputs.insert((step, id), linear);
    }

    /// Offsets `id`'s integration whenever the buffer is resimulating.
    pub(crate) fn diverge_on_resim(&mut self, id: u32, offset: [f32; 3]) {
        self.divergence.insert(id, offset);
    }

    pub(crate) fn pose(&self, id: u32) -> Pose {
        self.bodies[&id].state.pose.unwrap_or_default()
    }

    /// Non-empty desynced lists observed after each resimulated advance.
    pub(crate) fn desynced_seen(&self) -> &[(Step, Vec<u32>)] {
        &self.desynced_seen
    }

    fn integrate(&mut self, id: u32, resimulating: bool) -> Option<(BodyState, BodyState)> {
        let offset = self.divergence.get(&id).copied();
        let body = self.bodies.get_mut(&id)?;
        let post_input = body.state;
        let linear = post_input.velocities?.linear;
        if !body.enabled || linear == [0.0; 3] {
            return None;
        }
        let mut pose = post_input.pose?;
        for axis in 0..3 {
            pose.position[axis] += linear[axis];
            if let (true, Some(offset)) = (resimulating, offset) {
                pose.position[axis] += offset[axis];
            }
        }
        body.state.pose = Some(pose);
        Some((post_input, body.state))
    }
}

impl SimBodies for ToyWorld {
    type Id = u32;

    fn capability(&self, id: u32) -> Option<Capability> {
        self.bodies.get(&id).map(|body| body.capability)
    }

    fn read_state(&self, id: u32) -> Option<BodyState> {
        self.bodies.get(&id).map(|body| body.state)
    }

    fn write_state(&mut self, id: u32, state: &BodyState) {
        if let Some(body) = self.bodies.get_mut(&id) {
            apply(&mut body.state, state);
        }
    }

    fn set_enabled(&mut self, id: u32, enabled: bool) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.enabled = enabled;
        }
    }
}

impl ResimHost for ToyWorld {
    fn simulate_step(&mut self, history: &mut HistoryBuffer<u32>) -> Result<(), RewindError> {
        let step = history.current_step();
        let ids: Vec<u32> = self.bodies.keys().copied().collect();

        for &id in &ids {
            if let Some(&linear) = self.inputs.get(&(step, id)) {
                let changes = BodyState::default().with(Velocities::linear(linear));
                history.push_external_input(&*self, id, &changes)?;
                self.write_state(id, &changes);
            }
        }

        let resimulating = history.is_resimulating();
        for &id in &ids {
            if let Some((post_input, post_solve)) = self.integrate(id, resimulating) {
                history.push_solver_result(&*self, id, &post_input, &post_solve)?;
            }
        }

        history.advance_frame(self)?;
        if resimulating && !history.desynced_bodies().is_empty() {
            self.desynced_seen
                .push((step, history.desynced_bodies().to_vec()));
        }
        history.finish_frame();
        Ok(())
    }
}
