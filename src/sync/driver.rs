//! Host-facing rewind loop: ask whether a correction arrived, rewind, replay up to the present.
use tracing::{debug, warn};

use crate::{
    body::{BodyId, SimBodies},
    buffer::HistoryBuffer,
    error::RewindError,
    step::Step,
};

/// Application hooks around a resimulation.
pub trait RewindCallback {
    /// Called once per tick while idle with the last completed step. Returning a step
    /// requests a rewind to it.
    fn trigger_rewind_if_needed(&mut self, last_step: Step) -> Option<Step>;

    /// Before each replayed step; `first` is set for the rewind target itself.
    fn pre_resim_step(&mut self, _step: Step, _first: bool) {}

    fn post_resim_step(&mut self, _step: Step) {}
}

/// A simulation that can run one complete tick against a history buffer.
pub trait ResimHost: SimBodies {
    /// Runs the step at `history.current_step()`: input pushes, the solve and its result
    /// pushes, then `advance_frame` and `finish_frame`.
    fn simulate_step(&mut self, history: &mut HistoryBuffer<Self::Id>) -> Result<(), RewindError>;
}

impl<Id: BodyId> HistoryBuffer<Id> {
    /// Rewinds and resimulates back up to the present when `callback` asks for it.
    ///
    /// Returns the step rewound to, or `None` when no rewind happened. A target the
    /// buffer cannot honour is logged and ignored, so the simulation carries on from the
    /// present.
    pub fn conditional_apply_rewind<H, C>(
        &mut self,
        host: &mut H,
        callback: &mut C,
    ) -> Result<Option<Step>, RewindError>
    where
        H: ResimHost<Id = Id>,
        C: RewindCallback,
    {
        if self.is_resimulating() {
            return Ok(None);
        }
        let last_step = self.current_step - 1;
        let Some(target) = callback.trigger_rewind_if_needed(last_step) else {
            return Ok(None);
        };
        if let Err(error) = self.try_rewind_to_step(target, &mut *host) {
            warn!(target, last_step, %error, "requested rewind ignored");
            return Ok(None);
        }

        for step in target..=last_step {
            callback.pre_resim_step(step, step == target);
            host.simulate_step(self)?;
            callback.post_resim_step(step);
        }
        debug!(target, last_step, state = %self.resim_state, "resimulation replayed");
        Ok(Some(target))
    }
}
