//! Desync detection and the end-of-step bookkeeping that closes a resimulation.
use tracing::debug;

use crate::{
    body::{BodyId, BodyState, ReconciliationPolicy, SimBodies},
    buffer::HistoryBuffer,
    history::record::EntityHistoryRecord,
    step::StepAndPhase,
    sync::{ResimState, SyncState},
};

/// True when `live` disagrees with what `record` holds as of `key`.
pub(crate) fn diverges<Id>(
    record: &EntityHistoryRecord<Id>,
    live: &BodyState,
    key: StepAndPhase,
    include_dynamics: bool,
    skip_desync_test: bool,
) -> bool {
    !skip_desync_test && !record.is_in_sync(live, key, include_dynamics)
}

/// Flags `record` as diverged at `key` and discards its now stale future.
///
/// Input recorded for `key.step` is kept: it is replayed verbatim and remains valid.
pub(crate) fn hard_desync<Id: BodyId>(record: &mut EntityHistoryRecord<Id>, key: StepAndPhase) {
    record.clear_from(key.max(StepAndPhase::post_input(key.step)));
    record.sync_state = SyncState::HardDesync;
    debug!(id = ?record.id(), %key, "body desynced");
}

impl<Id: BodyId> HistoryBuffer<Id> {
    /// Compares `id`'s live state with its history at `key` and desyncs it on mismatch.
    ///
    /// Returns whether the body transitioned to `HardDesync`. Nothing happens outside a
    /// resimulation, for `AlwaysTrust` bodies, for bodies already desynced, or when the
    /// buffer is configured to skip the test.
    pub fn desync_if_necessary<B: SimBodies<Id = Id>>(
        &mut self,
        bodies: &B,
        id: Id,
        key: StepAndPhase,
    ) -> bool {
        if !self.is_resimulating() || self.config.skip_desync_test {
            return false;
        }
        let include_dynamics = self.is_final_resim();
        let Some(slot) = self.slot_of(id) else {
            return false;
        };
        let record = self.arena.get_mut(slot);
        if record.policy() == ReconciliationPolicy::AlwaysTrust
            || record.sync_state == SyncState::HardDesync
        {
            return false;
        }
        let Some(live) = bodies.read_state(id) else {
            return false;
        };
        if !diverges(record, &live, key, include_dynamics, false) {
            return false;
        }
        hard_desync(record, key);
        self.desynced.push(id);
        true
    }

    /// Closes the current step.
    ///
    /// Completing the final resimulation pass reconciles the buffer with the present:
    /// every body is back in sync, history recorded beyond this step in the abandoned
    /// timeline is dropped and the buffer returns to idle. Releases that came due are
    /// processed afterwards.
    pub fn finish_frame(&mut self) {
        if self.resim_state == ResimState::ResimulatingFinalPass {
            let step = self.current_step;
            for &(_, slot) in &self.entries {
                let record = self.arena.get_mut(slot);
                record.sync_state = SyncState::InSync;
                record.clear_from_step_onward(step + 1);
            }
            debug!(step, desynced = self.desynced.len(), "resimulation caught up");
            self.desynced.clear();
            self.resim_state = ResimState::Idle;
        }

        self.current_step += 1;
        if self.resim_state == ResimState::Resimulating && self.current_step + 1 == self.latest_step
        {
            self.resim_state = ResimState::ResimulatingFinalPass;
        }
        self.process_releases();
    }
}
