//! Bounded, step-indexed history of rigid-body state for rollback physics.
//!
//! A [`HistoryBuffer`] records what each body looked like at every step it changed,
//! rewinds the live bodies to any step inside its retained window, and tracks which
//! bodies diverge from the recorded timeline while the host resimulates forward.
//!
//! Per tick the host calls, in order: [`HistoryBuffer::push_external_input`] for changed
//! bodies, runs its solver, [`HistoryBuffer::push_solver_result`] for moved bodies, then
//! [`HistoryBuffer::advance_frame`] and [`HistoryBuffer::finish_frame`].
pub mod body;
pub mod buffer;
pub mod config;
pub mod error;
pub mod history;
pub mod scheduling;
pub mod step;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use body::{BodyId, BodyKind, BodyState, Capability, Property, ReconciliationPolicy, SimBodies};
pub use buffer::{HistoryBuffer, PastState};
pub use config::RewindConfig;
pub use error::RewindError;
pub use step::{Phase, Step, StepAndPhase};
pub use sync::{
    driver::{ResimHost, RewindCallback},
    rewind::RewindSummary,
    ResimState, SyncState,
};
