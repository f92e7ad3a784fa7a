//! Storage for recorded body state.
//!
//! Histories are sparse logs of `bytemuck::Pod` values keyed by `StepAndPhase`, grouped
//! per body and kept in a slot arena, all aiming to minimize runtime allocations and
//! unnecessary cloning while a simulation rewinds and replays.

pub mod arena;
pub mod property;
pub mod record;
