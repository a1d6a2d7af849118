//! Scheduling: cadence state, blackout windows, run admission

mod blackout;
mod scheduler;
mod target_state;

pub use blackout::BlackoutWindow;
pub use scheduler::{Admission, Scheduler};
pub use target_state::TargetState;
