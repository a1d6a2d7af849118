//! Crawl execution: the engine loop, per-run jobs, and the pagination walk
//!
//! The engine admits due targets through the scheduler and spawns one job
//! per admission. A job walks its target's listing pages, enriches and
//! records new items, and notifies. The walker is the small pure state
//! machine deciding when a walk ends.

mod engine;
mod job;
mod walker;

pub use engine::{run_daemon, Engine};
pub use job::{run_job, JobReport, RunContext, RunOutcome};
pub use walker::{PaginationWalker, StopReason, WalkDecision};
