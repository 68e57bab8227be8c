//! Market research persistence
//!
//! Functions that run inside a service transaction take a generic executor;
//! read-only API queries take the pool.

pub mod competitors;
pub mod job_runs;
pub mod snapshots;
