//! Job use cases: submission, execution and recovery of stuck jobs.

pub mod reconcile;
pub mod run_job;
pub mod submit;

pub use reconcile::Sweeper;
pub use run_job::{RunJobError, RunJobHandler};
pub use submit::{JobSubmitter, SubmitError};

/// Exit status recorded when the sandbox itself failed (archive, build,
/// engine) or a job's lease expired.
pub const INFRA_FAILURE_STATUS: i64 = -1;

/// Exit status recorded when a successful run printed output that does not
/// match the output schema.
pub const OUTPUT_PARSE_FAILURE_STATUS: i64 = -2;
