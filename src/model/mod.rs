//! Domain model: typed values, blueprints and the job state machine.
//!
//! Everything here is pure. Persistence, dispatch and execution live in
//! [`crate::ledger`], [`crate::dispatch`] and [`crate::runner`].

mod blueprint;
mod error;
mod job;
mod value;

pub use blueprint::{Blueprint, Visibility};
pub use error::{InvalidInput, JobError, OutputParseError};
pub use job::{Job, JobResult, JobState};
pub use value::{Field, Value, ValueError, ValueType};

#[cfg(test)]
pub(crate) use blueprint::tests::sum_blueprint;
