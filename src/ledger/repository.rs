use async_trait::async_trait;

use super::error::Result;
use crate::model::{Blueprint, Job, JobError, JobState};

/// Persistence port for jobs.
///
/// `update_job` is the only way to mutate a stored job: the implementation
/// loads the record, hands it to `f`, and writes it back only if `f`
/// succeeds, all while holding exclusive access to that job id. Updates to
/// different ids proceed independently.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn update_job<F>(&self, job_id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), JobError> + Send;

    async fn job(&self, job_id: &str) -> Result<Option<Job>>;

    /// All jobs owned by `owner_id`, newest first.
    async fn user_jobs(&self, owner_id: &str) -> Result<Vec<Job>>;

    async fn user_jobs_with_state(&self, owner_id: &str, state: JobState) -> Result<Vec<Job>>;
}

/// Persistence port for blueprints.
#[async_trait]
pub trait BlueprintRepository: Send + Sync {
    async fn save_blueprint(&self, blueprint: &Blueprint) -> Result<()>;

    /// Live blueprint by id; soft-deleted ones are reported as absent.
    async fn blueprint(&self, blueprint_id: &str) -> Result<Option<Blueprint>>;

    async fn soft_delete_blueprint(&self, blueprint_id: &str) -> Result<()>;
}
