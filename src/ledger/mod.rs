/// Fjall-based persistence layer for jobs and blueprints
///
/// The ledger is the single source of truth for job state. Workers never
/// write a job directly; every transition goes through
/// [`JobRepository::update_job`], which serializes read-modify-write cycles
/// per job id.
///
/// Partitions:
///
/// - `jobs`: job records by id
/// - `owner_jobs`: `owner:{uid}:{job_id}` index for per-user listing
/// - `boxes`: blueprints by id (soft-deleted ones stay on disk)
/// - `metadata`: housekeeping values such as the last sweep time
///
/// ## Usage
///
/// ```rust,ignore
/// use runbox::ledger::{FjallStore, JobRepository};
///
/// let store = FjallStore::open("data/ledger")?;
/// store.save_job(&job).await?;
/// let job = store.update_job(job.id(), |job| job.run()).await?;
/// ```
pub mod error;
pub mod partitions;
pub mod repository;
pub mod store;

pub use error::{LedgerError, Result};
pub use repository::{BlueprintRepository, JobRepository};
pub use store::{FjallStore, StoreStats};
