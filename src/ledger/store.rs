use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::keyed_lock::KeyedLocks;
use crate::model::{Blueprint, Job, JobError, JobState};

use super::error::{LedgerError, Result};
use super::partitions::{
    decode_owner_key, encode_box_key, encode_job_key, encode_meta_key, encode_owner_key,
    encode_owner_prefix,
};
use super::repository::{BlueprintRepository, JobRepository};

/// Fjall-backed persistent storage for jobs and blueprints
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    owner_jobs: PartitionHandle,
    boxes: PartitionHandle,
    metadata: PartitionHandle,
    job_locks: KeyedLocks,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let owner_jobs = keyspace.open_partition("owner_jobs", PartitionCreateOptions::default())?;
        let boxes = keyspace.open_partition("boxes", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            jobs,
            owner_jobs,
            boxes,
            metadata,
            job_locks: KeyedLocks::new(),
        })
    }

    fn load_job(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write_job(&self, job: &Job) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(encode_job_key(job.id()), value)?;
        Ok(())
    }

    fn jobs_of(&self, owner_id: &str) -> Result<Vec<Job>> {
        let prefix = encode_owner_prefix(owner_id);
        let mut jobs = Vec::new();

        for item in self.owner_jobs.prefix(&prefix).rev() {
            let (key, _) = item?;
            let Some(job_id) = decode_owner_key(&prefix, &key) else {
                continue;
            };
            if let Some(job) = self.load_job(&job_id)? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }

    /// Every job currently in `Running`
    pub fn running_jobs(&self) -> Result<Vec<Job>> {
        let mut running = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.state() == JobState::Running {
                running.push(job);
            }
        }
        Ok(running)
    }

    /// Jobs in `Running` whose start time is at or before `cutoff`
    pub fn running_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self
            .running_jobs()?
            .into_iter()
            .filter(|job| job.started_at().is_some_and(|started| started <= cutoff))
            .collect())
    }

    /// Record a metadata value (e.g. last sweep time)
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.metadata.insert(encode_meta_key(key), value.as_bytes())?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .metadata
            .get(encode_meta_key(key))?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace answers reads
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key("health"))?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut job_count = 0;
        let mut blueprint_count = 0;

        for item in self.jobs.iter() {
            item?;
            job_count += 1;
        }

        for item in self.boxes.iter() {
            item?;
            blueprint_count += 1;
        }

        Ok(StoreStats {
            job_count,
            blueprint_count,
        })
    }
}

#[async_trait]
impl JobRepository for FjallStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let value = serde_json::to_vec(job)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, encode_job_key(job.id()), value);
        batch.insert(
            &self.owner_jobs,
            encode_owner_key(job.owner_id(), job.id()),
            b"",
        );
        batch.commit()?;

        debug!(job_id = %job.id(), owner_id = %job.owner_id(), "Saved job");
        Ok(())
    }

    async fn update_job<F>(&self, job_id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), JobError> + Send,
    {
        let _guard = self.job_locks.lock(job_id).await;

        let mut job = self
            .load_job(job_id)?
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))?;

        f(&mut job)?;
        self.write_job(&job)?;

        debug!(job_id, state = %job.state(), "Updated job");
        Ok(job)
    }

    async fn job(&self, job_id: &str) -> Result<Option<Job>> {
        self.load_job(job_id)
    }

    async fn user_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        self.jobs_of(owner_id)
    }

    async fn user_jobs_with_state(&self, owner_id: &str, state: JobState) -> Result<Vec<Job>> {
        let mut jobs = self.jobs_of(owner_id)?;
        jobs.retain(|job| job.state() == state);
        Ok(jobs)
    }
}

#[async_trait]
impl BlueprintRepository for FjallStore {
    async fn save_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        let value = serde_json::to_vec(blueprint)?;
        self.boxes.insert(encode_box_key(blueprint.id()), value)?;
        debug!(blueprint_id = %blueprint.id(), "Saved blueprint");
        Ok(())
    }

    async fn blueprint(&self, blueprint_id: &str) -> Result<Option<Blueprint>> {
        match self.boxes.get(encode_box_key(blueprint_id))? {
            Some(value) => {
                let blueprint: Blueprint = serde_json::from_slice(&value)?;
                Ok((!blueprint.is_deleted()).then_some(blueprint))
            }
            None => Ok(None),
        }
    }

    async fn soft_delete_blueprint(&self, blueprint_id: &str) -> Result<()> {
        let key = encode_box_key(blueprint_id);
        let value = self
            .boxes
            .get(&key)?
            .ok_or_else(|| LedgerError::BlueprintNotFound(blueprint_id.to_string()))?;

        let mut blueprint: Blueprint = serde_json::from_slice(&value)?;
        blueprint.soft_delete();
        self.boxes.insert(key, serde_json::to_vec(&blueprint)?)?;

        info!(blueprint_id, "Soft-deleted blueprint");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub job_count: usize,
    pub blueprint_count: usize,
}
