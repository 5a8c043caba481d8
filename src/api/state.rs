use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::JobPublisher;
use crate::ledger::FjallStore;
use crate::observability::Metrics;
use crate::service::JobSubmitter;
use crate::storage::ArchiveStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<FjallStore>,
    pub archives: ArchiveStore,
    pub submitter: Arc<JobSubmitter<FjallStore>>,
    pub publisher: JobPublisher,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<FjallStore>,
        archives: ArchiveStore,
        publisher: JobPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        let submitter = JobSubmitter::new(store.clone(), publisher.clone(), metrics.clone());
        Self {
            config: Arc::new(config),
            store,
            archives,
            submitter: Arc::new(submitter),
            publisher,
            metrics,
        }
    }
}
