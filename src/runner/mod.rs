//! Sandboxed execution of blueprint archives.
//!
//! [`Runner`] is the capability the job orchestration depends on.
//! [`ContainerRunner`] implements it over any [`ContainerEngine`];
//! [`DockerEngine`] is the production engine.

pub mod container;
pub mod demux;
pub mod docker;
pub mod engine;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::model::Value;

pub use container::ContainerRunner;
pub use demux::{DemuxError, Demuxed, LogCodec, LogFrame, StreamKind, demultiplex};
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerSpec, EngineError};

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The archive could not be built into an image
    #[error("build failed for {image}: {reason}")]
    Build { image: String, reason: String },

    /// The engine itself failed, unrelated to the sandboxed program
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("malformed container output: {0}")]
    Demux(#[from] DemuxError),
}

impl RunnerError {
    pub fn is_build_failure(&self) -> bool {
        matches!(self, RunnerError::Build { .. })
    }
}

/// What the sandboxed program produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_status: i64,
    /// Combined stdout and stderr in arrival order
    pub output: String,
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Build `archive` into an image tagged `image`.
    async fn build(&self, archive: Bytes, image: &str) -> Result<(), RunnerError>;

    /// Run `image` with `input` on stdin, one value per line.
    async fn run(&self, image: &str, input: &[Value]) -> Result<RunOutput, RunnerError>;

    /// Remove the image built for `image`.
    async fn cleanup(&self, image: &str) -> Result<(), RunnerError>;
}

/// Deterministic image identifier for a blueprint
pub fn image_tag(prefix: &str, blueprint_id: &str) -> String {
    format!("{prefix}/{blueprint_id}:latest")
}

/// Runner limits, resolved from configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub build_timeout: Duration,
    pub run_timeout: Duration,
    pub memory_limit_mb: u64,
    pub network_disabled: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            build_timeout: Duration::from_secs(600),
            run_timeout: Duration::from_secs(300),
            memory_limit_mb: 512,
            network_disabled: true,
        }
    }
}
