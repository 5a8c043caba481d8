//! Container engine capability set.
//!
//! The runner depends on these operations only, never on an engine SDK.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine unreachable or the request failed in transport
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    /// The engine rejected the build context or a build step failed
    #[error("image build failed: {0}")]
    Build(String),

    #[error("container {id}: {reason}")]
    Container { id: String, reason: String },

    #[error("image {image}: {reason}")]
    Image { image: String, reason: String },
}

/// Container settings derived from runner configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub memory_limit_bytes: Option<i64>,
    pub network_disabled: bool,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build `context` (a tar archive) and tag the result `tag`.
    async fn build_image(&self, context: Bytes, tag: &str) -> Result<(), EngineError>;

    /// Create a container with interactive stdin; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Attach, write `data` to stdin and close it.
    async fn write_stdin(&self, id: &str, data: Bytes) -> Result<(), EngineError>;

    /// Block until the container stops; returns its exit status.
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    /// Raw multiplexed stdout/stderr stream, see [`super::demux`].
    async fn logs(&self, id: &str) -> Result<Bytes, EngineError>;

    async fn kill_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_image(&self, tag: &str) -> Result<(), EngineError>;

    /// Whether an image tagged `tag` is present on the engine.
    async fn image_exists(&self, tag: &str) -> Result<bool, EngineError>;
}
