//! Docker implementation of [`ContainerEngine`] using bollard.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Encoder;
use tracing::{debug, info};
use uuid::Uuid;

use super::demux::{LogCodec, LogFrame, StreamKind};
use super::engine::{ContainerEngine, ContainerSpec, EngineError};

/// Seconds before a request to the Docker socket times out
const CONNECT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to `socket` when given, else to the platform default.
    pub fn connect(socket: Option<&str>) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::Unavailable(format!("Failed to connect to Docker: {e}")))?;

        info!(socket = socket.unwrap_or("default"), "Docker engine client initialized");
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }
}

fn container_err(id: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Container {
        id: id.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build_image(&self, context: Bytes, tag: &str) -> Result<(), EngineError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context));
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(EngineError::Build(error));
                    }
                    if let Some(line) = info.stream.as_deref().map(str::trim_end)
                        && !line.is_empty()
                    {
                        debug!(image = tag, "{line}");
                    }
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code,
                    message,
                }) if (400..500).contains(&status_code) => {
                    return Err(EngineError::Build(message));
                }
                Err(e) => return Err(EngineError::Unavailable(e.to_string())),
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let host_config = HostConfig {
            memory: spec.memory_limit_bytes,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(true),
            tty: Some(false),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("runbox-{}", Uuid::new_v4()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| container_err(&spec.image, e))?;

        debug!(container_id = %response.id, image = %spec.image, "Container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| container_err(id, e))
    }

    async fn write_stdin(&self, id: &str, data: Bytes) -> Result<(), EngineError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };

        let AttachContainerResults { mut input, .. } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| container_err(id, e))?;

        input
            .write_all(&data)
            .await
            .map_err(|e| container_err(id, e))?;
        input.shutdown().await.map_err(|e| container_err(id, e))?;

        debug!(container_id = id, size = data.len(), "Input written to stdin");
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));
        let mut status = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => status = Some(response.status_code),
                // bollard reports a non-zero exit as an error
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    status = Some(code)
                }
                Err(e) => return Err(container_err(id, e)),
            }
        }

        status.ok_or_else(|| container_err(id, "wait returned no status"))
    }

    async fn logs(&self, id: &str) -> Result<Bytes, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        // bollard already splits frames; re-encode them so the runner sees
        // the engine's wire format regardless of the client library.
        let mut codec = LogCodec;
        let mut raw = BytesMut::new();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(item) = stream.next().await {
            let frame = match item.map_err(|e| container_err(id, e))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    LogFrame::new(StreamKind::Stdout, message)
                }
                LogOutput::StdErr { message } => LogFrame::new(StreamKind::Stderr, message),
                LogOutput::StdIn { message } => LogFrame::new(StreamKind::Stdin, message),
            };
            codec
                .encode(frame, &mut raw)
                .map_err(|e| container_err(id, e))?;
        }

        Ok(raw.freeze())
    }

    async fn kill_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| container_err(id, e))
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| container_err(id, e))
    }

    async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
        self.docker
            .remove_image(
                tag,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Image {
                image: tag.to_string(),
                reason: e.to_string(),
            })
    }

    async fn image_exists(&self, tag: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::Image {
                image: tag.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
