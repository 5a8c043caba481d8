use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::demux::demultiplex;
use super::engine::{ContainerEngine, ContainerSpec, EngineError};
use super::{RunOutput, Runner, RunnerError, RunnerSettings};
use crate::keyed_lock::KeyedLocks;
use crate::model::Value;

/// [`Runner`] over a container engine
///
/// Builds of one tag are serialized. A tag that is already built and in use
/// by another job is reused instead of rebuilt, and `cleanup` only removes
/// the image once its last user is done with it.
///
/// The build timeout bounds the whole `build` call, including the wait
/// behind another build of the same tag. Callers that were waiting while
/// that build failed get its error instead of building again.
pub struct ContainerRunner<E> {
    engine: Arc<E>,
    settings: RunnerSettings,
    image_locks: KeyedLocks,
    images: Mutex<HashMap<String, ImageState>>,
}

#[derive(Debug, Default)]
struct ImageState {
    users: usize,
    /// Most recent build failure and when it happened
    failure: Option<(Instant, String)>,
}

impl<E: ContainerEngine> ContainerRunner<E> {
    pub fn new(engine: Arc<E>, settings: RunnerSettings) -> Self {
        Self {
            engine,
            settings,
            image_locks: KeyedLocks::new(),
            images: Mutex::new(HashMap::new()),
        }
    }

    fn images(&self) -> std::sync::MutexGuard<'_, HashMap<String, ImageState>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build failure recorded after `since`, if any
    fn failed_since(&self, image: &str, since: Instant) -> Option<String> {
        self.images()
            .get(image)
            .and_then(|state| state.failure.as_ref())
            .filter(|(at, _)| *at >= since)
            .map(|(_, reason)| reason.clone())
    }

    fn users_of(&self, image: &str) -> usize {
        self.images().get(image).map_or(0, |state| state.users)
    }

    fn add_user(&self, image: &str) -> usize {
        let mut images = self.images();
        let state = images.entry(image.to_string()).or_default();
        state.users += 1;
        state.failure = None;
        state.users
    }

    fn record_failure(&self, image: &str, reason: &str) {
        let mut images = self.images();
        let state = images.entry(image.to_string()).or_default();
        state.failure = Some((Instant::now(), reason.to_string()));
    }

    /// Lock the tag, then reuse, share a failure or build.
    async fn build_exclusive(
        &self,
        archive: Bytes,
        image: &str,
        requested: Instant,
    ) -> Result<(), RunnerError> {
        let _guard = self.image_locks.lock(image).await;

        if let Some(reason) = self.failed_since(image, requested) {
            debug!(image, "Build failed while waiting, sharing its error");
            return Err(RunnerError::Build {
                image: image.to_string(),
                reason,
            });
        }

        if self.users_of(image) > 0 {
            if self.engine.image_exists(image).await? {
                let users = self.add_user(image);
                debug!(image, users, "Image already built, reusing");
                return Ok(());
            }
            warn!(image, "Image in use but gone from the engine, rebuilding");
        }

        info!(image, size = archive.len(), "Building image");
        match self.engine.build_image(archive, image).await {
            Ok(()) => {}
            Err(EngineError::Build(reason)) => {
                self.record_failure(image, &reason);
                return Err(RunnerError::Build {
                    image: image.to_string(),
                    reason,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let users = self.add_user(image);
        info!(image, users, "Image built");
        Ok(())
    }

    fn container_spec(&self, image: &str) -> ContainerSpec {
        let memory = self.settings.memory_limit_mb.saturating_mul(1024 * 1024);
        ContainerSpec {
            image: image.to_string(),
            memory_limit_bytes: i64::try_from(memory).ok(),
            network_disabled: self.settings.network_disabled,
        }
    }

    /// Start, feed stdin and wait, bounded by the run timeout; then collect logs.
    async fn execute(&self, id: &str, stdin: Bytes) -> Result<RunOutput, RunnerError> {
        let run = async {
            self.engine.start_container(id).await?;
            self.engine.write_stdin(id, stdin).await?;
            self.engine.wait_container(id).await
        };

        let exit_status = match timeout(self.settings.run_timeout, run).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = self.engine.kill_container(id).await {
                    warn!(container_id = id, error = %e, "Failed to kill timed out container");
                }
                return Err(RunnerError::Timeout {
                    stage: "run",
                    after: self.settings.run_timeout,
                });
            }
        };

        let raw = self.engine.logs(id).await?;
        let demuxed = demultiplex(&raw)?;

        Ok(RunOutput {
            exit_status,
            output: demuxed.combined_text(),
        })
    }
}

/// Input values, one per line
fn stdin_payload(input: &[Value]) -> Bytes {
    let mut payload = String::new();
    for value in input {
        payload.push_str(value.text());
        payload.push('\n');
    }
    Bytes::from(payload)
}

#[async_trait]
impl<E: ContainerEngine + 'static> Runner for ContainerRunner<E> {
    async fn build(&self, archive: Bytes, image: &str) -> Result<(), RunnerError> {
        let requested = Instant::now();
        match timeout(
            self.settings.build_timeout,
            self.build_exclusive(archive, image, requested),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Timeout {
                stage: "build",
                after: self.settings.build_timeout,
            }),
        }
    }

    async fn run(&self, image: &str, input: &[Value]) -> Result<RunOutput, RunnerError> {
        let id = self
            .engine
            .create_container(&self.container_spec(image))
            .await?;
        debug!(image, container_id = %id, "Running container");

        let result = self.execute(&id, stdin_payload(input)).await;

        if let Err(e) = self.engine.remove_container(&id).await {
            warn!(container_id = %id, error = %e, "Failed to remove container");
        }

        if let Ok(output) = &result {
            info!(image, exit_status = output.exit_status, "Container exited");
        }
        result
    }

    async fn cleanup(&self, image: &str) -> Result<(), RunnerError> {
        let _guard = self.image_locks.lock(image).await;

        let remaining = {
            let mut images = self.images();
            match images.get_mut(image) {
                Some(state) if state.users > 1 => {
                    state.users -= 1;
                    Some(state.users)
                }
                _ => {
                    images.remove(image);
                    None
                }
            }
        };

        if let Some(remaining) = remaining {
            debug!(image, remaining, "Image still in use, keeping it");
            return Ok(());
        }

        self.engine.remove_image(image).await?;
        info!(image, "Image removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::demux::{LogCodec, LogFrame, StreamKind};
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_util::codec::Encoder;

    #[derive(Default)]
    struct FakeEngine {
        calls: Mutex<Vec<String>>,
        stdin: Mutex<Vec<u8>>,
        build_error: Option<fn() -> EngineError>,
        build_delay: Duration,
        wait_delay: Duration,
        exit_status: i64,
        frames: Vec<(StreamKind, &'static str)>,
        truncate_logs: bool,
        pruned: AtomicBool,
    }

    impl FakeEngine {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn build_image(&self, _context: Bytes, tag: &str) -> Result<(), EngineError> {
            self.record(format!("build:{tag}"));
            tokio::time::sleep(self.build_delay).await;
            match self.build_error {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
            self.record(format!("create:{}", spec.image));
            Ok("c1".to_string())
        }

        async fn start_container(&self, id: &str) -> Result<(), EngineError> {
            self.record(format!("start:{id}"));
            Ok(())
        }

        async fn write_stdin(&self, id: &str, data: Bytes) -> Result<(), EngineError> {
            self.record(format!("stdin:{id}"));
            self.stdin.lock().unwrap().extend_from_slice(&data);
            Ok(())
        }

        async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
            self.record(format!("wait:{id}"));
            tokio::time::sleep(self.wait_delay).await;
            Ok(self.exit_status)
        }

        async fn logs(&self, id: &str) -> Result<Bytes, EngineError> {
            self.record(format!("logs:{id}"));
            let mut raw = BytesMut::new();
            for (stream, payload) in &self.frames {
                LogCodec
                    .encode(LogFrame::new(*stream, payload.as_bytes()), &mut raw)
                    .unwrap();
            }
            if self.truncate_logs {
                raw.truncate(raw.len() - 1);
            }
            Ok(raw.freeze())
        }

        async fn kill_container(&self, id: &str) -> Result<(), EngineError> {
            self.record(format!("kill:{id}"));
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
            self.record(format!("remove:{id}"));
            Ok(())
        }

        async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
            self.record(format!("rmi:{tag}"));
            Ok(())
        }

        async fn image_exists(&self, tag: &str) -> Result<bool, EngineError> {
            self.record(format!("inspect:{tag}"));
            Ok(!self.pruned.load(Ordering::SeqCst))
        }
    }

    fn runner(engine: FakeEngine) -> (ContainerRunner<FakeEngine>, Arc<FakeEngine>) {
        let engine = Arc::new(engine);
        let settings = RunnerSettings {
            build_timeout: Duration::from_millis(200),
            run_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        (ContainerRunner::new(engine.clone(), settings), engine)
    }

    #[tokio::test]
    async fn test_run_feeds_stdin_and_demuxes_output() {
        let (runner, engine) = runner(FakeEngine {
            frames: vec![
                (StreamKind::Stdout, "3\n"),
                (StreamKind::Stderr, "note: done\n"),
            ],
            ..Default::default()
        });

        let input = vec![Value::integer(1), Value::integer(2)];
        let output = runner.run("runbox/bp:latest", &input).await.unwrap();

        assert_eq!(output.exit_status, 0);
        assert_eq!(output.output, "3\nnote: done\n");
        assert_eq!(engine.stdin.lock().unwrap().as_slice(), b"1\n2\n");
        assert_eq!(
            engine.calls(),
            vec![
                "create:runbox/bp:latest",
                "start:c1",
                "stdin:c1",
                "wait:c1",
                "logs:c1",
                "remove:c1"
            ]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let (runner, _engine) = runner(FakeEngine {
            exit_status: 2,
            frames: vec![(StreamKind::Stderr, "Traceback\n")],
            ..Default::default()
        });

        let output = runner.run("img", &[]).await.unwrap();
        assert_eq!(output.exit_status, 2);
        assert_eq!(output.output, "Traceback\n");
    }

    #[tokio::test]
    async fn test_build_failure_is_distinguishable() {
        let (runner, _engine) = runner(FakeEngine {
            build_error: Some(|| EngineError::Build("no Dockerfile".into())),
            ..Default::default()
        });

        let err = runner.build(Bytes::from_static(b"tar"), "img").await.unwrap_err();
        assert!(err.is_build_failure());
    }

    #[tokio::test]
    async fn test_engine_failure_during_build() {
        let (runner, _engine) = runner(FakeEngine {
            build_error: Some(|| EngineError::Unavailable("socket gone".into())),
            ..Default::default()
        });

        let err = runner.build(Bytes::from_static(b"tar"), "img").await.unwrap_err();
        assert!(matches!(err, RunnerError::Engine(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_and_removes() {
        let (runner, engine) = runner(FakeEngine {
            wait_delay: Duration::from_secs(5),
            ..Default::default()
        });

        let err = runner.run("img", &[]).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { stage: "run", .. }));
        assert_eq!(engine.count("kill:"), 1);
        assert_eq!(engine.count("remove:"), 1);
        assert_eq!(engine.count("logs:"), 0);
    }

    #[tokio::test]
    async fn test_truncated_logs_still_remove_container() {
        let (runner, engine) = runner(FakeEngine {
            frames: vec![(StreamKind::Stdout, "3\n")],
            truncate_logs: true,
            ..Default::default()
        });

        let err = runner.run("img", &[]).await.unwrap_err();
        assert!(matches!(err, RunnerError::Demux(_)));
        assert_eq!(engine.count("remove:"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_builds_of_one_tag_build_once() {
        let (runner, engine) = runner(FakeEngine {
            build_delay: Duration::from_millis(20),
            ..Default::default()
        });
        let runner = Arc::new(runner);

        let a = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.build(Bytes::from_static(b"t"), "img").await })
        };
        let b = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.build(Bytes::from_static(b"t"), "img").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(engine.count("build:"), 1);

        // First cleanup keeps the image for the second user
        runner.cleanup("img").await.unwrap();
        assert_eq!(engine.count("rmi:"), 0);
        runner.cleanup("img").await.unwrap();
        assert_eq!(engine.count("rmi:"), 1);

        // Once removed, the next build goes to the engine again
        runner.build(Bytes::from_static(b"t"), "img").await.unwrap();
        assert_eq!(engine.count("build:"), 2);
    }

    #[tokio::test]
    async fn test_build_timeout() {
        let (runner, _engine) = runner(FakeEngine {
            build_delay: Duration::from_secs(5),
            ..Default::default()
        });

        let err = runner.build(Bytes::from_static(b"t"), "img").await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { stage: "build", .. }));
    }

    async fn build_concurrently(
        runner: &Arc<ContainerRunner<FakeEngine>>,
        callers: usize,
    ) -> Vec<(Result<(), RunnerError>, Duration)> {
        let mut handles = Vec::new();
        for _ in 0..callers {
            let runner = runner.clone();
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = runner.build(Bytes::from_static(b"t"), "img").await;
                (result, started.elapsed())
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_waiters_share_a_failed_build() {
        let (runner, engine) = runner(FakeEngine {
            build_error: Some(|| EngineError::Build("bad step".into())),
            build_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let runner = Arc::new(runner);

        let outcomes = build_concurrently(&runner, 4).await;

        assert_eq!(engine.count("build:"), 1);
        for (result, elapsed) in outcomes {
            assert!(result.unwrap_err().is_build_failure());
            assert!(elapsed < Duration::from_millis(200), "build() took {elapsed:?}");
        }

        // A later attempt is a fresh build
        let err = runner.build(Bytes::from_static(b"t"), "img").await.unwrap_err();
        assert!(err.is_build_failure());
        assert_eq!(engine.count("build:"), 2);
    }

    #[tokio::test]
    async fn test_build_timeout_includes_waiting_for_the_tag() {
        let (runner, _engine) = runner(FakeEngine {
            build_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let runner = Arc::new(runner);

        let outcomes = build_concurrently(&runner, 3).await;

        for (result, elapsed) in outcomes {
            assert!(matches!(result, Err(RunnerError::Timeout { stage: "build", .. })));
            assert!(elapsed < Duration::from_millis(500), "build() took {elapsed:?}");
        }
    }

    #[tokio::test]
    async fn test_image_pruned_outside_is_rebuilt() {
        let (runner, engine) = runner(FakeEngine::default());

        // Cleanup never runs, so the tag still counts a user
        runner.build(Bytes::from_static(b"t"), "img").await.unwrap();
        runner.build(Bytes::from_static(b"t"), "img").await.unwrap();
        assert_eq!(engine.count("build:"), 1);

        engine.pruned.store(true, Ordering::SeqCst);
        runner.build(Bytes::from_static(b"t"), "img").await.unwrap();
        assert_eq!(engine.count("inspect:"), 2);
        assert_eq!(engine.count("build:"), 2);
    }

    #[test]
    fn test_stdin_payload_one_value_per_line() {
        let payload = stdin_payload(&[Value::integer(-4), Value::real(2.5), Value::string("a b")]);
        assert_eq!(payload.as_ref(), b"-4\n2.5\na b\n");
    }
}
