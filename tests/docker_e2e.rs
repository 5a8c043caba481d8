//! Runner tests against a live Docker engine.
//!
//! Prerequisites:
//! - Docker daemon reachable (set `RUNBOX_DOCKER_SOCKET` for a non-default socket)
//! - Network access to pull `alpine:3.20`
//! - Run via: `cargo test --test docker_e2e -- --ignored`

use bytes::Bytes;
use std::sync::Arc;

use runbox::model::Value;
use runbox::runner::{ContainerRunner, DockerEngine, RunOutput, Runner, RunnerSettings, image_tag};
use uuid::Uuid;

/// Minimal ustar archive holding regular files at its root
fn tar(files: &[(&str, &str)]) -> Bytes {
    let mut out = Vec::new();
    for (name, content) in files {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        header[108..116].copy_from_slice(b"0000000\0");
        header[116..124].copy_from_slice(b"0000000\0");
        header[124..136].copy_from_slice(format!("{:011o}\0", content.len()).as_bytes());
        header[136..148].copy_from_slice(b"00000000000\0");
        header[148..156].copy_from_slice(b"        ");
        header[156] = b'0';
        header[257..263].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");

        let checksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        header[148..156].copy_from_slice(format!("{checksum:06o}\0 ").as_bytes());

        out.extend_from_slice(&header);
        out.extend_from_slice(content.as_bytes());
        let padding = (512 - content.len() % 512) % 512;
        out.extend(std::iter::repeat_n(0u8, padding));
    }
    out.extend_from_slice(&[0u8; 1024]);
    Bytes::from(out)
}

fn runner() -> ContainerRunner<DockerEngine> {
    let socket = std::env::var("RUNBOX_DOCKER_SOCKET").ok();
    let engine = DockerEngine::connect(socket.as_deref()).expect("Failed to connect to Docker");
    ContainerRunner::new(Arc::new(engine), RunnerSettings::default())
}

fn box_archive(script: &str) -> Bytes {
    tar(&[
        (
            "Dockerfile",
            "FROM alpine:3.20\nCOPY main.sh /main.sh\nENTRYPOINT [\"sh\", \"/main.sh\"]\n",
        ),
        ("main.sh", script),
    ])
}

#[tokio::test]
#[ignore = "requires a Docker engine"]
async fn test_docker_sum_roundtrip() {
    let runner = runner();
    let image = image_tag("runbox-e2e", &Uuid::now_v7().to_string());

    runner
        .build(box_archive("read a\nread b\necho $((a + b))\n"), &image)
        .await
        .unwrap();
    let output = runner
        .run(&image, &[Value::integer(1), Value::integer(2)])
        .await;
    runner.cleanup(&image).await.unwrap();

    assert_eq!(
        output.unwrap(),
        RunOutput {
            exit_status: 0,
            output: "3\n".to_string()
        }
    );
}

#[tokio::test]
#[ignore = "requires a Docker engine"]
async fn test_docker_failure_keeps_stderr() {
    let runner = runner();
    let image = image_tag("runbox-e2e", &Uuid::now_v7().to_string());

    runner
        .build(box_archive("echo partial\necho boom >&2\nexit 4\n"), &image)
        .await
        .unwrap();
    let output = runner.run(&image, &[]).await;
    runner.cleanup(&image).await.unwrap();

    let output = output.unwrap();
    assert_eq!(output.exit_status, 4);
    assert!(output.output.contains("partial\n"));
    assert!(output.output.contains("boom\n"));
}

#[tokio::test]
#[ignore = "requires a Docker engine"]
async fn test_docker_bad_dockerfile_is_build_failure() {
    let runner = runner();
    let image = image_tag("runbox-e2e", &Uuid::now_v7().to_string());

    let err = runner
        .build(tar(&[("Dockerfile", "NOT A DOCKERFILE\n")]), &image)
        .await
        .unwrap_err();
    assert!(err.is_build_failure(), "unexpected error: {err}");
}
