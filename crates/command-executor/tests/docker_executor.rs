//! Docker executor tests. Require a docker daemon; run with
//! `--features docker-tests`.

#![cfg(feature = "docker-tests")]

mod common;

use command_executor::backends::{DockerConfig, DockerExecutor};
use command_executor::{Command, Error, Executor, SharedBuffer, Signal};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const IMAGE: &str = "alpine:3.19";

fn container(cmd: Command, token: CancellationToken) -> DockerExecutor {
    DockerExecutor::new(DockerConfig::new(IMAGE).with_pull(true), cmd, token)
}

#[smol_potat::test]
async fn test_container_echo_demultiplexed() {
    if !common::docker_available() {
        eprintln!("docker not available, skipping");
        return;
    }
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let executor = container(
        Command::builder("sh")
            .arg("-c")
            .arg("echo out; echo err >&2")
            .build(),
        CancellationToken::new(),
    );
    executor.set_stdout(Some(stdout.output_stream())).unwrap();
    executor.set_stderr(Some(stderr.output_stream())).unwrap();

    executor.start().await.unwrap();
    assert_eq!(executor.wait().await.unwrap(), 0);
    assert_eq!(stdout.to_string_lossy(), "out\n");
    assert_eq!(stderr.to_string_lossy(), "err\n");
    executor.close().await;
}

#[smol_potat::test]
async fn test_container_exit_code_and_stdin() {
    if !common::docker_available() {
        return;
    }
    let stdout = SharedBuffer::new();
    let executor = container(Command::builder("sh").arg("-s").build(), CancellationToken::new());
    executor
        .set_stdin(Some(Box::new(futures::io::Cursor::new(b"echo foobar; exit 7".to_vec()))))
        .unwrap();
    executor.set_stdout(Some(stdout.output_stream())).unwrap();

    executor.start().await.unwrap();
    assert_eq!(executor.wait().await.unwrap(), 7);
    assert_eq!(stdout.to_string_lossy(), "foobar\n");
    executor.close().await;
}

#[smol_potat::test]
async fn test_container_signal() {
    if !common::docker_available() {
        return;
    }
    let executor = container(Command::builder("sleep").arg("100").build(), CancellationToken::new());
    executor.start().await.unwrap();
    assert!(executor.pid() > 0);

    executor.signal(Signal::KILL).await.unwrap();
    assert_eq!(executor.wait().await.unwrap(), 137);
    assert!(executor.signal_info().signaled);
    executor.close().await;
}

#[smol_potat::test]
async fn test_container_missing_image() {
    if !common::docker_available() {
        return;
    }
    let executor = DockerExecutor::new(
        DockerConfig::new("this-image-does-not-exist-12345:latest"),
        Command::new("true"),
        CancellationToken::new(),
    );
    assert!(matches!(executor.start().await, Err(Error::SpawnFailed { .. })));
}

#[smol_potat::test]
async fn test_cancellation_removes_container() {
    if !common::docker_available() {
        return;
    }
    let token = CancellationToken::new();
    let executor = container(Command::builder("sleep").arg("100").build(), token.clone());
    executor.start().await.unwrap();
    let id = executor.container_id().unwrap();

    let canceller = token.clone();
    smol::spawn(async move {
        smol::Timer::after(Duration::from_millis(200)).await;
        canceller.cancel();
    })
    .detach();

    assert!(matches!(executor.wait().await, Err(Error::Cancelled { .. })));
    smol::Timer::after(Duration::from_millis(500)).await;

    let inspect = std::process::Command::new("docker")
        .args(["inspect", &id])
        .output()
        .unwrap();
    assert!(!inspect.status.success(), "container {} should be gone", id);
}
