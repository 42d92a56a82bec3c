//! SSH executor tests. Require a reachable host named by `SSH_TEST_HOST`;
//! run with `--features ssh-tests`.

#![cfg(feature = "ssh-tests")]

mod common;

use command_executor::backends::SshExecutor;
use command_executor::{Command, Executor, SharedBuffer, Signal};
use tokio_util::sync::CancellationToken;

#[smol_potat::test]
async fn test_remote_echo_hides_pid_line() {
    let Some(config) = common::ssh::ssh_config() else {
        eprintln!("SSH_TEST_HOST not set, skipping");
        return;
    };
    let stdout = SharedBuffer::new();
    let executor = SshExecutor::new(
        config,
        Command::builder("echo").arg("hello").build(),
        CancellationToken::new(),
    );
    executor.set_stdout(Some(stdout.output_stream())).unwrap();

    executor.start().await.unwrap();
    assert_eq!(executor.wait().await.unwrap(), 0);
    assert_eq!(stdout.to_string_lossy(), "hello\n");
    assert_eq!(executor.pid(), -1);
}

#[smol_potat::test]
async fn test_remote_signal() {
    let Some(config) = common::ssh::ssh_config() else {
        return;
    };
    let executor = SshExecutor::new(
        config,
        Command::builder("sleep").arg("100").build(),
        CancellationToken::new(),
    );
    executor.start().await.unwrap();

    executor.signal(Signal::KILL).await.unwrap();
    executor.wait().await.unwrap();

    let info = executor.signal_info();
    assert!(info.signaled);
    assert_eq!(info.signal, 9);
    assert!(!executor.success());
}
