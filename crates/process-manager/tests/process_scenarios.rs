//! End-to-end process supervision through a local manager

mod common;

use common::{collect_logs, each_strategy, eventually, in_memory, manager};
use process_manager::{CreateOptions, ErrorKind, Filter, Manager, Signal};
use std::time::Duration;

#[smol_potat::test]
async fn test_echo_logs_reach_in_memory_sink() {
    let manager = manager();
    for options in each_strategy(in_memory(["echo", "hello"])) {
        let process = manager.create_process(options).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 0);

        let logs = collect_logs(&process).await;
        assert_eq!(logs, vec!["hello"]);
        let stream = process.log_stream(10).await.unwrap();
        assert!(stream.done);
        assert!(stream.logs.is_empty());
    }
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_stdin_bytes_survive_respawn() {
    let manager = manager();
    for mut options in each_strategy(in_memory(["bash", "-s"])) {
        options.standard_input_bytes = Some(b"echo foobar".to_vec());

        let process = manager.create_process(options).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 0);
        assert_eq!(collect_logs(&process).await, vec!["foobar"]);

        let respawned = process.respawn().await.unwrap();
        assert_ne!(respawned.id(), process.id());
        assert_eq!(respawned.wait().await.unwrap(), 0);
        assert_eq!(collect_logs(&respawned).await, vec!["foobar"]);
    }
    manager.close().await.unwrap();
}

#[cfg(unix)]
#[smol_potat::test]
async fn test_sigkill_exit_code() {
    let manager = manager();
    for options in each_strategy(CreateOptions::new(["sleep", "100"])) {
        let process = manager.create_process(options).await.unwrap();
        assert!(process.running().await.unwrap());

        process.signal(Signal::KILL).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 9);

        let info = process.info().await.unwrap();
        assert!(info.complete);
        assert!(!info.is_running);
        assert!(!info.successful);
        assert!(info.signaled);
        assert_eq!(info.signal, 9);
    }
    manager.close().await.unwrap();
}

#[cfg(unix)]
#[smol_potat::test]
async fn test_timeout_kills_process() {
    let manager = manager();
    for mut options in each_strategy(CreateOptions::new(["sleep", "10"])) {
        options.timeout = Duration::from_secs(1);

        let process = manager.create_process(options).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 9);

        let info = process.info().await.unwrap();
        assert!(info.timed_out);
        assert!(info.signaled);
        assert!(!info.successful);
        assert_eq!(info.options.timeout_secs, 1);
    }
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_group_returns_tagged_processes() {
    let manager = manager();
    let mut tagged = Vec::new();
    for n in 0..10 {
        let process = manager.create_process(CreateOptions::new(["true"])).await.unwrap();
        if n % 3 == 0 && tagged.len() < 3 {
            process.tag("t").await.unwrap();
            process.tag("t").await.unwrap();
            tagged.push(process.id().to_string());
        }
    }

    let mut group: Vec<String> = manager
        .group("t")
        .await
        .unwrap()
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    group.sort();
    tagged.sort();
    assert_eq!(group, tagged);

    let first = manager.get(&tagged[0]).await.unwrap();
    assert_eq!(first.get_tags().await.unwrap(), vec!["t"]);
    first.reset_tags().await.unwrap();
    assert_eq!(manager.group("t").await.unwrap().len(), 2);

    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_clear_removes_only_completed() {
    let manager = manager();
    let short = manager.create_process(CreateOptions::new(["true"])).await.unwrap();
    let long = manager.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();

    short.wait().await.unwrap();
    manager.clear().await.unwrap();
    manager.clear().await.unwrap();

    let err = manager.get(short.id()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let found = manager.get(long.id()).await.unwrap();
    assert_eq!(found.id(), long.id());

    long.signal(Signal::TERM).await.unwrap();
    long.wait().await.unwrap();
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_list_filters() {
    let manager = manager();
    let ok = manager.create_process(CreateOptions::new(["true"])).await.unwrap();
    let bad = manager.create_process(CreateOptions::new(["false"])).await.unwrap();
    let live = manager.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();
    ok.wait().await.unwrap();
    assert_eq!(bad.wait().await.unwrap(), 1);

    let ids = |processes: Vec<process_manager::ProcessRef>| -> Vec<String> {
        processes.iter().map(|p| p.id().to_string()).collect()
    };
    assert_eq!(manager.list(Filter::All).await.unwrap().len(), 3);
    assert_eq!(ids(manager.list(Filter::Running).await.unwrap()), vec![live.id().to_string()]);
    assert_eq!(ids(manager.list(Filter::Successful).await.unwrap()), vec![ok.id().to_string()]);
    assert_eq!(ids(manager.list(Filter::Failed).await.unwrap()), vec![bad.id().to_string()]);
    assert_eq!(manager.list(Filter::Terminated).await.unwrap().len(), 2);

    manager.close().await.unwrap();
    assert!(!live.running().await.unwrap());
}

#[smol_potat::test]
async fn test_get_returns_same_id() {
    let manager = manager();
    let process = manager.create_process(CreateOptions::new(["true"])).await.unwrap();
    assert_eq!(manager.get(process.id()).await.unwrap().id(), process.id());
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_invalid_options_are_rejected() {
    let manager = manager();

    let err = manager.create_process(CreateOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mut options = CreateOptions::new(["true"]);
    options.working_directory = "/no/such/directory".into();
    let err = manager.create_process(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mut options = CreateOptions::new(["true"]);
    options.timeout = Duration::from_micros(100);
    let err = manager.create_process(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = manager
        .create_process(CreateOptions::new(["/definitely/not/a/binary"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SpawnFailed);

    assert!(manager.list(Filter::All).await.unwrap().is_empty());
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_signal_after_completion_fails() {
    let manager = manager();
    for options in each_strategy(CreateOptions::new(["true"])) {
        let process = manager.create_process(options).await.unwrap();
        process.wait().await.unwrap();
        let err = process.signal(Signal::TERM).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyComplete);
    }
    manager.close().await.unwrap();
}

#[cfg(unix)]
#[smol_potat::test]
async fn test_override_environ_leaves_only_manager_id() {
    let manager = manager();
    let mut options = in_memory(["/usr/bin/env"]);
    options.override_environ = true;

    let process = manager.create_process(options).await.unwrap();
    assert_eq!(process.wait().await.unwrap(), 0);
    let logs = collect_logs(&process).await;
    assert_eq!(logs, vec![format!("MANAGER_ID={}", manager.id())]);
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_environment_and_working_directory() {
    let manager = manager();
    let dir = tempfile::tempdir().unwrap();
    let mut options = in_memory(["sh", "-c", "echo $GREETING; pwd"]);
    options.environment.insert("GREETING".into(), "hi".into());
    options.working_directory = dir.path().to_string_lossy().into_owned();

    let process = manager.create_process(options).await.unwrap();
    assert_eq!(process.wait().await.unwrap(), 0);
    let logs = collect_logs(&process).await;
    assert_eq!(logs[0], "hi");
    assert_eq!(
        std::fs::canonicalize(&logs[1]).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
    manager.close().await.unwrap();
}

#[smol_potat::test]
async fn test_close_terminates_live_processes() {
    let manager = manager();
    let mut processes = Vec::new();
    for options in each_strategy(CreateOptions::new(["sleep", "100"])) {
        processes.push(manager.create_process(options).await.unwrap());
    }

    manager.close().await.unwrap();
    for process in &processes {
        let settled = eventually(Duration::from_secs(5), || async {
            process.complete().await.unwrap()
        })
        .await;
        assert!(settled);
        assert!(!process.info().await.unwrap().successful);
    }
}

#[smol_potat::test]
async fn test_concurrent_waiters_agree() {
    let manager = manager();
    for options in each_strategy(CreateOptions::new(["sh", "-c", "sleep 0.2; exit 3"])) {
        let process = manager.create_process(options).await.unwrap();
        let waiters = (0..4).map(|_| {
            let process = process.clone();
            smol::spawn(async move { process.wait().await.unwrap() })
        });
        let codes = futures::future::join_all(waiters).await;
        assert_eq!(codes, vec![3, 3, 3, 3]);
        let info = process.info().await.unwrap();
        assert_eq!(info.exit_code, 3);
        assert!(info.end_at.unwrap() >= info.start_at.unwrap());
    }
    manager.close().await.unwrap();
}
