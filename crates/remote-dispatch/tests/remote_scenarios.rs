//! Manager, process and cache operations through both client transports

mod common;

use common::{PROTOCOLS, Service, collect_logs, eventually, in_memory};
use process_manager::logging::LoggerConfig;
use process_manager::logging::OutputOptions;
use process_manager::{
    CreateOptions, ErrorKind, Filter, LoggingPayload, Manager, ProcessTrigger, Signal, SignalTriggerId,
};
use std::time::{Duration, Instant};

#[smol_potat::test]
async fn test_echo_over_both_transports() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;
        assert_eq!(remote.id(), service.manager.id());

        let process = remote.create_process(in_memory(["echo", "hello"])).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 0, "{}", protocol);
        assert_eq!(collect_logs(&process).await, vec!["hello"], "{}", protocol);

        let info = process.info().await.unwrap();
        assert!(info.complete);
        assert!(info.successful);
        assert_eq!(info.options.args, vec!["echo", "hello"]);
        assert_eq!(info.pid, -1);
        assert!(service.manager.get(process.id()).await.unwrap().info().await.unwrap().pid > 0);
        assert!(!process.running().await.unwrap());
        assert!(process.complete().await.unwrap());

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_failed_exit_is_not_an_error() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let process = remote.create_process(CreateOptions::new(["false"])).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 1);
        assert!(!process.info().await.unwrap().successful);

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_error_kinds_cross_the_wire() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let err = remote.get("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{}", protocol);

        let err = remote.create_process(CreateOptions::new(Vec::<String>::new())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", protocol);

        let process = remote.create_process(CreateOptions::new(["true"])).await.unwrap();
        process.wait().await.unwrap();
        let err = process.signal(Signal::TERM).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyComplete, "{}", protocol);

        let err = remote.register(process.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        let trigger: ProcessTrigger = Box::new(|_info: &process_manager::ProcessInfo| Ok(()));
        let err = process.register_trigger(trigger).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_signal_and_signal_trigger_id() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let process = remote.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();
        assert!(process.running().await.unwrap());
        process
            .register_signal_trigger_id(SignalTriggerId::CleanTermination)
            .await
            .unwrap();
        process.signal(Signal::KILL).await.unwrap();
        assert_eq!(process.wait().await.unwrap(), 9, "{}", protocol);

        let info = process.info().await.unwrap();
        assert!(info.signaled);
        assert_eq!(info.signal, 9);

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_signal_while_another_call_waits() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let process = remote.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();
        let waiter = {
            let process = process.clone();
            smol::spawn(async move { process.wait().await })
        };
        smol::Timer::after(Duration::from_millis(300)).await;

        let started = Instant::now();
        process.signal(Signal::KILL).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5), "{}: signal queued behind wait", protocol);
        assert!(process.running().await.is_ok());

        assert_eq!(waiter.await.unwrap(), 9, "{}", protocol);
        assert!(started.elapsed() < Duration::from_secs(10));

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_tags_group_list_and_clear() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let done = remote.create_process(CreateOptions::new(["true"])).await.unwrap();
        let live = remote.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();
        done.wait().await.unwrap();

        live.tag("servers").await.unwrap();
        live.tag("servers").await.unwrap();
        live.tag("slow").await.unwrap();
        assert_eq!(live.get_tags().await.unwrap(), vec!["servers", "slow"]);

        let group = remote.group("servers").await.unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].id(), live.id());

        let running = remote.list(Filter::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id(), live.id());
        assert_eq!(remote.list(Filter::All).await.unwrap().len(), 2);

        remote.clear().await.unwrap();
        assert_eq!(remote.get(done.id()).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(remote.get(live.id()).await.unwrap().id(), live.id());

        live.reset_tags().await.unwrap();
        assert!(remote.group("servers").await.unwrap().is_empty());

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_respawn_is_tracked_by_the_service() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let mut options = in_memory(["bash", "-s"]);
        options.standard_input_bytes = Some(b"echo again".to_vec());
        let first = remote.create_process(options).await.unwrap();
        assert_eq!(first.wait().await.unwrap(), 0);

        let second = first.respawn().await.unwrap();
        assert_ne!(second.id(), first.id());
        assert_eq!(second.wait().await.unwrap(), 0);
        assert_eq!(collect_logs(&second).await, vec!["again"]);

        let local = service.manager.get(second.id()).await.unwrap();
        assert_eq!(local.id(), second.id());

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_close_terminates_remote_processes() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let live = remote.create_process(CreateOptions::new(["sleep", "100"])).await.unwrap();
        let id = live.id().to_string();
        remote.close().await.unwrap();

        let local = service.manager.get(&id).await.unwrap();
        assert!(eventually(Duration::from_secs(5), || async { !local.running().await.unwrap() }).await);

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_logging_cache_operations() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;
        let cache = remote.logging_cache();
        let output = OutputOptions::with_loggers(vec![LoggerConfig::in_memory(10)]);

        let created = cache.create("suite", &output).await.unwrap();
        assert_eq!(created.id, "suite");
        assert_eq!(created.manager_id, remote.id());
        assert_eq!(cache.create("suite", &output).await.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(cache.get("suite").await.unwrap().id, "suite");
        assert_eq!(cache.len().await.unwrap(), 1);

        cache.send(LoggingPayload::text("suite", "injected")).await.unwrap();
        let lines: Vec<String> = service
            .local
            .local_cache()
            .output("suite")
            .unwrap()
            .in_memory()
            .flat_map(|sink| sink.snapshot())
            .collect();
        assert_eq!(lines, vec!["injected"], "{}", protocol);

        let err = cache.send(LoggingPayload::text("missing", "x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        cache.create("other", &output).await.unwrap();
        cache.close_and_remove("other").await.unwrap();
        cache.prune(chrono::Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 1);

        cache.remove("suite").await.unwrap();
        assert_eq!(cache.get("suite").await.unwrap_err().kind(), ErrorKind::NotFound);
        cache.clear().await.unwrap();
        assert!(cache.is_empty().await.unwrap());

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_configure_cache_can_disable_it() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        remote
            .configure_cache(process_manager::CacheOptions {
                disabled: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let output = OutputOptions::with_loggers(vec![LoggerConfig::in_memory(10)]);
        let err = remote.logging_cache().create("a", &output).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        service.stop().await;
    }
}

#[smol_potat::test]
async fn test_buildlogger_urls() {
    for protocol in PROTOCOLS {
        let service = Service::start().await;
        let remote = service.connect(protocol).await;

        let process = remote.create_process(CreateOptions::new(["true"])).await.unwrap();
        let err = remote.buildlogger_urls(process.id()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(remote.buildlogger_urls("missing").await.unwrap_err().kind(), ErrorKind::NotFound);

        service.stop().await;
    }
}
