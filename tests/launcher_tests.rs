
use std::time::{Duration, Instant};

use neighbor_panel::config::WorkerConfig;
use neighbor_panel::error::PanelError;
use neighbor_panel::logs::{LogEvent, LogKind, MarkerSet};
use neighbor_panel::shutdown::stop_runs_on_shutdown;
use neighbor_panel::worker::{RunRegistry, WorkerLauncher};
use test_harness::{collect_events, next_event, sample_request, wait_until_idle, FakeWorker};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_json_lines_are_forwarded_and_success_is_terminal() {
    let worker = FakeWorker::new(
        r#"echo '{"type":"info","message":"starting"}'
echo "args: $1 $2 $3 $4 $5 $6 $7 $8"
exit 0
"#,
    );
    let launcher = worker.launcher(1);

    let run = launcher.launch(sample_request()).await.unwrap();
    let events = collect_events(run).await;

    assert_eq!(
        events,
        vec![
            LogEvent::info("starting"),
            LogEvent::info("args: --naver-id a --naver-pw b --keyword cats --message hi"),
            LogEvent::success("worker finished successfully"),
        ]
    );
    assert!(launcher.registry().read().await.is_empty());
}

#[tokio::test]
async fn test_raw_lines_are_classified_by_markers() {
    let worker = FakeWorker::new(
        r#"echo '[실패] 로그인 실패'
echo '[성공] 신청 완료'
echo '경고: 일일 한도'
echo 'plain progress'
"#,
    );
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            LogEvent::error("[실패] 로그인 실패"),
            LogEvent::success("[성공] 신청 완료"),
            LogEvent::warning("경고: 일일 한도"),
            LogEvent::info("plain progress"),
            LogEvent::success("worker finished successfully"),
        ]
    );
}

#[tokio::test]
async fn test_blank_lines_produce_no_events() {
    let worker = FakeWorker::new("printf '\\n   \\nhello\\n\\n'\nprintf '\\n  \\n' >&2\n");
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            LogEvent::info("hello"),
            LogEvent::success("worker finished successfully"),
        ]
    );
}

#[tokio::test]
async fn test_stderr_is_error_and_devtools_noise_is_dropped() {
    let worker = FakeWorker::new(
        r#"echo 'DevTools listening on ws://127.0.0.1:9222/devtools/browser' >&2
echo 'Traceback (most recent call last):' >&2
"#,
    );
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            LogEvent::error("Traceback (most recent call last):"),
            LogEvent::success("worker finished successfully"),
        ]
    );
}

#[tokio::test]
async fn test_nonzero_exit_is_single_warning() {
    let worker = FakeWorker::new("echo working\nexit 3\n");
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            LogEvent::info("working"),
            LogEvent::warning("worker exited with code 3"),
        ]
    );
}

#[tokio::test]
async fn test_terminal_event_comes_after_all_output() {
    let worker = FakeWorker::new("i=1\nwhile [ $i -le 300 ]; do echo \"line $i\"; i=$((i+1)); done\n");
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(events.len(), 301);
    for (i, event) in events[..300].iter().enumerate() {
        assert_eq!(event, &LogEvent::info(format!("line {}", i + 1)));
    }
    let terminal: Vec<&LogEvent> = events
        .iter()
        .filter(|e| e.kind == LogKind::Success)
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(events[300], LogEvent::success("worker finished successfully"));
}

#[tokio::test]
async fn test_spawn_failure_is_single_error_event() {
    let launcher = WorkerLauncher::new(
        WorkerConfig::new("/nonexistent/bin/python", "worker.py"),
        MarkerSet::default(),
        RunRegistry::shared(1),
    );

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, LogKind::Error);
    assert!(events[0].message.starts_with("failed to start worker: "));
    assert!(launcher.registry().read().await.is_empty());
}

#[tokio::test]
async fn test_stop_terminates_tracked_worker() {
    let worker = FakeWorker::new("echo ready\nexec sleep 30\n");
    let launcher = worker.launcher(1);
    let started = Instant::now();

    let mut run = launcher.launch(sample_request()).await.unwrap();
    assert_eq!(next_event(&mut run).await, Some(LogEvent::info("ready")));

    {
        let mut registry = launcher.registry().write().await;
        assert!(registry.get(&run.run_id).unwrap().pid.is_some());
        registry.stop(&run.run_id).unwrap();
    }

    let rest = collect_events(run).await;
    assert_eq!(rest, vec![LogEvent::warning("worker stopped by request")]);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(launcher.registry().read().await.is_empty());
}

/// True while `pid` exists and is not a zombie awaiting its reaper.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().chars().next() != Some('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_kills_processes_started_by_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("child.pid");
    let worker = FakeWorker::new(&format!(
        "sleep 60 &\necho $! > '{}'\necho ready\nwait\n",
        pidfile.display()
    ));
    let launcher = worker.launcher(1);

    let mut run = launcher.launch(sample_request()).await.unwrap();
    assert_eq!(next_event(&mut run).await, Some(LogEvent::info("ready")));
    let grandchild: u32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_alive(grandchild));

    let stopped_at = Instant::now();
    launcher.registry().write().await.stop(&run.run_id).unwrap();
    let rest = collect_events(run).await;

    assert_eq!(rest, vec![LogEvent::warning("worker stopped by request")]);
    // The pipes close with the group, well inside a single drain window.
    assert!(stopped_at.elapsed() < Duration::from_secs(3));

    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(grandchild) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_alive(grandchild));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_leftover_process_holding_output_is_cleaned_up_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("child.pid");
    let worker = FakeWorker::new(&format!(
        "sleep 60 &\necho $! > '{}'\necho done\nexit 0\n",
        pidfile.display()
    ));
    let launcher = worker.launcher(1);
    let started = Instant::now();

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            LogEvent::info("done"),
            LogEvent::success("worker finished successfully"),
        ]
    );
    // stdout and stderr wait out one shared deadline, not one each.
    assert!(started.elapsed() < Duration::from_secs(9));

    let grandchild: u32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(grandchild) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_alive(grandchild));
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_signal_is_reported() {
    let worker = FakeWorker::new("kill -9 $$\n");
    let launcher = worker.launcher(1);

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    assert_eq!(events, vec![LogEvent::warning("worker terminated by signal 9")]);
}

#[tokio::test]
async fn test_second_launch_is_rejected_while_running() {
    let worker = FakeWorker::new("echo ready\nexec sleep 30\n");
    let launcher = worker.launcher(1);

    let mut first = launcher.launch(sample_request()).await.unwrap();
    assert_eq!(next_event(&mut first).await, Some(LogEvent::info("ready")));

    let err = launcher.launch(sample_request()).await.unwrap_err();
    assert!(matches!(err, PanelError::AtCapacity(1)));

    launcher.registry().write().await.stop_all().unwrap();
    let rest = collect_events(first).await;
    assert_eq!(rest.last(), Some(&LogEvent::warning("worker stopped by request")));

    // The slot is free again once the first run has ended.
    let second = launcher.launch(sample_request()).await.unwrap();
    launcher.registry().write().await.stop(&second.run_id).unwrap();
    collect_events(second).await;
}

#[tokio::test]
async fn test_worker_keeps_running_when_consumer_goes_away() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let worker = FakeWorker::new(&format!(
        "i=1\nwhile [ $i -le 500 ]; do echo \"line $i\"; i=$((i+1)); done\ntouch '{}'\n",
        marker.display()
    ));
    let launcher = worker.launcher(1);

    let run = launcher.launch(sample_request()).await.unwrap();
    drop(run);

    wait_until_idle(&launcher).await;
    assert!(marker.exists());
}

#[tokio::test]
async fn test_shutdown_stops_active_runs() {
    let worker = FakeWorker::new("echo ready\nexec sleep 30\n");
    let launcher = worker.launcher(1);
    let shutdown = CancellationToken::new();
    let reaper = stop_runs_on_shutdown(shutdown.clone(), launcher.registry().clone());

    let mut run = launcher.launch(sample_request()).await.unwrap();
    assert_eq!(next_event(&mut run).await, Some(LogEvent::info("ready")));

    shutdown.cancel();
    reaper.await.unwrap();

    let rest = collect_events(run).await;
    assert_eq!(rest, vec![LogEvent::warning("worker stopped by request")]);
}

#[tokio::test]
async fn test_worker_runs_in_configured_directory() {
    let workdir = tempfile::tempdir().unwrap();
    let worker = FakeWorker::new("pwd\n");
    let config = worker.config.clone().with_working_dir(workdir.path());
    let launcher = WorkerLauncher::new(config, MarkerSet::default(), RunRegistry::shared(1));

    let events = collect_events(launcher.launch(sample_request()).await.unwrap()).await;

    let expected = workdir.path().canonicalize().unwrap();
    let reported = std::path::PathBuf::from(&events[0].message)
        .canonicalize()
        .unwrap();
    assert_eq!(reported, expected);
}
