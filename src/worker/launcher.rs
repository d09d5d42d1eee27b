use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{PanelError, Result};
use crate::logs::{LogEvent, MarkerSet};
use crate::worker::registry::{RunInfo, SharedRegistry};

/// How long output readers may keep flushing after the process is gone.
/// Grandchildren that inherited the pipes can otherwise hold them open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Input for one run, as posted by the control surface.
///
/// Missing fields are treated as empty strings and handed to the worker
/// unchanged; validation happens on the client side.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunRequest {
    pub naver_id: String,
    pub naver_pw: String,
    pub keyword: String,
    pub message: String,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("naver_id", &self.naver_id)
            .field("naver_pw", &"<redacted>")
            .field("keyword", &self.keyword)
            .field("message", &self.message)
            .finish()
    }
}

/// A launched run: its id and the receiving end of its event stream.
///
/// The stream ends after the terminal event, once the worker is gone.
#[derive(Debug)]
pub struct RunStream {
    pub run_id: Uuid,
    pub events: mpsc::Receiver<LogEvent>,
}

/// How a supervised worker ended.
#[derive(Debug)]
enum RunOutcome {
    Exited(ExitStatus),
    Stopped,
    Failed(std::io::Error),
}

impl RunOutcome {
    fn terminal_event(&self) -> LogEvent {
        match self {
            RunOutcome::Exited(status) if status.success() => {
                LogEvent::success("worker finished successfully")
            }
            RunOutcome::Exited(status) => LogEvent::warning(describe_exit(status)),
            RunOutcome::Stopped => LogEvent::warning("worker stopped by request"),
            RunOutcome::Failed(e) => LogEvent::error(format!("worker error: {}", e)),
        }
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("worker exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("worker terminated by signal {}", signal);
        }
    }
    "worker terminated without an exit code".to_string()
}

/// Starts worker processes and turns their output into log events.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    config: WorkerConfig,
    markers: Arc<MarkerSet>,
    registry: SharedRegistry,
    event_buffer: usize,
}

impl WorkerLauncher {
    pub fn new(config: WorkerConfig, markers: MarkerSet, registry: SharedRegistry) -> Self {
        Self {
            config,
            markers: Arc::new(markers),
            registry,
            event_buffer: 64,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Build the worker command line for a request.
    pub fn build_command(&self, request: &RunRequest) -> std::io::Result<Command> {
        let mut command = Command::new(self.config.interpreter_path()?);
        command
            .arg(self.config.script_path()?)
            .arg("--naver-id")
            .arg(&request.naver_id)
            .arg("--naver-pw")
            .arg(&request.naver_pw)
            .arg("--keyword")
            .arg(&request.keyword)
            .arg("--message")
            .arg(&request.message)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Lead a fresh process group so a stop reaches everything the
        // worker started (browser drivers included).
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }

    /// Launch a run.
    ///
    /// Only fails when the registry is full. Spawn failures are reported
    /// inside the returned stream as a single error event.
    pub async fn launch(&self, request: RunRequest) -> Result<RunStream> {
        let info = RunInfo::new(request.keyword.clone());
        let run_id = info.run_id;
        let cancel = CancellationToken::new();
        self.registry.write().await.register(info, cancel.clone())?;

        let (tx, rx) = mpsc::channel(self.event_buffer);

        let spawned = self
            .build_command(&request)
            .and_then(|mut command| command.spawn())
            .map_err(PanelError::Spawn);

        match spawned {
            Ok(child) => {
                let pid = child.id();
                self.registry.write().await.set_pid(&run_id, pid);
                tracing::info!(
                    run_id = %run_id,
                    pid = ?pid,
                    keyword = %request.keyword,
                    "Worker started"
                );
                tokio::spawn(supervise(
                    run_id,
                    child,
                    cancel,
                    tx,
                    self.markers.clone(),
                    self.registry.clone(),
                ));
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Worker spawn failed");
                self.registry.write().await.remove(&run_id);
                // Capacity is at least one, so this never waits.
                let _ = tx.send(LogEvent::error(e.to_string())).await;
            }
        }

        Ok(RunStream { run_id, events: rx })
    }
}

/// Own a running child until it is gone: forward its output, honour stop
/// requests, emit exactly one terminal event and release the registry slot.
async fn supervise(
    run_id: Uuid,
    mut child: Child,
    cancel: CancellationToken,
    tx: mpsc::Sender<LogEvent>,
    markers: Arc<MarkerSet>,
    registry: SharedRegistry,
) {
    // `Child::id` is gone once the child has been reaped.
    let pid = child.id();

    let mut stdout_task = child.stdout.take().map(|stdout| {
        let markers = markers.clone();
        tokio::spawn(pump_lines(stdout, tx.clone(), move |line| {
            markers.classify_stdout(line)
        }))
    });
    let mut stderr_task = child.stderr.take().map(|stderr| {
        let markers = markers.clone();
        tokio::spawn(pump_lines(stderr, tx.clone(), move |line| {
            markers.classify_stderr(line)
        }))
    });

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let outcome = match waited {
        Some(Ok(status)) => RunOutcome::Exited(status),
        Some(Err(e)) => RunOutcome::Failed(e),
        None => {
            if let Some(pid) = pid {
                if let Err(e) = kill_process_tree(pid).await {
                    tracing::warn!(run_id = %run_id, pid, error = %e, "Failed to kill worker process tree");
                }
            }
            if let Err(e) = child.kill().await {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to kill worker");
            }
            RunOutcome::Stopped
        }
    };

    // Both readers share one deadline.
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        tokio::join!(
            wait_reader(stdout_task.as_mut()),
            wait_reader(stderr_task.as_mut())
        )
    })
    .await;

    if drained.is_err() {
        tracing::warn!(run_id = %run_id, "Worker output still open after exit, killing leftovers");
        if let Some(pid) = pid {
            if let Err(e) = kill_process_tree(pid).await {
                tracing::debug!(run_id = %run_id, pid, error = %e, "No leftover worker processes");
            }
        }
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            task.abort();
        }
    }

    registry.write().await.remove(&run_id);

    let event = outcome.terminal_event();
    tracing::info!(run_id = %run_id, outcome = ?outcome, "Worker finished");
    let _ = tx.send(event).await;
}

async fn wait_reader(task: Option<&mut JoinHandle<()>>) {
    if let Some(task) = task {
        let _ = task.await;
    }
}

/// Kill the worker's process group with SIGKILL.
///
/// The group outlives its leader while any member is alive, so this also
/// reaches processes left behind by a worker that already exited.
#[cfg(unix)]
async fn kill_process_tree(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: plain syscall; a negative pid addresses the process group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(windows)]
async fn kill_process_tree(pid: u32) -> std::io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID"])
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        tracing::debug!(pid, status = %status, "taskkill found nothing to kill");
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
async fn kill_process_tree(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

/// Read `reader` line by line and forward whatever `classify` keeps.
///
/// Invalid UTF-8 is replaced rather than aborting the read. Once the
/// consumer is gone the pipe is still drained so the worker never blocks.
async fn pump_lines<R, F>(reader: R, tx: mpsc::Sender<LogEvent>, classify: F)
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> Option<LogEvent>,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut consumer_gone = false;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if consumer_gone {
                    continue;
                }
                if let Some(event) = classify(line) {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("Log consumer disconnected, draining worker output");
                        consumer_gone = true;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read worker output");
                break;
            }
        }
    }
}
