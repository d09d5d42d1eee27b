use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PanelError, Result};

const DEFAULT_MAX_RUNS: usize = 1;

pub type SharedRegistry = Arc<RwLock<RunRegistry>>;

/// Public view of a tracked run. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub pid: Option<u32>,
    pub keyword: String,
    pub started_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pid: None,
            keyword: keyword.into(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct RunEntry {
    info: RunInfo,
    cancel: CancellationToken,
}

/// Tracks the worker processes started by this panel.
///
/// A run is registered before its process is spawned and removed by the
/// supervising task on every exit path, so a stop request only ever
/// targets children this panel owns.
#[derive(Debug)]
pub struct RunRegistry {
    runs: HashMap<Uuid, RunEntry>,
    max_runs: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RUNS)
    }

    pub fn with_capacity(max_runs: usize) -> Self {
        Self {
            runs: HashMap::new(),
            max_runs: max_runs.max(1),
        }
    }

    pub fn shared(max_runs: usize) -> SharedRegistry {
        Arc::new(RwLock::new(Self::with_capacity(max_runs)))
    }

    /// Track a new run. Fails when the registry is full.
    pub fn register(&mut self, info: RunInfo, cancel: CancellationToken) -> Result<()> {
        if self.is_full() {
            return Err(PanelError::AtCapacity(self.runs.len()));
        }
        tracing::debug!(run_id = %info.run_id, keyword = %info.keyword, "Run registered");
        self.runs.insert(info.run_id, RunEntry { info, cancel });
        Ok(())
    }

    /// Record the OS pid once the worker has been spawned.
    pub fn set_pid(&mut self, run_id: &Uuid, pid: Option<u32>) -> bool {
        if let Some(entry) = self.runs.get_mut(run_id) {
            entry.info.pid = pid;
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, run_id: &Uuid) -> Option<RunInfo> {
        self.runs.remove(run_id).map(|entry| entry.info)
    }

    /// Request termination of one run. The entry stays until its
    /// supervisor has reaped the process.
    pub fn stop(&mut self, run_id: &Uuid) -> Result<()> {
        let entry = self
            .runs
            .get(run_id)
            .ok_or(PanelError::RunNotFound(*run_id))?;
        entry.cancel.cancel();
        tracing::info!(run_id = %run_id, pid = ?entry.info.pid, "Stop requested");
        Ok(())
    }

    /// Request termination of every run not already stopping.
    /// Returns the number of runs signalled.
    pub fn stop_all(&mut self) -> Result<usize> {
        let mut stopped = 0;
        for (run_id, entry) in &self.runs {
            if entry.cancel.is_cancelled() {
                continue;
            }
            entry.cancel.cancel();
            tracing::info!(run_id = %run_id, pid = ?entry.info.pid, "Stop requested");
            stopped += 1;
        }
        if stopped == 0 {
            return Err(PanelError::NoActiveRun);
        }
        Ok(stopped)
    }

    pub fn get(&self, run_id: &Uuid) -> Option<&RunInfo> {
        self.runs.get(run_id).map(|entry| &entry.info)
    }

    /// Active runs, oldest first
    pub fn active_runs(&self) -> Vec<&RunInfo> {
        let mut runs: Vec<&RunInfo> = self.runs.values().map(|entry| &entry.info).collect();
        runs.sort_by_key(|info| info.started_at);
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.runs.len() >= self.max_runs
    }
}
