use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::logs::MarkerSet;

const DEFAULT_SCRIPT: &str = "서로이웃신청_api.py";

#[cfg(windows)]
const DEFAULT_INTERPRETER: &str = ".venv\\Scripts\\python.exe";
#[cfg(not(windows))]
const DEFAULT_INTERPRETER: &str = ".venv/bin/python";

/// Location of the external automation worker.
///
/// Relative paths are resolved against `working_dir`, or the panel's own
/// working directory when unset. A bare program name (no separators) is left
/// alone so it can be found on `PATH`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpreter used to run the script (e.g. a virtualenv python)
    pub interpreter: PathBuf,
    /// Worker script passed as the interpreter's first argument
    pub script: PathBuf,
    /// Directory the worker runs in
    pub working_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            script: PathBuf::from(DEFAULT_SCRIPT),
            working_dir: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> std::io::Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }

    pub fn interpreter_path(&self) -> std::io::Result<PathBuf> {
        Ok(resolve(&self.base_dir()?, &self.interpreter))
    }

    pub fn script_path(&self) -> std::io::Result<PathBuf> {
        Ok(resolve(&self.base_dir()?, &self.script))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.components().count() <= 1 {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub listen_addr: SocketAddr,
    pub worker: WorkerConfig,
    pub markers: MarkerSet,
    /// Launches beyond this many concurrent runs are rejected
    pub max_active_runs: usize,
    /// Events buffered per run before the worker's output readers wait
    pub event_buffer: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:3000"
                .parse()
                .expect("default listen address is valid"),
            worker: WorkerConfig::default(),
            markers: MarkerSet::default(),
            max_active_runs: 1,
            event_buffer: 64,
        }
    }
}

impl PanelConfig {
    pub fn new(listen_addr: SocketAddr, worker: WorkerConfig) -> Self {
        Self {
            listen_addr,
            worker,
            ..Default::default()
        }
    }

    pub fn with_markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_max_active_runs(mut self, max_active_runs: usize) -> Self {
        self.max_active_runs = max_active_runs;
        self
    }
}
