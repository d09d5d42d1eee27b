use tokio_util::sync::CancellationToken;

use crate::config::PanelConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::shutdown::stop_runs_on_shutdown;
use crate::worker::{RunRegistry, SharedRegistry, WorkerLauncher};

/// Wires the run registry, the launcher and the HTTP surface together.
pub struct PanelServer {
    pub config: PanelConfig,
    pub registry: SharedRegistry,
    pub launcher: WorkerLauncher,
}

impl PanelServer {
    pub fn new(config: PanelConfig) -> Self {
        let registry = RunRegistry::shared(config.max_active_runs);
        let launcher = WorkerLauncher::new(
            config.worker.clone(),
            config.markers.clone(),
            registry.clone(),
        )
        .with_event_buffer(config.event_buffer);

        Self {
            config,
            registry,
            launcher,
        }
    }

    pub fn dashboard_state(&self) -> DashboardState {
        DashboardState::new(self.launcher.clone())
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// On shutdown every tracked worker is stopped; open log streams end
    /// with their terminal event before the server returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound or the
    /// server fails while running.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let reaper = stop_runs_on_shutdown(shutdown.clone(), self.registry.clone());

        let result = run_dashboard(self.config.listen_addr, self.dashboard_state(), shutdown).await;
        if result.is_err() {
            reaper.abort();
        }
        result
    }
}
