use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::config::BoardConfig;
use crate::dashboard::{run_dashboard, DashboardState, SharedService};
use crate::error::Result;
use crate::service::BoardService;
use crate::store::MemoryStore;

/// Owns the board service and runs the API plus the optional maintenance
/// loop until shutdown.
pub struct Server {
    pub config: BoardConfig,
    pub service: SharedService,
}

impl Server {
    pub fn new(config: BoardConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(BoardService::new(store, config.clone())?);
        Ok(Self { config, service })
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the API listener cannot bind or fails while
    /// serving. The maintenance loop logs its own errors and keeps going.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let maintenance = self.config.maintenance_interval_secs.map(|secs| {
            let service = self.service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                Self::maintenance_loop(service, Duration::from_secs(secs.max(1)), shutdown).await;
            })
        });

        let state = DashboardState {
            service: self.service.clone(),
        };
        let served = run_dashboard(self.config.listen_addr, state, shutdown.clone()).await;

        shutdown.cancel();
        if let Some(handle) = maintenance {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Maintenance loop panicked");
            }
        }
        tracing::info!("Server stopped");
        served
    }

    /// Periodic day-rollover check. Cleanup is left to operators; it is
    /// never triggered from here.
    async fn maintenance_loop(
        service: SharedService,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Maintenance loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let today = Local::now().date_naive();
                    match service.day_rollover_check(today).await {
                        Ok(outcome) if !outcome.already_done => {
                            tracing::info!(%today, moved = outcome.moved_count, "Day rollover applied");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Day rollover check failed"),
                    }
                }
            }
        }
    }
}
