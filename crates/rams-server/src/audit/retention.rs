//! Scheduled retention cleanup

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::service::AuditService;

/// Retention schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Records older than this many days are purged; 0 disables the task
    pub days_to_keep: i64,
    pub interval: Duration,
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.days_to_keep > 0
    }
}

/// Spawn the retention loop, or return `None` when retention is disabled.
///
/// The first purge runs after one full interval. The task exits when
/// `shutdown` changes or its sender is dropped.
pub fn spawn_retention(
    service: AuditService,
    config: RetentionConfig,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.is_enabled() {
        tracing::info!("Audit retention disabled");
        return None;
    }
    Some(tokio::spawn(run_retention(service, config, shutdown)))
}

async fn run_retention(service: AuditService, config: RetentionConfig, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        days_to_keep = config.days_to_keep,
        interval_secs = config.interval.as_secs(),
        "Audit retention started"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Audit retention shutting down");
                return;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        match service.purge_expired(config.days_to_keep).await {
            Ok(0) => {},
            Ok(n) => tracing::info!(deleted = n, "Audit retention purged records"),
            Err(e) => tracing::error!(error = %e, "Audit retention failed"),
        }
    }
}
