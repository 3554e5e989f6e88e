//! Retention sweep: an absolute age ceiling on sessions.
//!
//! Age is measured from creation. Position updates do not extend a session's
//! life; a session that is still being listened to is stopped once it
//! crosses `max_age`, the same as an abandoned one.

use crate::events::StopReason;
use crate::sessions::SessionRegistry;
use mantraconf::RetentionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_age: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration, max_age: Duration) -> Self {
        Self {
            registry,
            interval,
            max_age,
        }
    }

    pub fn from_config(registry: Arc<SessionRegistry>, config: &RetentionConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.sweep_interval_secs),
            Duration::from_secs(config.max_session_age_secs),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// One pass over every session. Returns how many were stopped.
    #[tracing::instrument(skip(self), fields(sessions = self.registry.len()))]
    pub async fn sweep(&self) -> usize {
        let mut stopped = 0;
        for handle in self.registry.all() {
            let age = handle.age();
            if handle.is_active() && age <= self.max_age {
                continue;
            }

            match self.registry.stop(&handle.id, StopReason::Expired).await {
                Ok(report) => {
                    stopped += 1;
                    tracing::info!(
                        session.id = %handle.id,
                        age_secs = age.as_secs(),
                        released = report.released,
                        "Swept session"
                    );
                }
                // Stopped by someone else between listing and now.
                Err(e) => tracing::debug!(session.id = %handle.id, error = %e, "Skipping sweep"),
            }
        }

        if stopped > 0 {
            tracing::info!(stopped, remaining = self.registry.len(), "Retention sweep complete");
        }
        stopped
    }

    /// Run [`sweep`](Self::sweep) every `interval` until cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Retention sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}
