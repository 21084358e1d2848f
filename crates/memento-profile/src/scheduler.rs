//! Periodic profile rebuilds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use memento_storage::ProfileCache;

use crate::builder::{BuildOutcome, ProfileBuilder};

/// Wait before retrying a build that was skipped or failed.
const RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// Background loop that rebuilds the profile once per `interval`.
///
/// The next run is due `interval` after the cached profile's `built_at`, so
/// restarts do not reset the schedule. With no profile yet the first build
/// runs right away.
pub struct ProfileScheduler {
    builder: Arc<ProfileBuilder>,
    interval: Duration,
}

impl ProfileScheduler {
    pub fn new(builder: Arc<ProfileBuilder>, interval: Duration) -> Self {
        Self { builder, interval }
    }

    /// Time until the next build is due.
    pub async fn next_delay(&self) -> Duration {
        let current = match self.builder.cache().current(self.builder.scope()).await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Could not read cached profile; building now");
                return Duration::ZERO;
            }
        };
        let Some(profile) = current else {
            return Duration::ZERO;
        };

        let elapsed = (Utc::now() - profile.built_at).to_std().unwrap_or(Duration::ZERO);
        self.interval.saturating_sub(elapsed)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Profile scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = self.next_delay().await;
            debug!(delay_secs = delay.as_secs(), "Next profile build scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let retry = match self.builder.run().await {
                Ok(BuildOutcome::Published { .. }) => None,
                Ok(BuildOutcome::Skipped { .. }) | Err(_) => Some(RETRY_AFTER.min(self.interval)),
            };

            if let Some(wait) = retry {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Profile scheduler stopped");
    }
}
