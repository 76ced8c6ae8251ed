//! Background token refresher

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::client::AuthClient;

/// Periodically refreshes the credential before it expires
///
/// Runs until the parent cancellation token fires or [`stop`](Self::stop)
/// is called.
pub struct TokenRefresher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TokenRefresher {
    /// Spawn the refresher task. `check_interval` is the time between expiry
    /// checks; the first check happens one interval after start.
    pub fn spawn(
        client: Arc<AuthClient>,
        check_interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let handle = tokio::spawn(run(client, check_interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stop the refresher. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop and wait for the task to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Token refresher task failed: {}", e);
        }
    }
}

async fn run(client: Arc<AuthClient>, check_interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        "Starting token refresher (every {}s)",
        check_interval.as_secs()
    );

    let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Token refresher stopped");
                break;
            }
            _ = ticker.tick() => {
                match client.refresh_if_needed().await {
                    Ok(true) => tracing::debug!("Background refresh completed"),
                    Ok(false) => tracing::trace!("Access token still fresh"),
                    Err(e) => tracing::warn!("Background refresh failed: {}", e),
                }
            }
        }
    }
}
