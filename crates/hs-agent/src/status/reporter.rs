//! Heartbeat and event-driven status reporter

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use hs_core::{EventBus, HostEvent, StatusSignal};

use crate::auth::{ApiRequest, AuthClient, ClientError};

/// Capacity of the explicit status update queue.
///
/// Updates beyond this many pending entries are dropped rather than
/// blocking the caller that noticed the status change.
pub const STATUS_QUEUE_CAPACITY: usize = 10;

/// Delivers a status signal to the coordinator
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, signal: StatusSignal) -> Result<(), ClientError>;
}

/// Answers whether a session is currently active
pub trait SessionActivity: Send + Sync {
    fn session_active(&self) -> bool;
}

/// Publishes through the authenticated client as
/// `PATCH /api/v1/hosts/{id}/status` with a JSON string body
pub struct CoordinatorStatusPublisher {
    client: Arc<AuthClient>,
    host_id: String,
}

impl CoordinatorStatusPublisher {
    pub fn new(client: Arc<AuthClient>, host_id: impl Into<String>) -> Self {
        Self {
            client,
            host_id: host_id.into(),
        }
    }
}

#[async_trait]
impl StatusPublisher for CoordinatorStatusPublisher {
    async fn publish(&self, signal: StatusSignal) -> Result<(), ClientError> {
        let req = ApiRequest::patch(format!("/api/v1/hosts/{}/status", self.host_id))
            .protected()
            .json(signal.api_name())?;
        self.client.execute_ok(req).await
    }
}

/// Reports host availability on a fixed heartbeat plus explicit updates
///
/// Explicit updates and heartbeat ticks are handled by one loop in arrival
/// order. While a session is active, heartbeat ticks do not report
/// `Available`.
pub struct StatusReporter {
    tx: mpsc::Sender<StatusSignal>,
    rx: Mutex<Option<mpsc::Receiver<StatusSignal>>>,
    publisher: Arc<dyn StatusPublisher>,
    activity: Arc<dyn SessionActivity>,
    interval: Duration,
    cancel: CancellationToken,
    events: EventBus,
}

impl StatusReporter {
    pub fn new(
        publisher: Arc<dyn StatusPublisher>,
        activity: Arc<dyn SessionActivity>,
        interval: Duration,
        parent: &CancellationToken,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::channel(STATUS_QUEUE_CAPACITY);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            publisher,
            activity,
            interval,
            cancel: parent.child_token(),
            events,
        }
    }

    /// Spawn the report loop. Returns `None` if it was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().ok().and_then(|mut guard| guard.take())?;

        let worker = Worker {
            publisher: Arc::clone(&self.publisher),
            activity: Arc::clone(&self.activity),
            events: self.events.clone(),
        };
        Some(tokio::spawn(worker.run(
            rx,
            self.interval,
            self.cancel.clone(),
        )))
    }

    /// Stop the report loop. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Queue an immediate report. Returns `false` if the update was dropped
    /// because the queue is full or the reporter has stopped.
    pub fn update_status(&self, signal: StatusSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!("Status queue full, dropping {} update", signal);
                false
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                tracing::debug!("Status reporter stopped, dropping {} update", signal);
                false
            }
        }
    }

    /// Number of queued updates not yet handled
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Report directly, bypassing the queue. Used for the final `Offline`
    /// report at shutdown.
    pub async fn send_now(&self, signal: StatusSignal) -> bool {
        let worker = Worker {
            publisher: Arc::clone(&self.publisher),
            activity: Arc::clone(&self.activity),
            events: self.events.clone(),
        };
        worker.send(signal).await
    }
}

struct Worker {
    publisher: Arc<dyn StatusPublisher>,
    activity: Arc<dyn SessionActivity>,
    events: EventBus,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<StatusSignal>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            "Starting status reporter (heartbeat every {}s)",
            interval.as_secs()
        );

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Status reporter stopped");
                    break;
                }
                Some(signal) = rx.recv() => {
                    self.send(signal).await;
                }
                _ = ticker.tick() => {
                    if self.activity.session_active() {
                        tracing::trace!("Session active, skipping heartbeat");
                        continue;
                    }
                    self.send(StatusSignal::Available).await;
                }
            }
        }
    }

    async fn send(&self, signal: StatusSignal) -> bool {
        let delivered = match self.publisher.publish(signal).await {
            Ok(()) => {
                tracing::info!("Status updated to {}", signal);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send {} status: {}", signal, e);
                false
            }
        };
        self.events
            .publish(HostEvent::StatusReported { signal, delivered });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<StatusSignal>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<StatusSignal> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusPublisher for Recorder {
        async fn publish(&self, signal: StatusSignal) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(signal);
            Ok(())
        }
    }

    struct Activity(AtomicBool);

    impl SessionActivity for Activity {
        fn session_active(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn reporter(active: bool) -> (StatusReporter, Arc<Recorder>, Arc<Activity>) {
        let recorder = Arc::new(Recorder::default());
        let activity = Arc::new(Activity(AtomicBool::new(active)));
        let reporter = StatusReporter::new(
            recorder.clone(),
            activity.clone(),
            Duration::from_secs(120),
            &CancellationToken::new(),
            EventBus::new(),
        );
        (reporter, recorder, activity)
    }

    #[tokio::test]
    async fn test_queue_drops_beyond_capacity() {
        let (reporter, _, _) = reporter(false);
        let accepted = (0..12)
            .filter(|_| reporter.update_status(StatusSignal::InUse))
            .count();
        assert_eq!(accepted, STATUS_QUEUE_CAPACITY);
        assert_eq!(reporter.pending(), STATUS_QUEUE_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_available_when_idle() {
        let (reporter, recorder, _) = reporter(false);
        reporter.start().unwrap();

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(recorder.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.sent(), vec![StatusSignal::Available]);
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_suppressed_while_session_active() {
        let (reporter, recorder, activity) = reporter(true);
        reporter.start().unwrap();

        assert!(reporter.update_status(StatusSignal::InUse));
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(recorder.sent(), vec![StatusSignal::InUse]);

        activity.0.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            recorder.sent(),
            vec![StatusSignal::InUse, StatusSignal::Available]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_updates_keep_arrival_order() {
        let (reporter, recorder, _) = reporter(false);
        reporter.update_status(StatusSignal::InUse);
        reporter.update_status(StatusSignal::Available);
        reporter.start().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            recorder.sent(),
            vec![StatusSignal::InUse, StatusSignal::Available]
        );
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let (reporter, _, _) = reporter(false);
        let handle = reporter.start().unwrap();
        assert!(reporter.start().is_none());

        reporter.stop();
        reporter.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_now_bypasses_queue() {
        let (reporter, recorder, _) = reporter(true);
        assert!(reporter.send_now(StatusSignal::Offline).await);
        assert_eq!(recorder.sent(), vec![StatusSignal::Offline]);
    }
}
