//! Event queue and batch sender.
//!
//! Request-handling tasks push events into an unbounded FIFO queue;
//! a single background task drains up to one batch per tick and ships
//! it to the collector. Delivery is at-most-once: a failed batch is
//! dropped, never requeued. Nothing here blocks or fails the caller.

use crate::app_config::ConfigManager;
use crate::client::CollectorApi;
use crate::event::Event;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Fixed period of the background drain job.
const BATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum spacing between attempts to start the background job.
const SCHEDULE_RETRY_COOLDOWN_MINUTES: i64 = 5;

/// Owns the delivery queue and the background drain job.
///
/// The job is a per-agent singleton: `ensure_scheduled` is safe to call
/// from every sampled event and spawns at most one task.
pub(crate) struct EventBatcher {
    tx: mpsc::UnboundedSender<Event>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    scheduled: AtomicBool,
    stopped: AtomicBool,
    last_job_run: Arc<RwLock<DateTime<Utc>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    batch_size: usize,
    client: Arc<dyn CollectorApi>,
    config_manager: Arc<ConfigManager>,
}

impl EventBatcher {
    pub(crate) fn new(
        batch_size: usize,
        client: Arc<dyn CollectorApi>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            receiver: Mutex::new(Some(rx)),
            scheduled: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            last_job_run: Arc::new(RwLock::new(DateTime::<Utc>::UNIX_EPOCH)),
            task: Mutex::new(None),
            batch_size,
            client,
            config_manager,
        }
    }

    /// Hand an event to the delivery queue.
    ///
    /// Never blocks and never errors toward the caller; a closed queue
    /// drops the event with a log line.
    pub(crate) fn enqueue(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("delivery queue closed; dropping event");
        }
    }

    /// Make sure the background job is running, returning whether it is.
    ///
    /// Called on the request path, so failures only log. A failed start
    /// (no runtime available) is retried on a later event once the
    /// cooldown has passed.
    pub(crate) fn ensure_scheduled(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        if self.scheduled.load(Ordering::Acquire) {
            return true;
        }

        let now = Utc::now();
        let retry_after = *self.last_job_run.read().unwrap_or_else(PoisonError::into_inner)
            + ChronoDuration::minutes(SCHEDULE_RETRY_COOLDOWN_MINUTES);
        if now <= retry_after {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(%error, "no async runtime; background batch job not started");
                *self.last_job_run.write().unwrap_or_else(PoisonError::into_inner) = now;
                return false;
            }
        };

        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Lost the race; the winner owns the job.
            return true;
        }

        let Some(rx) = self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            self.scheduled.store(false, Ordering::Release);
            return false;
        };

        *self.last_job_run.write().unwrap_or_else(PoisonError::into_inner) = now;
        let job = run_drain_loop(
            rx,
            self.batch_size,
            Arc::clone(&self.client),
            Arc::clone(&self.config_manager),
            Arc::clone(&self.last_job_run),
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(runtime.spawn(job));
        tracing::debug!(interval_secs = BATCH_INTERVAL.as_secs(), "background batch job scheduled");
        true
    }

    /// Cancel the background job. Queued events are lost; the queue
    /// stays closed for good.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.scheduled.store(false, Ordering::Release);
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
            tracing::debug!("background batch job cancelled");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_task(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }
}

impl Drop for EventBatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// The background job: one drain per tick, single-flight by
/// construction (ticks are awaited in sequence on one task).
async fn run_drain_loop(
    mut rx: mpsc::UnboundedReceiver<Event>,
    batch_size: usize,
    client: Arc<dyn CollectorApi>,
    config_manager: Arc<ConfigManager>,
    last_job_run: Arc<RwLock<DateTime<Utc>>>,
) {
    let mut ticker = tokio::time::interval(BATCH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let batch = drain_ready(&mut rx, batch_size);
        if batch.is_empty() {
            continue;
        }
        let etag = transmit(client.as_ref(), batch).await;
        // The run reports its timestamp whether or not delivery worked;
        // job liveness is tracked independently of transport health.
        *last_job_run.write().unwrap_or_else(PoisonError::into_inner) = Utc::now();
        config_manager.on_batch_result(etag, client.as_ref()).await;
    }
}

/// Pop up to `batch_size` queued events without waiting for more.
fn drain_ready(rx: &mut mpsc::UnboundedReceiver<Event>, batch_size: usize) -> Vec<Event> {
    let mut batch = Vec::new();
    while batch.len() < batch_size {
        match rx.try_recv() {
            Ok(event) => batch.push(event),
            Err(_) => break,
        }
    }
    batch
}

/// Ship one batch. Failure drops the events: delivery is at-most-once.
async fn transmit(client: &dyn CollectorApi, batch: Vec<Event>) -> Option<String> {
    let count = batch.len();
    match client.create_events_batch(&batch).await {
        Ok(response) => {
            tracing::debug!(count, "delivered event batch");
            response.config_etag
        }
        Err(error) => {
            tracing::warn!(%error, count, "failed to deliver event batch; events dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockCollector;
    use crate::event::{EventRequest, EventResponse};
    use std::collections::HashMap;

    fn event(tag: &str) -> Event {
        let request = EventRequest {
            time: Utc::now(),
            uri: format!("https://api.example.com/{tag}"),
            verb: "GET".to_string(),
            api_version: None,
            ip_address: None,
            headers: HashMap::new(),
            body: None,
            transfer_encoding: None,
        };
        let response = EventResponse {
            time: Utc::now(),
            status: 200,
            headers: HashMap::new(),
            body: None,
            transfer_encoding: None,
        };
        Event::new(request, response)
    }

    fn batcher(batch_size: usize, collector: Arc<MockCollector>) -> Arc<EventBatcher> {
        Arc::new(EventBatcher::new(
            batch_size,
            collector,
            Arc::new(ConfigManager::new()),
        ))
    }

    #[test]
    fn test_drain_preserves_fifo_order_in_batches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..60 {
            tx.send(event(&i.to_string())).unwrap();
        }

        let first = drain_ready(&mut rx, 25);
        let second = drain_ready(&mut rx, 25);
        let third = drain_ready(&mut rx, 25);
        let fourth = drain_ready(&mut rx, 25);

        assert_eq!(first.len(), 25);
        assert_eq!(second.len(), 25);
        assert_eq!(third.len(), 10);
        assert!(fourth.is_empty());

        assert!(first[0].request.uri.ends_with("/0"));
        assert!(first[24].request.uri.ends_with("/24"));
        assert!(second[0].request.uri.ends_with("/25"));
        assert!(third[9].request.uri.ends_with("/59"));
    }

    #[tokio::test]
    async fn test_transmit_reports_etag_on_success() {
        let collector = MockCollector::new();
        collector.set_batch_etag(Some("v7"));
        let etag = transmit(&collector, vec![event("a")]).await;
        assert_eq!(etag.as_deref(), Some("v7"));
        assert_eq!(collector.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn test_transmit_drops_batch_on_failure() {
        let collector = MockCollector::new();
        collector.fail_batches.store(true, Ordering::SeqCst);
        let etag = transmit(&collector, vec![event("a"), event("b")]).await;
        assert!(etag.is_none());
        assert!(collector.batch_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_job_drains_in_batches() {
        let collector = Arc::new(MockCollector::new());
        let batcher = batcher(25, Arc::clone(&collector));

        assert!(batcher.ensure_scheduled());
        for i in 0..60 {
            batcher.enqueue(event(&i.to_string()));
        }

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(collector.batch_sizes(), vec![25, 25, 10]);

        let batches = collector.batches.lock().unwrap();
        assert!(batches[0][0].request.uri.ends_with("/0"));
        assert!(batches[2][9].request.uri.ends_with("/59"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_makes_no_network_call() {
        let collector = Arc::new(MockCollector::new());
        let batcher = batcher(25, Arc::clone(&collector));

        assert!(batcher.ensure_scheduled());
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(collector.batch_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_survives_transport_failures() {
        let collector = Arc::new(MockCollector::new());
        let batcher = batcher(25, Arc::clone(&collector));
        assert!(batcher.ensure_scheduled());

        collector.fail_batches.store(true, Ordering::SeqCst);
        batcher.enqueue(event("lost"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(collector.batch_sizes().is_empty());

        // The failed batch is gone, but the job keeps running.
        collector.fail_batches.store(false, Ordering::SeqCst);
        batcher.enqueue(event("delivered"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(collector.batch_sizes(), vec![1]);
        assert!(collector.batches.lock().unwrap()[0][0]
            .request
            .uri
            .ends_with("/delivered"));
    }

    #[tokio::test]
    async fn test_job_is_a_singleton() {
        let collector = Arc::new(MockCollector::new());
        let batcher = batcher(25, collector);

        let (a, b) = tokio::join!(
            {
                let batcher = Arc::clone(&batcher);
                async move { batcher.ensure_scheduled() }
            },
            {
                let batcher = Arc::clone(&batcher);
                async move { batcher.ensure_scheduled() }
            }
        );

        assert!(a && b);
        assert!(batcher.has_task());
        // The receiver was claimed exactly once.
        assert!(batcher.receiver.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_prevents_rescheduling() {
        let collector = Arc::new(MockCollector::new());
        let batcher = batcher(25, collector);
        assert!(batcher.ensure_scheduled());

        batcher.stop();
        assert!(!batcher.ensure_scheduled());
        // Enqueue after stop is silent.
        batcher.enqueue(event("late"));
    }
}
