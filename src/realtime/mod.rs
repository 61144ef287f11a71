//! Realtime Updates Service
//!
//! Fan-out of job state transitions to subscribers without coupling the
//! engine to any transport. Delivery is at-most-once per event per
//! subscriber: an unready sink gets a short-lived buffer, buffered events
//! past the max age are dropped, and no replay happens - except the terminal
//! event of a job, which is retained so a late subscriber still sees how the
//! job ended exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use tokio::sync::mpsc;

use crate::domain::StageEvent;
use crate::id::{generate_subscription_id, now_ms};

/// Configuration for subscriber buffering
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Channel capacity per subscriber
    pub channel_capacity: usize,
    /// Buffered events older than this are dropped (at-most-once)
    pub max_buffer_age_ms: i64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            max_buffer_age_ms: 30_000,
        }
    }
}

/// Handle identifying one subscription; used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: String,
    pub job_id: String,
}

struct Subscription {
    id: String,
    sender: mpsc::Sender<StageEvent>,
    /// Events that could not be delivered immediately, with buffer timestamps
    buffer: Mutex<VecDeque<(StageEvent, i64)>>,
    #[allow(dead_code)]
    created_at: i64,
}

impl Subscription {
    /// Flush buffered events (oldest first), dropping entries past max age.
    /// Returns false if the sink is gone.
    fn flush(&self, max_age_ms: i64) -> bool {
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(_) => return false,
        };

        let cutoff = now_ms() - max_age_ms;
        while let Some((event, buffered_at)) = buffer.front().cloned() {
            if buffered_at < cutoff && !event.is_terminal() {
                // Too old, at-most-once means we drop rather than replay
                buffer.pop_front();
                continue;
            }
            match self.sender.try_send(event) {
                Ok(()) => {
                    buffer.pop_front();
                }
                Err(mpsc::error::TrySendError::Full(_)) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    /// Deliver one event, buffering on a momentarily full sink.
    /// Returns false if the sink is gone.
    fn deliver(&self, event: StageEvent, max_age_ms: i64) -> bool {
        if !self.flush(max_age_ms) {
            return false;
        }

        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(_) => return false,
        };

        if !buffer.is_empty() {
            // Preserve per-job ordering behind already-buffered events
            buffer.push_back((event, now_ms()));
            return true;
        }

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                buffer.push_back((event, now_ms()));
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn has_pending(&self) -> bool {
        self.buffer.lock().map(|b| !b.is_empty()).unwrap_or(false)
    }
}

/// Fan-out hub for job state-change events
pub struct UpdateHub {
    config: RealtimeConfig,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    /// Terminal event per job, retained until the job is garbage-collected
    terminal_events: RwLock<HashMap<String, StageEvent>>,
}

impl UpdateHub {
    /// Create a hub with the given buffering configuration.
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            terminal_events: RwLock::new(HashMap::new()),
        }
    }

    /// Register interest in a job's events.
    ///
    /// If the job already reached a terminal status, the retained terminal
    /// event is delivered immediately (exactly once for this subscriber).
    pub fn subscribe(&self, job_id: &str) -> (SubscriptionHandle, mpsc::Receiver<StageEvent>) {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        let id = generate_subscription_id();

        if let Some(terminal) = self
            .terminal_events
            .read()
            .ok()
            .and_then(|events| events.get(job_id).cloned())
        {
            // Capacity is at least 1, a fresh channel always accepts this
            let _ = sender.try_send(terminal);
        }

        let subscription = Subscription {
            id: id.clone(),
            sender,
            buffer: Mutex::new(VecDeque::new()),
            created_at: now_ms(),
        };

        if let Ok(mut subscriptions) = self.subscriptions.write() {
            subscriptions
                .entry(job_id.to_string())
                .or_default()
                .push(subscription);
        }

        (
            SubscriptionHandle {
                id,
                job_id: job_id.to_string(),
            },
            receiver,
        )
    }

    /// Deliver an event to every live subscription for its job, in publish
    /// order. Closed sinks are pruned. Terminal events are retained for late
    /// subscribers.
    pub fn publish(&self, event: StageEvent) {
        if event.is_terminal() {
            if let Ok(mut terminal) = self.terminal_events.write() {
                terminal.insert(event.job_id.clone(), event.clone());
            }
        }

        let mut subscriptions = match self.subscriptions.write() {
            Ok(subscriptions) => subscriptions,
            Err(_) => return,
        };

        if let Some(sinks) = subscriptions.get_mut(&event.job_id) {
            sinks.retain(|sink| sink.deliver(event.clone(), self.config.max_buffer_age_ms));
            if sinks.is_empty() {
                subscriptions.remove(&event.job_id);
            }
        }
    }

    /// Remove a subscription. Idempotent: unknown handles are a no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            if let Some(sinks) = subscriptions.get_mut(&handle.job_id) {
                sinks.retain(|sink| sink.id != handle.id);
                if sinks.is_empty() {
                    subscriptions.remove(&handle.job_id);
                }
            }
        }
    }

    /// True while any subscriber for this job still has undelivered events.
    /// Garbage collection must not evict such a job.
    pub fn has_pending_delivery(&self, job_id: &str) -> bool {
        self.subscriptions
            .read()
            .map(|subscriptions| {
                subscriptions
                    .get(job_id)
                    .map(|sinks| sinks.iter().any(Subscription::has_pending))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Drop retained state for a garbage-collected job.
    pub fn forget_job(&self, job_id: &str) {
        if let Ok(mut terminal) = self.terminal_events.write() {
            terminal.remove(job_id);
        }
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            subscriptions.remove(job_id);
        }
    }

    /// Number of live subscriptions for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscriptions
            .read()
            .map(|subscriptions| subscriptions.get(job_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: &str) -> StageEvent {
        StageEvent::job_started(job_id)
    }

    fn terminal_event(job_id: &str) -> StageEvent {
        StageEvent {
            kind: crate::domain::event_kinds::JOB_SUCCEEDED.to_string(),
            job_id: job_id.to_string(),
            stage_index: None,
            layer: None,
            status: "succeeded".to_string(),
            timestamp: now_ms(),
            summary: None,
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let hub = UpdateHub::default();
        let (_handle, mut receiver) = hub.subscribe("job-1");

        hub.publish(event("job-1"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.job_id, "job-1");
    }

    #[tokio::test]
    async fn test_events_preserve_publish_order() {
        let hub = UpdateHub::default();
        let (_handle, mut receiver) = hub.subscribe("job-1");

        let mut first = event("job-1");
        first.status = "first".to_string();
        let mut second = event("job-1");
        second.status = "second".to_string();

        hub.publish(first);
        hub.publish(second);

        assert_eq!(receiver.recv().await.unwrap().status, "first");
        assert_eq!(receiver.recv().await.unwrap().status, "second");
    }

    #[tokio::test]
    async fn test_other_jobs_do_not_cross() {
        let hub = UpdateHub::default();
        let (_handle, mut receiver) = hub.subscribe("job-1");

        hub.publish(event("job-2"));
        hub.publish(event("job-1"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.job_id, "job-1");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_event_once() {
        let hub = UpdateHub::default();
        hub.publish(terminal_event("job-1"));

        let (_handle, mut receiver) = hub.subscribe("job-1");

        let received = receiver.recv().await.unwrap();
        assert!(received.is_terminal());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = UpdateHub::default();
        let (handle, _receiver) = hub.subscribe("job-1");

        assert_eq!(hub.subscriber_count("job-1"), 1);
        hub.unsubscribe(&handle);
        assert_eq!(hub.subscriber_count("job-1"), 0);
        hub.unsubscribe(&handle);
        assert_eq!(hub.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_closed_sink_is_pruned() {
        let hub = UpdateHub::default();
        let (_handle, receiver) = hub.subscribe("job-1");
        drop(receiver);

        hub.publish(event("job-1"));
        assert_eq!(hub.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_full_sink_buffers_then_flushes() {
        let hub = UpdateHub::new(RealtimeConfig {
            channel_capacity: 1,
            max_buffer_age_ms: 60_000,
        });
        let (_handle, mut receiver) = hub.subscribe("job-1");

        let mut first = event("job-1");
        first.status = "first".to_string();
        let mut second = event("job-1");
        second.status = "second".to_string();

        hub.publish(first);
        hub.publish(second); // channel full, goes to the buffer
        assert!(hub.has_pending_delivery("job-1"));

        assert_eq!(receiver.recv().await.unwrap().status, "first");

        // Next publish flushes the buffer first, keeping order
        let mut third = event("job-1");
        third.status = "third".to_string();
        hub.publish(third);

        assert_eq!(receiver.recv().await.unwrap().status, "second");
        assert_eq!(receiver.recv().await.unwrap().status, "third");
        assert!(!hub.has_pending_delivery("job-1"));
    }

    #[tokio::test]
    async fn test_stale_buffered_events_dropped() {
        let hub = UpdateHub::new(RealtimeConfig {
            channel_capacity: 1,
            max_buffer_age_ms: 0, // everything buffered is immediately stale
        });
        let (_handle, mut receiver) = hub.subscribe("job-1");

        let mut first = event("job-1");
        first.status = "first".to_string();
        let mut second = event("job-1");
        second.status = "second".to_string();

        hub.publish(first);
        hub.publish(second); // buffered

        assert_eq!(receiver.recv().await.unwrap().status, "first");

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // The buffered event aged out; only the new one arrives
        let mut third = event("job-1");
        third.status = "third".to_string();
        hub.publish(third);

        assert_eq!(receiver.recv().await.unwrap().status, "third");
    }

    #[tokio::test]
    async fn test_forget_job_drops_terminal_retention() {
        let hub = UpdateHub::default();
        hub.publish(terminal_event("job-1"));
        hub.forget_job("job-1");

        let (_handle, mut receiver) = hub.subscribe("job-1");
        assert!(receiver.try_recv().is_err());
    }
}
