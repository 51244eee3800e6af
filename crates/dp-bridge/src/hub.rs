//! Broadcast Hub (spec.md §4.8): fans persisted-state changes out to
//! `/stream` subscribers. Each subscriber gets its own bounded queue rather
//! than a shared channel, mirroring the `Arc<Mutex<Vec<Sender>>>` registry
//! shape used for the webhook dispatch queues, extended with per-kind
//! coalescing so a slow reader drops stale state instead of blocking.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dp_core::types::StreamMessage;
use tokio::sync::Notify;

fn kind_of(msg: &StreamMessage) -> &'static str {
    match msg {
        StreamMessage::Initial { .. } => "initial",
        StreamMessage::Event { .. } => "event",
        StreamMessage::Projects { .. } => "projects",
        StreamMessage::Sessions { .. } => "sessions",
        StreamMessage::Devlogs { .. } => "devlogs",
        StreamMessage::Topology { .. } => "topology",
        StreamMessage::Conflicts { .. } => "conflicts",
        StreamMessage::Alerts { .. } => "alerts",
    }
}

struct SubscriberState {
    queue: Mutex<VecDeque<StreamMessage>>,
    notify: Notify,
    project_filter: Option<String>,
    capacity: usize,
}

impl SubscriberState {
    fn push(&self, msg: StreamMessage) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            let kind = kind_of(&msg);
            if let Some(pos) = queue.iter().position(|m| kind_of(m) == kind) {
                queue.remove(pos);
            } else {
                queue.pop_front();
            }
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }
}

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<u64, Arc<SubscriberState>>>,
    next_id: AtomicU64,
    buffer_capacity: usize,
}

/// A live subscription. Dropping it unregisters the subscriber from the hub.
pub struct Subscription {
    id: u64,
    state: Arc<SubscriberState>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    /// Waits for and returns the next queued message, oldest first.
    pub async fn recv(&self) -> StreamMessage {
        loop {
            {
                let mut queue = self.state.queue.lock().unwrap();
                if let Some(msg) = queue.pop_front() {
                    return msg;
                }
            }
            self.state.notify.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.subscribers.lock().unwrap().remove(&self.id);
    }
}

impl BroadcastHub {
    pub fn new(buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_capacity,
        })
    }

    /// Registers a subscriber. `project_filter`, when set, restricts
    /// per-event notifications (see `publish_event`) to that project; state
    /// snapshots (`publish`) are never filtered.
    pub fn subscribe(self: &Arc<Self>, project_filter: Option<String>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriberState {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            project_filter,
            capacity: self.buffer_capacity,
        });
        self.subscribers.lock().unwrap().insert(id, state.clone());
        Subscription { id, state, hub: self.clone() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Broadcasts a message unconditionally to every subscriber.
    pub fn publish(&self, msg: StreamMessage) {
        let subs = self.subscribers.lock().unwrap();
        for s in subs.values() {
            s.push(msg.clone());
        }
    }

    /// Broadcasts an `event` message, evaluating each subscriber's project
    /// filter sender-side per spec.md §4.8.
    pub fn publish_event(&self, event: dp_core::types::HookEvent, project_name: &str) {
        let subs = self.subscribers.lock().unwrap();
        for s in subs.values() {
            if let Some(filter) = &s.project_filter {
                if filter != project_name {
                    continue;
                }
            }
            s.push(StreamMessage::Event { data: event.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dp_core::types::{Project, SessionStatus, TestStatus};

    fn project() -> Project {
        Project {
            name: "p".into(),
            current_branch: None,
            active_sessions: 0,
            last_activity: 0,
            test_status: TestStatus::Unknown,
            test_summary: None,
            dev_servers: Vec::new(),
            deployment_status: None,
            github_status: None,
            health_score: 0.0,
            health_trend: 0,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let hub = BroadcastHub::new(8);
        let sub = hub.subscribe(None);
        hub.publish(StreamMessage::Projects { data: vec![project()] });
        let msg = sub.recv().await;
        assert!(matches!(msg, StreamMessage::Projects { .. }));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let hub = BroadcastHub::new(8);
        let sub = hub.subscribe(None);
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn project_filter_drops_non_matching_events() {
        let hub = BroadcastHub::new(8);
        let sub = hub.subscribe(Some("other".into()));
        let event = dp_core::types::HookEvent {
            id: 1,
            source_app: "app".into(),
            session_id: "s".into(),
            hook_event_type: dp_core::types::HookEventType::Notification,
            payload: serde_json::json!({}),
            summary: None,
            model_name: None,
            timestamp: 0,
            time_skew: false,
        };
        hub.publish_event(event, "p");
        hub.publish(StreamMessage::Sessions { data: vec![] });
        let msg = sub.recv().await;
        assert!(matches!(msg, StreamMessage::Sessions { .. }));
    }

    #[tokio::test]
    async fn full_queue_coalesces_same_kind() {
        let hub = BroadcastHub::new(1);
        let sub = hub.subscribe(None);
        hub.publish(StreamMessage::Sessions { data: vec![] });
        let _ = SessionStatus::Active;
        hub.publish(StreamMessage::Sessions { data: vec![] });
        assert_eq!(sub.state.queue.lock().unwrap().len(), 1);
    }
}
