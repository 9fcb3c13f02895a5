//! Topology-change event broadcaster backing `GET /events?since=rv`.
//!
//! Mirrors the agent-side event bus (`mesh_core::events`) in spirit — a single
//! ordered stream of topology changes — but server-side: a bounded backlog
//! keyed by `resource_version` so a late subscriber can catch up, plus a
//! `tokio::sync::broadcast` channel for anyone waiting on the next event.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

const BACKLOG_CAPACITY: usize = 1024;

/// One topology change, as appended to the backlog and broadcast live.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyEvent {
    pub resource_version: u64,
    pub namespace: String,
    pub agent_id: String,
    pub capability: Option<String>,
    pub kind: TopologyEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyEventKind {
    AgentRegistered,
    AgentUpdated,
    AgentStatusChanged,
    AgentRemoved,
}

/// Fan-out point for topology events: a bounded backlog for replay-since plus
/// a broadcast channel for long-poll waiters.
pub struct EventBroadcaster {
    backlog: Mutex<VecDeque<TopologyEvent>>,
    sender: broadcast::Sender<TopologyEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            backlog: Mutex::new(VecDeque::with_capacity(BACKLOG_CAPACITY)),
            sender,
        }
    }

    pub fn publish(&self, event: TopologyEvent) {
        let mut backlog = self.backlog.lock().expect("event backlog lock poisoned");
        if backlog.len() >= BACKLOG_CAPACITY {
            backlog.pop_front();
        }
        backlog.push_back(event.clone());
        drop(backlog);
        // No active subscribers is a normal, not an error, state.
        let _ = self.sender.send(event);
    }

    /// Events with `resource_version > since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<TopologyEvent> {
        self.backlog
            .lock()
            .expect("event backlog lock poisoned")
            .iter()
            .filter(|e| e.resource_version > since)
            .cloned()
            .collect()
    }

    /// Long-poll: return buffered events newer than `since` immediately if any
    /// exist, otherwise wait up to `wait` for the next publish before
    /// returning (possibly empty) to keep the connection from hanging forever.
    pub async fn poll(&self, since: u64, wait: Duration) -> Vec<TopologyEvent> {
        let buffered = self.since(since);
        if !buffered.is_empty() {
            return buffered;
        }

        let mut rx = self.sender.subscribe();
        match timeout(wait, rx.recv()).await {
            Ok(Ok(_)) => self.since(since),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(rv: u64) -> TopologyEvent {
        TopologyEvent {
            resource_version: rv,
            namespace: "default".to_string(),
            agent_id: "hello".to_string(),
            capability: Some("greeting".to_string()),
            kind: TopologyEventKind::AgentRegistered,
        }
    }

    #[test]
    fn since_filters_to_newer_events_only() {
        let bus = EventBroadcaster::new();
        bus.publish(event(1));
        bus.publish(event(2));
        bus.publish(event(3));

        let result = bus.since(1);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].resource_version, 2);
        assert_eq!(result[1].resource_version, 3);
    }

    #[tokio::test]
    async fn poll_returns_immediately_when_backlog_has_newer_events() {
        let bus = EventBroadcaster::new();
        bus.publish(event(1));

        let result = bus.poll(0, Duration::from_secs(5)).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn poll_times_out_to_empty_when_nothing_new_arrives() {
        let bus = EventBroadcaster::new();
        bus.publish(event(1));

        let result = bus.poll(1, Duration::from_millis(50)).await;
        assert!(result.is_empty());
    }
}
