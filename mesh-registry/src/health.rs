//! Periodic health sweep (§4.1 "Health monitor").
//!
//! Agents silent for `3 × heartbeat_interval` move to `unhealthy`; silent for
//! `10 × heartbeat_interval` move to `offline` and drop out of resolution
//! (invariant 2). Both thresholds are evaluated per agent against its own
//! declared interval, not a global constant, since agents may heartbeat at
//! different rates.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::events::{EventBroadcaster, TopologyEvent, TopologyEventKind};
use crate::model::AgentStatus;
use crate::store::Store;

pub const UNHEALTHY_MULTIPLIER: u64 = 3;
pub const OFFLINE_MULTIPLIER: u64 = 10;

/// One sweep pass over every known agent; returns the number of status
/// transitions applied, so callers (and tests) can observe sweep effects
/// without depending on timing.
pub fn sweep_once(store: &Store, events: &EventBroadcaster, now_ms: u64) -> usize {
    let mut transitions = 0;

    for agent in store.all() {
        if matches!(agent.status, AgentStatus::Offline) {
            continue;
        }

        let interval_ms = agent.heartbeat_interval_s.max(1) * 1_000;
        let silent_for_ms = now_ms.saturating_sub(agent.last_seen_ms);

        let next_status = if silent_for_ms > interval_ms * OFFLINE_MULTIPLIER {
            Some(AgentStatus::Offline)
        } else if silent_for_ms > interval_ms * UNHEALTHY_MULTIPLIER {
            if matches!(agent.status, AgentStatus::Unhealthy) {
                None
            } else {
                Some(AgentStatus::Unhealthy)
            }
        } else {
            None
        };

        if let Some(status) = next_status {
            debug!(
                agent_id = %agent.agent_id,
                silent_for_ms,
                from = agent.status.as_str(),
                to = status.as_str(),
                "health sweep transitioning agent"
            );
            store.set_status(&agent.agent_id, status);
            events.publish(TopologyEvent {
                resource_version: store.current_resource_version(),
                namespace: agent.namespace.clone(),
                agent_id: agent.agent_id.clone(),
                capability: None,
                kind: TopologyEventKind::AgentStatusChanged,
            });
            transitions += 1;
        }
    }

    transitions
}

/// Spawns the sweep loop on the current tokio runtime. Runs until the
/// process exits; there is no shutdown handle because the sweep has no
/// external resources to release (it only reads/writes the in-memory store).
pub async fn run(store: Arc<Store>, events: Arc<EventBroadcaster>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    info!(interval_s = interval.as_secs(), "health sweep started");
    loop {
        ticker.tick().await;
        let now_ms = crate::config::now_ms();
        let transitions = sweep_once(&store, &events, now_ms);
        if transitions > 0 {
            debug!(transitions, "health sweep applied transitions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HeartbeatRequest;

    fn register(store: &Store, agent_id: &str, heartbeat_interval_s: u64, now_ms: u64) {
        let req = HeartbeatRequest {
            agent_id: agent_id.to_string(),
            name: Some(agent_id.to_string()),
            version: "1.0.0".to_string(),
            http_host: "localhost".to_string(),
            http_port: 9000,
            namespace: "default".to_string(),
            status: "healthy".to_string(),
            tools: vec![],
            heartbeat_interval: heartbeat_interval_s,
            content_hash: "hash".to_string(),
        };
        store.register(&req, now_ms).unwrap();
        store.set_status(agent_id, AgentStatus::Healthy);
    }

    #[test]
    fn agent_past_3x_interval_becomes_unhealthy() {
        let store = Store::new();
        let events = EventBroadcaster::new();
        register(&store, "hello", 5, 0);

        // default heartbeat_interval_s in Store::register is 5s when unset.
        let transitions = sweep_once(&store, &events, 3 * 5_000 + 1);
        assert_eq!(transitions, 1);
        assert_eq!(store.get("hello").unwrap().status, AgentStatus::Unhealthy);
    }

    #[test]
    fn agent_past_10x_interval_becomes_offline_and_excluded() {
        let store = Store::new();
        let events = EventBroadcaster::new();
        register(&store, "hello", 5, 0);

        sweep_once(&store, &events, 10 * 5_000 + 1);
        assert_eq!(store.get("hello").unwrap().status, AgentStatus::Offline);
    }

    #[test]
    fn fresh_agent_is_left_healthy() {
        let store = Store::new();
        let events = EventBroadcaster::new();
        register(&store, "hello", 5, 1_000);

        let transitions = sweep_once(&store, &events, 1_500);
        assert_eq!(transitions, 0);
        assert_eq!(store.get("hello").unwrap().status, AgentStatus::Healthy);
    }
}
