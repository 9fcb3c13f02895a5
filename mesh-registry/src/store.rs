//! Abstract key-ordered storage of agents and their capability index.
//!
//! Concurrency model (§5): one write lock per agent key. `dashmap`'s internal
//! sharding gives this directly — no hand-written `Mutex<HashMap<..>>` and no
//! shard management of our own, matching the ambient implementation note in
//! §4.1/§5.
//!
//! Persisted-state shape (§6): `agents/{namespace}/{name}` ⇒ `AgentRecord`;
//! `capabilities/{capability}` ⇒ set of agent ids. The capability collection
//! is a derived view — it is rebuilt from `agents` on every mutation rather
//! than persisted independently, so it can never drift out of sync.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};

use crate::error::StoreError;
use crate::model::{AgentRecord, AgentStatus, HeartbeatRequest, ToolRegistration};

/// Concurrent agent store plus its derived capability index.
pub struct Store {
    /// `agent_id` -> record. The primary collection.
    agents: DashMap<String, AgentRecord>,
    /// `(namespace, name)` -> `agent_id`, enforcing invariant 1's uniqueness.
    by_key: DashMap<(String, String), String>,
    /// `capability` -> set of `agent_id`s currently advertising it.
    by_capability: DashMap<String, DashSet<String>>,
    /// Monotonic counter; every accepted mutation is stamped with the next value.
    resource_version: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            by_key: DashMap::new(),
            by_capability: DashMap::new(),
            resource_version: AtomicU64::new(0),
        }
    }

    pub fn current_resource_version(&self) -> u64 {
        self.resource_version.load(Ordering::SeqCst)
    }

    fn bump_resource_version(&self) -> u64 {
        self.resource_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register or conditionally re-register an agent (§4.1's `POST /agents`
    /// and `POST /agents/{id}/heartbeat` share this path).
    ///
    /// Returns `(record, changed)`; `changed` is `false` when the content hash
    /// matches the stored record, in which case only `last_seen`/`status` are
    /// refreshed and `resource_version` is not bumped (scenario C).
    pub fn register(&self, req: &HeartbeatRequest, now_ms: u64) -> Result<(AgentRecord, bool), StoreError> {
        if req.agent_id.trim().is_empty() {
            return Err(StoreError::InvalidSpec("agent_id must not be empty".to_string()));
        }
        if req.namespace.trim().is_empty() {
            return Err(StoreError::InvalidSpec("namespace must not be empty".to_string()));
        }

        let key = (req.namespace.clone(), req.agent_name().to_string());

        if let Some(held_by) = self.by_key.get(&key) {
            if *held_by != req.agent_id {
                return Err(StoreError::ConflictingRegistration {
                    namespace: key.0,
                    name: key.1,
                    held_by: held_by.clone(),
                });
            }
        }

        let status = AgentStatus::from_str_lenient(&req.status);

        if let Some(mut existing) = self.agents.get_mut(&req.agent_id) {
            if existing.content_hash == req.content_hash {
                existing.last_seen_ms = now_ms;
                existing.status = status;
                return Ok((existing.clone(), false));
            }
        }

        let resource_version = self.bump_resource_version();
        let record = AgentRecord {
            agent_id: req.agent_id.clone(),
            name: req.agent_name().to_string(),
            namespace: req.namespace.clone(),
            version: req.version.clone(),
            http_host: req.http_host.clone(),
            http_port: req.http_port,
            status,
            last_seen_ms: now_ms,
            resource_version,
            heartbeat_interval_s: req.heartbeat_interval.max(1),
            tools: req.tools.clone(),
            content_hash: req.content_hash.clone(),
        };

        self.by_key.insert(key, record.agent_id.clone());
        self.reindex_capabilities(&record.agent_id, &record.tools);
        self.agents.insert(record.agent_id.clone(), record.clone());

        Ok((record, true))
    }

    /// Record an externally-observed liveness ping (`HEAD /agents/{id}`)
    /// without touching `resource_version` or tool registrations.
    pub fn touch(&self, agent_id: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()))?;
        record.last_seen_ms = now_ms;
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|r| r.clone())
    }

    pub fn remove(&self, agent_id: &str) -> Option<AgentRecord> {
        let (_, record) = self.agents.remove(agent_id)?;
        self.by_key.remove(&record.key());
        for cap_entry in self.by_capability.iter() {
            cap_entry.value().remove(agent_id);
        }
        Some(record)
    }

    /// Transition an agent's status (used by the health sweep). Does not bump
    /// `resource_version` — health transitions are topology events, not
    /// content changes (§4.1's health monitor).
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Option<AgentRecord> {
        let mut record = self.agents.get_mut(agent_id)?;
        record.status = status;
        Some(record.clone())
    }

    /// All agents currently known, in no particular order.
    pub fn all(&self) -> Vec<AgentRecord> {
        self.agents.iter().map(|r| r.value().clone()).collect()
    }

    /// Candidates advertising `capability`, restricted to resolvable status
    /// (invariant 2). Each `(agent, tool)` pair is one candidate.
    pub fn candidates_for_capability(&self, capability: &str) -> Vec<(AgentRecord, ToolRegistration)> {
        let Some(ids) = self.by_capability.get(capability) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for id in ids.iter() {
            let Some(record) = self.agents.get(id.key()) else { continue };
            if !record.status.is_resolvable() {
                continue;
            }
            for tool in &record.tools {
                if tool.capability == capability {
                    out.push((record.clone(), tool.clone()));
                }
            }
        }
        out
    }

    fn reindex_capabilities(&self, agent_id: &str, tools: &[ToolRegistration]) {
        for cap_entry in self.by_capability.iter() {
            cap_entry.value().remove(agent_id);
        }
        for tool in tools {
            self.by_capability
                .entry(tool.capability.clone())
                .or_default()
                .insert(agent_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(agent_id: &str, content_hash: &str, status: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            agent_id: agent_id.to_string(),
            name: Some(agent_id.to_string()),
            version: "1.0.0".to_string(),
            http_host: "localhost".to_string(),
            http_port: 9000,
            namespace: "default".to_string(),
            status: status.to_string(),
            tools: vec![ToolRegistration {
                function_name: "greet".to_string(),
                capability: "greeting".to_string(),
                version: "1.0.0".to_string(),
                tags: vec![],
                description: None,
                dependencies: vec![],
                input_schema: None,
                llm_filter: None,
                llm_provider: None,
            }],
            heartbeat_interval: 5,
            content_hash: content_hash.to_string(),
        }
    }

    #[test]
    fn register_then_identical_reregister_does_not_bump_resource_version() {
        let store = Store::new();
        let (r1, changed1) = store.register(&req("hello", "hash-a", "healthy"), 1000).unwrap();
        assert!(changed1);
        assert_eq!(r1.resource_version, 1);

        let (r2, changed2) = store.register(&req("hello", "hash-a", "healthy"), 2000).unwrap();
        assert!(!changed2);
        assert_eq!(r2.resource_version, 1);
        assert_eq!(r2.last_seen_ms, 2000);
    }

    #[test]
    fn content_hash_change_bumps_resource_version_by_exactly_one() {
        let store = Store::new();
        store.register(&req("hello", "hash-a", "healthy"), 1000).unwrap();
        let (r2, changed) = store.register(&req("hello", "hash-b", "healthy"), 2000).unwrap();
        assert!(changed);
        assert_eq!(r2.resource_version, 2);
    }

    #[test]
    fn conflicting_namespace_name_with_different_agent_id_is_rejected() {
        let store = Store::new();
        store.register(&req("hello", "hash-a", "healthy"), 1000).unwrap();

        let mut conflicting = req("hello-2", "hash-a", "healthy");
        conflicting.name = Some("hello".to_string());
        let err = store.register(&conflicting, 1000).unwrap_err();
        assert!(matches!(err, StoreError::ConflictingRegistration { .. }));
    }

    #[test]
    fn candidates_exclude_unhealthy_and_offline_agents() {
        let store = Store::new();
        store.register(&req("hello", "hash-a", "healthy"), 1000).unwrap();
        assert_eq!(store.candidates_for_capability("greeting").len(), 1);

        store.set_status("hello", AgentStatus::Unhealthy);
        assert_eq!(store.candidates_for_capability("greeting").len(), 0);

        store.set_status("hello", AgentStatus::Degraded);
        assert_eq!(store.candidates_for_capability("greeting").len(), 1);
    }

    #[test]
    fn remove_drops_agent_from_capability_index() {
        let store = Store::new();
        store.register(&req("hello", "hash-a", "healthy"), 1000).unwrap();
        assert!(store.remove("hello").is_some());
        assert_eq!(store.candidates_for_capability("greeting").len(), 0);
        assert!(store.get("hello").is_none());
    }
}
