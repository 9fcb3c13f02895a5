//! Pure, deterministic capability resolution (§4.1 "Resolver algorithm").
//!
//! `resolve` is a free function over `&Store` plus selector fields rather than
//! a type with its own state — mirroring the "dynamic dispatch" note in §9:
//! tag-and-capability dispatch is plain data plus `resolve(&Store, &Selector)`.

use std::cmp::Ordering;

use semver::{Version, VersionReq};

use crate::error::ResolverError;
use crate::model::{AgentRecord, ToolRef, ToolRegistration};
use crate::store::Store;

const PREFERRED_TAG_BONUS: f64 = 1.0;
const ALT_GROUP_BONUS: f64 = 0.5;
const EXTRA_TAG_PENALTY: f64 = 0.1;

/// One parsed tag operator from a selector's `tags` list (spec §3 operator grammar).
enum TagOp {
    /// Bare tag: candidate must carry it.
    Required(String),
    /// `+tag`: scoring bonus if present, never required.
    Preferred(String),
    /// `-tag`: candidate must NOT carry it.
    Excluded(String),
    /// `(alt1|...|altn)`: candidate must carry at least one alt (earliest wins
    /// for bonus purposes); `+alt` inside the group adds a tiebreak bonus.
    AltGroup(Vec<(String, bool)>),
}

fn parse_tag_op(raw: &str) -> TagOp {
    if let Some(inner) = raw.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let alts = inner
            .split('|')
            .map(|alt| {
                let alt = alt.trim();
                if let Some(bare) = alt.strip_prefix('+') {
                    (bare.to_string(), true)
                } else {
                    (alt.to_string(), false)
                }
            })
            .collect();
        TagOp::AltGroup(alts)
    } else if let Some(tag) = raw.strip_prefix('-') {
        TagOp::Excluded(tag.to_string())
    } else if let Some(tag) = raw.strip_prefix('+') {
        TagOp::Preferred(tag.to_string())
    } else {
        TagOp::Required(raw.to_string())
    }
}

/// Returns `None` if the candidate must be dropped, `Some(bonus)` otherwise.
fn score_candidate_tags(candidate_tags: &[String], ops: &[TagOp]) -> Option<f64> {
    let mut bonus = 0.0;
    let mut accounted_for = std::collections::HashSet::new();

    for op in ops {
        match op {
            TagOp::Required(tag) => {
                if !candidate_tags.contains(tag) {
                    return None;
                }
                accounted_for.insert(tag.clone());
            }
            TagOp::Excluded(tag) => {
                if candidate_tags.contains(tag) {
                    return None;
                }
            }
            TagOp::Preferred(tag) => {
                if candidate_tags.contains(tag) {
                    bonus += PREFERRED_TAG_BONUS;
                    accounted_for.insert(tag.clone());
                }
            }
            TagOp::AltGroup(alts) => {
                let matched = alts.iter().find(|(tag, _)| candidate_tags.contains(tag));
                match matched {
                    None => return None,
                    Some((tag, preferred)) => {
                        accounted_for.insert(tag.clone());
                        if *preferred {
                            bonus += ALT_GROUP_BONUS;
                        }
                    }
                }
            }
        }
    }

    let extra = candidate_tags.iter().filter(|t| !accounted_for.contains(*t)).count();
    bonus -= extra as f64 * EXTRA_TAG_PENALTY;
    Some(bonus)
}

/// Closeness of `version` to `constraint`'s lower bound, in `[0, 1]`; `0` when
/// no constraint is given (no information to score on).
fn version_closeness(version: &str, constraint: Option<&VersionReq>) -> f64 {
    let Some(constraint) = constraint else { return 0.0 };
    let Ok(v) = Version::parse(version) else { return 0.0 };
    // Distance to the nearest comparator's version, in major.minor.patch units.
    let mut best = f64::MAX;
    for comparator in &constraint.comparators {
        let major = comparator.major;
        let minor = comparator.minor.unwrap_or(0);
        let patch = comparator.patch.unwrap_or(0);
        let dist = (v.major as f64 - major as f64).abs() * 100.0
            + (v.minor as f64 - minor as f64).abs() * 10.0
            + (v.patch as f64 - patch as f64).abs();
        best = best.min(dist);
    }
    if best == f64::MAX {
        0.0
    } else {
        1.0 / (1.0 + best)
    }
}

/// `filterMode` as named in §4.1 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    BestMatch,
    All,
    Any,
}

impl FilterMode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("all") => Self::All,
            Some("*") => Self::Any,
            _ => Self::BestMatch,
        }
    }
}

fn to_tool_ref(agent: &AgentRecord, tool: &ToolRegistration, score: f64) -> ToolRef {
    ToolRef {
        agent_id: agent.agent_id.clone(),
        endpoint: agent.endpoint(),
        function_name: tool.function_name.clone(),
        capability: tool.capability.clone(),
        tags: tool.tags.clone(),
        version: tool.version.clone(),
        input_schema: tool.input_schema.clone(),
        score,
    }
}

/// Resolve one selector against the store, implementing §4.1 steps 1-5.
pub fn resolve(
    store: &Store,
    capability: &str,
    tags: &[String],
    version_constraint: Option<&str>,
    mode: FilterMode,
) -> Result<Vec<ToolRef>, ResolverError> {
    let candidates = store.candidates_for_capability(capability);

    if mode == FilterMode::Any {
        let mut refs: Vec<ToolRef> = candidates.iter().map(|(a, t)| to_tool_ref(a, t, 0.0)).collect();
        refs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        return Ok(refs);
    }

    let constraint = version_constraint
        .filter(|s| !s.is_empty())
        .map(|s| VersionReq::parse(s).map_err(|cause| ResolverError::InvalidVersionConstraint {
            constraint: s.to_string(),
            cause,
        }))
        .transpose()?;

    let ops: Vec<TagOp> = tags.iter().map(|t| parse_tag_op(t)).collect();

    let mut scored: Vec<ToolRef> = Vec::new();
    for (agent, tool) in &candidates {
        if let Some(req) = &constraint {
            match Version::parse(&tool.version) {
                Ok(v) if req.matches(&v) => {}
                Ok(_) => continue,
                Err(cause) => {
                    return Err(ResolverError::InvalidVersion {
                        version: tool.version.clone(),
                        cause,
                    })
                }
            }
        }

        let Some(tag_bonus) = score_candidate_tags(&tool.tags, &ops) else { continue };
        let score = tag_bonus + version_closeness(&tool.version, constraint.as_ref());
        scored.push(to_tool_ref(agent, tool, score));
    }

    // Stable sort descending by score; ties broken by lower agent_id (§4.1 step 4).
    scored.sort_by(|a, b| match b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal) {
        Ordering::Equal => a.agent_id.cmp(&b.agent_id),
        other => other,
    });

    if mode == FilterMode::BestMatch {
        scored.truncate(1);
    }

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyRegistration, HeartbeatRequest, ToolRegistration};

    fn register_provider(store: &Store, agent_id: &str, tags: Vec<&str>, version: &str) {
        let req = HeartbeatRequest {
            agent_id: agent_id.to_string(),
            name: Some(agent_id.to_string()),
            version: "1.0.0".to_string(),
            http_host: "localhost".to_string(),
            http_port: 9000,
            namespace: "default".to_string(),
            status: "healthy".to_string(),
            tools: vec![ToolRegistration {
                function_name: "add".to_string(),
                capability: "math".to_string(),
                version: version.to_string(),
                tags: tags.into_iter().map(String::from).collect(),
                description: None,
                dependencies: Vec::<DependencyRegistration>::new(),
                input_schema: None,
                llm_filter: None,
                llm_provider: None,
            }],
            heartbeat_interval: 5,
            content_hash: format!("hash-{agent_id}"),
        };
        store.register(&req, 1000).unwrap();
    }

    #[test]
    fn tag_precedence_prefers_ts_over_py_scenario_b() {
        let store = Store::new();
        register_provider(&store, "p1", vec!["py", "addition"], "1.0.0");
        register_provider(&store, "p2", vec!["ts", "addition"], "1.0.0");

        let tags = vec!["addition".to_string(), "(py|+ts)".to_string()];
        let result = resolve(&store, "math", &tags, None, FilterMode::All).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].agent_id, "p2");
        assert_eq!(result[1].agent_id, "p1");
    }

    #[test]
    fn excluded_tag_drops_candidate_scenario_8() {
        let store = Store::new();
        register_provider(&store, "p1", vec!["ts"], "1.0.0");
        register_provider(&store, "p2", vec!["go"], "1.0.0");

        let tags = vec!["(py|+ts|-go)".to_string()];
        let result = resolve(&store, "math", &tags, None, FilterMode::All).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].agent_id, "p1");
    }

    #[test]
    fn best_match_returns_top_one() {
        let store = Store::new();
        register_provider(&store, "p1", vec!["py"], "1.0.0");
        register_provider(&store, "p2", vec!["ts"], "1.0.0");

        let tags = vec!["(py|+ts)".to_string()];
        let result = resolve(&store, "math", &tags, None, FilterMode::BestMatch).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].agent_id, "p2");
    }

    #[test]
    fn any_mode_ignores_filters_entirely() {
        let store = Store::new();
        register_provider(&store, "p2", vec!["ts"], "1.0.0");
        register_provider(&store, "p1", vec!["py"], "2.0.0");

        let tags = vec!["nonexistent-required-tag".to_string()];
        let result = resolve(&store, "math", &tags, Some(">=9.0.0"), FilterMode::Any).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].agent_id, "p1");
    }

    #[test]
    fn version_constraint_hard_filters_out_of_range_candidates() {
        let store = Store::new();
        register_provider(&store, "p1", vec![], "1.0.0");
        register_provider(&store, "p2", vec![], "2.0.0");

        let result = resolve(&store, "math", &[], Some(">=2.0.0"), FilterMode::All).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].agent_id, "p2");
    }

    #[test]
    fn resolution_is_deterministic_across_repeated_calls() {
        let store = Store::new();
        register_provider(&store, "b-agent", vec!["addition"], "1.0.0");
        register_provider(&store, "a-agent", vec!["addition"], "1.0.0");

        let first = resolve(&store, "math", &["addition".to_string()], None, FilterMode::All).unwrap();
        let second = resolve(&store, "math", &["addition".to_string()], None, FilterMode::All).unwrap();

        let first_ids: Vec<_> = first.iter().map(|r| r.agent_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.agent_id.clone()).collect();
        assert_eq!(first_ids, second_ids);
        // Equal score ⇒ tiebreak by lower agent_id.
        assert_eq!(first_ids, vec!["a-agent".to_string(), "b-agent".to_string()]);
    }
}
