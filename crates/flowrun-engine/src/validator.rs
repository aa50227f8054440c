use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use flowrun_core::error::ValidationError;
use flowrun_core::flow::{connection_allowed, ChainPolicy, Flow, NodeType};

/// Check that a flow is executable under `policy`.
///
/// Checks run in order and stop at the first failure:
/// unique node ids, a single entry, at least one agent, an entry wired to an
/// agent, edges pointing at existing nodes, legal edge pairings, and sane
/// agent settings.
/// Passing does not mean every agent is reachable; unreachable agents are
/// simply left out of the plan.
pub fn validate(flow: &Flow, policy: ChainPolicy) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    if let Some(dup) = flow.nodes.iter().find(|n| !seen.insert(n.id.as_str())) {
        return Err(ValidationError::DuplicateNode { id: dup.id.clone() });
    }

    let mut entries = flow.nodes_of(NodeType::Entry);
    let entry = entries.next().ok_or(ValidationError::MissingEntry)?;
    if entries.next().is_some() {
        return Err(ValidationError::MultipleEntries);
    }

    if flow.agents().next().is_none() {
        return Err(ValidationError::NoAgents);
    }

    let entry_feeds_agent = flow.outgoing(&entry.id).any(|edge| {
        flow.node(&edge.target_node_id)
            .is_some_and(|n| n.node_type() == NodeType::Agent)
    });
    if !entry_feeds_agent {
        return Err(ValidationError::EntryNotConnected);
    }

    for edge in &flow.edges {
        let source = flow
            .node(&edge.source_node_id)
            .ok_or_else(|| ValidationError::DanglingEdge {
                edge: edge.id.clone(),
                node: edge.source_node_id.clone(),
            })?;
        let target = flow
            .node(&edge.target_node_id)
            .ok_or_else(|| ValidationError::DanglingEdge {
                edge: edge.id.clone(),
                node: edge.target_node_id.clone(),
            })?;

        if source.id == target.id
            || !connection_allowed(source.node_type(), target.node_type(), policy)
        {
            return Err(ValidationError::IllegalEdge {
                edge: edge.id.clone(),
                source_kind: source.node_type().to_string(),
                target_kind: target.node_type().to_string(),
            });
        }
    }

    for (id, agent) in flow.agents() {
        if agent.max_tokens == 0 {
            return Err(ValidationError::InvalidAgent {
                agent: id.to_string(),
                reason: "maxTokens must be positive".into(),
            });
        }
        if agent.uses_temperature() && !(0.0..=2.0).contains(&agent.temperature) {
            return Err(ValidationError::InvalidAgent {
                agent: id.to_string(),
                reason: format!("temperature {} is outside 0..=2", agent.temperature),
            });
        }
    }

    debug!(flow_id = %flow.id, %policy, "Flow passed validation");
    Ok(())
}

/// Serializable outcome of [`validate`], in the `{valid, error?}` shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn check(flow: &Flow, policy: ChainPolicy) -> Self {
        match validate(flow, policy) {
            Ok(()) => Self {
                valid: true,
                error: None,
            },
            Err(e) => Self {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::flow::{AgentSpec, Edge, Node, ReasoningEffort};
    use flowrun_test_utils::fixtures::{self, agent, flow_with, nodes, ENTRY, EXIT};

    #[test]
    fn test_missing_entry() {
        let flow = flow_with(vec![agent("a"), Node::exit(EXIT, "End")], &[("a", EXIT)]);
        let err = validate(&flow, ChainPolicy::Sequential).unwrap_err();
        assert_eq!(err, ValidationError::MissingEntry);
        assert!(err.to_string().contains("Start node"));
    }

    #[test]
    fn test_multiple_entries_have_distinct_reason() {
        let mut all = nodes(&["a"]);
        all.push(Node::entry("start-2", "Second"));
        let flow = flow_with(all, &[(ENTRY, "a"), ("a", EXIT)]);
        let err = validate(&flow, ChainPolicy::Sequential).unwrap_err();
        assert_eq!(err, ValidationError::MultipleEntries);
        assert_ne!(err.to_string(), ValidationError::MissingEntry.to_string());
    }

    #[test]
    fn test_no_agents() {
        let flow = flow_with(nodes(&[]), &[]);
        assert_eq!(
            validate(&flow, ChainPolicy::Sequential),
            Err(ValidationError::NoAgents)
        );
    }

    #[test]
    fn test_entry_connected_only_to_exit_or_note() {
        let mut all = nodes(&["a"]);
        all.push(Node::annotation("note-1", "todo"));
        let flow = flow_with(all.clone(), &[(ENTRY, EXIT), (ENTRY, "note-1"), ("a", EXIT)]);
        assert_eq!(
            validate(&flow, ChainPolicy::Sequential),
            Err(ValidationError::EntryNotConnected)
        );

        let flow = flow_with(all, &[("a", EXIT)]);
        assert_eq!(
            validate(&flow, ChainPolicy::DirectFanout),
            Err(ValidationError::EntryNotConnected)
        );
    }

    #[test]
    fn test_dangling_edge() {
        let mut flow = fixtures::fanout_flow();
        flow.edges.push(Edge::between("a", "ghost"));
        let err = validate(&flow, ChainPolicy::Sequential).unwrap_err();
        assert!(matches!(err, ValidationError::DanglingEdge { ref node, .. } if node == "ghost"));
    }

    #[test]
    fn test_agent_to_agent_depends_on_policy() {
        let flow = fixtures::chain_flow();
        assert!(validate(&flow, ChainPolicy::Sequential).is_ok());
        let err = validate(&flow, ChainPolicy::DirectFanout).unwrap_err();
        assert!(matches!(err, ValidationError::IllegalEdge { .. }));
        assert!(err.to_string().contains("agent → agent"));
    }

    #[test]
    fn test_illegal_pairings() {
        let mut all = nodes(&["a"]);
        all.push(Node::annotation("note-1", "todo"));
        for bad in [("a", "note-1"), (EXIT, "a"), ("a", "a"), ("a", ENTRY)] {
            let flow = flow_with(all.clone(), &[(ENTRY, "a"), ("a", EXIT), bad]);
            assert!(
                matches!(
                    validate(&flow, ChainPolicy::Sequential),
                    Err(ValidationError::IllegalEdge { .. })
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_agent_settings() {
        let bad_tokens = Node::agent("a", "A", AgentSpec::default().with_max_tokens(0));
        let flow = flow_with(
            vec![Node::entry(ENTRY, "Start"), bad_tokens, Node::exit(EXIT, "End")],
            &[(ENTRY, "a"), ("a", EXIT)],
        );
        assert!(matches!(
            validate(&flow, ChainPolicy::Sequential),
            Err(ValidationError::InvalidAgent { .. })
        ));

        let hot = AgentSpec::default().with_temperature(3.5);
        let flow = flow_with(
            vec![Node::entry(ENTRY, "Start"), Node::agent("a", "A", hot.clone()), Node::exit(EXIT, "End")],
            &[(ENTRY, "a"), ("a", EXIT)],
        );
        assert!(validate(&flow, ChainPolicy::Sequential).is_err());

        // effort replaces temperature, so the stale value is ignored
        let reasoning = hot.with_effort(ReasoningEffort::Medium);
        let flow = flow_with(
            vec![Node::entry(ENTRY, "Start"), Node::agent("a", "A", reasoning), Node::exit(EXIT, "End")],
            &[(ENTRY, "a"), ("a", EXIT)],
        );
        assert!(validate(&flow, ChainPolicy::Sequential).is_ok());

        // reasoning models never send temperature either
        let o3 = AgentSpec::new("o3-mini").with_temperature(3.5);
        let flow = flow_with(
            vec![Node::entry(ENTRY, "Start"), Node::agent("a", "A", o3), Node::exit(EXIT, "End")],
            &[(ENTRY, "a"), ("a", EXIT)],
        );
        assert!(validate(&flow, ChainPolicy::Sequential).is_ok());
    }

    #[test]
    fn test_duplicate_node_id() {
        let mut all = nodes(&["a"]);
        all.push(Node::agent(
            "a",
            "Second",
            AgentSpec::default().with_system_prompt("sys-second"),
        ));
        let flow = flow_with(all, &[(ENTRY, "a"), ("a", EXIT)]);
        let err = validate(&flow, ChainPolicy::Sequential).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateNode { id: "a".into() });
        assert!(err.to_string().contains("used more than once"));

        // an entry and an agent sharing an id is caught before the entry checks
        let mut all = nodes(&["a"]);
        all.push(Node::agent(ENTRY, "Clash", AgentSpec::default()));
        let flow = flow_with(all, &[(ENTRY, "a"), ("a", EXIT)]);
        assert!(matches!(
            validate(&flow, ChainPolicy::Sequential),
            Err(ValidationError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_unreachable_agent_still_valid() {
        let flow = flow_with(nodes(&["a", "orphan"]), &[(ENTRY, "a"), ("a", EXIT)]);
        assert!(validate(&flow, ChainPolicy::Sequential).is_ok());
    }

    #[test]
    fn test_report_shape() {
        let report = ValidationReport::check(&fixtures::fanout_flow(), ChainPolicy::DirectFanout);
        assert!(report.valid);
        assert_eq!(serde_json::to_value(&report).unwrap(), serde_json::json!({"valid": true}));

        let report = ValidationReport::check(&flow_with(nodes(&[]), &[]), ChainPolicy::Sequential);
        assert!(!report.valid);
        assert_eq!(report.error.as_deref(), Some("Flow must have at least one Agent node"));
    }
}
