use serde::Serialize;
use tracing::debug;

use flowrun_core::flow::{ChainPolicy, Flow, NodeType};

/// Ordered agent ids forming one entry-to-exit path.
pub type Chain = Vec<String>;

/// The chains a run will execute, resolved under one policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub policy: ChainPolicy,
    pub chains: Vec<Chain>,
}

impl ExecutionPlan {
    /// Resolve `flow` under `policy`. Fan-out candidates become
    /// single-agent chains.
    pub fn resolve(flow: &Flow, policy: ChainPolicy) -> Self {
        let chains = match policy {
            ChainPolicy::Sequential => resolve_chains(flow),
            ChainPolicy::DirectFanout => resolve_fanout(flow)
                .into_iter()
                .map(|id| vec![id])
                .collect(),
        };
        debug!(flow_id = %flow.id, %policy, chains = chains.len(), "Resolved execution plan");
        Self { policy, chains }
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Distinct agent ids across all chains, in first-appearance order.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.chains.iter().flatten() {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Every agent path that starts at an edge out of the entry and ends at an
/// edge into an exit.
///
/// Paths are walked depth-first in edge-list order. A path never revisits an
/// agent already on it, and a path that dead-ends without reaching an exit
/// is dropped. Duplicate chains keep their first occurrence.
pub fn resolve_chains(flow: &Flow) -> Vec<Chain> {
    let Some(entry) = flow.nodes_of(NodeType::Entry).next() else {
        return Vec::new();
    };

    let mut chains = Vec::new();
    for edge in flow.outgoing(&entry.id) {
        if node_type(flow, &edge.target_node_id) == Some(NodeType::Agent) {
            let mut path = vec![edge.target_node_id.clone()];
            walk(flow, &mut path, &mut chains);
        }
    }
    chains
}

fn walk(flow: &Flow, path: &mut Chain, chains: &mut Vec<Chain>) {
    let Some(current) = path.last().cloned() else {
        return;
    };

    for edge in flow.outgoing(&current) {
        let next = &edge.target_node_id;
        match node_type(flow, next) {
            Some(NodeType::Exit) => {
                if !chains.contains(path) {
                    chains.push(path.clone());
                }
            }
            Some(NodeType::Agent) if !path.contains(next) => {
                path.push(next.clone());
                walk(flow, path, chains);
                path.pop();
            }
            _ => {}
        }
    }
}

/// Agents wired directly from the entry that also feed an exit.
pub fn resolve_fanout(flow: &Flow) -> Vec<String> {
    let Some(entry) = flow.nodes_of(NodeType::Entry).next() else {
        return Vec::new();
    };

    let mut agents: Vec<String> = Vec::new();
    for edge in flow.outgoing(&entry.id) {
        let id = &edge.target_node_id;
        if node_type(flow, id) != Some(NodeType::Agent) || agents.contains(id) {
            continue;
        }
        let feeds_exit = flow
            .outgoing(id)
            .any(|e| node_type(flow, &e.target_node_id) == Some(NodeType::Exit));
        if feeds_exit {
            agents.push(id.clone());
        }
    }
    agents
}

fn node_type(flow: &Flow, id: &str) -> Option<NodeType> {
    flow.node(id).map(|n| n.node_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::flow::Node;
    use flowrun_test_utils::fixtures::{self, flow_with, nodes, ENTRY, EXIT};

    fn ids(chains: &[Chain]) -> Vec<Vec<&str>> {
        chains
            .iter()
            .map(|c| c.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_linear_chain() {
        let chains = resolve_chains(&fixtures::chain_flow());
        assert_eq!(ids(&chains), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_branching_and_fan_in() {
        // entry → a → {b, c} → exit, and entry → d → c
        let flow = flow_with(
            nodes(&["a", "b", "c", "d"]),
            &[
                (ENTRY, "a"),
                ("a", "b"),
                ("a", "c"),
                ("b", EXIT),
                ("c", EXIT),
                (ENTRY, "d"),
                ("d", "c"),
            ],
        );
        let chains = resolve_chains(&flow);
        assert_eq!(
            ids(&chains),
            vec![vec!["a", "b"], vec!["a", "c"], vec!["d", "c"]]
        );
    }

    #[test]
    fn test_path_without_exit_is_dropped() {
        let flow = flow_with(
            nodes(&["a", "b", "c"]),
            &[(ENTRY, "a"), ("a", "b"), ("a", EXIT), (ENTRY, "c")],
        );
        assert_eq!(ids(&resolve_chains(&flow)), vec![vec!["a"]]);
    }

    #[test]
    fn test_intermediate_exit_records_prefix_chain() {
        let flow = flow_with(
            nodes(&["a", "b"]),
            &[(ENTRY, "a"), ("a", EXIT), ("a", "b"), ("b", EXIT)],
        );
        assert_eq!(ids(&resolve_chains(&flow)), vec![vec!["a"], vec!["a", "b"]]);
    }

    #[test]
    fn test_cycle_terminates() {
        let flow = flow_with(
            nodes(&["a", "b"]),
            &[(ENTRY, "a"), ("a", "b"), ("b", "a"), ("b", EXIT)],
        );
        assert_eq!(ids(&resolve_chains(&flow)), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_duplicate_chains_collapse() {
        let mut all = nodes(&["a"]);
        all.push(Node::exit("end-2", "Other end"));
        let flow = flow_with(
            all,
            &[(ENTRY, "a"), (ENTRY, "a"), ("a", EXIT), ("a", "end-2")],
        );
        assert_eq!(ids(&resolve_chains(&flow)), vec![vec!["a"]]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let flow = fixtures::chain_with_sibling_flow();
        let first = resolve_chains(&flow);
        for _ in 0..10 {
            assert_eq!(resolve_chains(&flow), first);
        }
        assert_eq!(ids(&first), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_fanout_keeps_direct_exit_connected_agents() {
        let flow = flow_with(
            nodes(&["a", "b", "c"]),
            &[(ENTRY, "a"), (ENTRY, "b"), ("a", EXIT), (ENTRY, "c"), ("c", EXIT)],
        );
        assert_eq!(resolve_fanout(&flow), vec!["a", "c"]);
    }

    #[test]
    fn test_fanout_ignores_downstream_agents() {
        // b only reachable through a, so it is no fan-out candidate
        let flow = fixtures::chain_flow();
        assert!(resolve_fanout(&flow).is_empty());
    }

    #[test]
    fn test_no_entry_resolves_nothing() {
        let flow = flow_with(vec![fixtures::agent("a"), Node::exit(EXIT, "End")], &[("a", EXIT)]);
        assert!(resolve_chains(&flow).is_empty());
        assert!(resolve_fanout(&flow).is_empty());
    }

    #[test]
    fn test_plan_per_policy() {
        let flow = fixtures::fanout_flow();
        let plan = ExecutionPlan::resolve(&flow, ChainPolicy::DirectFanout);
        assert_eq!(ids(&plan.chains), vec![vec!["a"], vec!["b"]]);
        assert_eq!(plan.agent_ids(), vec!["a", "b"]);

        let plan = ExecutionPlan::resolve(&fixtures::chain_with_sibling_flow(), ChainPolicy::Sequential);
        assert_eq!(plan.agent_ids(), vec!["a", "b", "c"]);
        assert!(!plan.is_empty());
    }
}
