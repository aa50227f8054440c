//! Canned flows for engine tests.
//!
//! Agents are built with `agent(id)`, whose system prompt is `sys-<id>`, so
//! an [`EchoClient`](crate::EchoClient) output names the agent that made it.

use flowrun_core::flow::{AgentSpec, Edge, Flow, Node};

pub const ENTRY: &str = "start-1";
pub const EXIT: &str = "end-1";

/// System prompt used for an agent built by [`agent`].
pub fn system_prompt(id: &str) -> String {
    format!("sys-{}", id)
}

pub fn agent(id: &str) -> Node {
    Node::agent(
        id,
        id.to_uppercase(),
        AgentSpec::new("gpt-4o").with_system_prompt(system_prompt(id)),
    )
}

/// Build a flow from nodes and `(source, target)` pairs.
pub fn flow_with(nodes: Vec<Node>, edges: &[(&str, &str)]) -> Flow {
    let mut flow = Flow::new("flow-test", "Test flow");
    flow.nodes = nodes;
    flow.edges = edges.iter().map(|(s, t)| Edge::between(*s, *t)).collect();
    flow
}

/// Entry plus exit plus one agent node per id, no edges yet.
pub fn nodes(agent_ids: &[&str]) -> Vec<Node> {
    let mut nodes = vec![Node::entry(ENTRY, "Start")];
    nodes.extend(agent_ids.iter().map(|id| agent(id)));
    nodes.push(Node::exit(EXIT, "End"));
    nodes
}

/// entry → {a, b} → exit.
pub fn fanout_flow() -> Flow {
    flow_with(
        nodes(&["a", "b"]),
        &[(ENTRY, "a"), (ENTRY, "b"), ("a", EXIT), ("b", EXIT)],
    )
}

/// entry → a → b → exit.
pub fn chain_flow() -> Flow {
    flow_with(nodes(&["a", "b"]), &[(ENTRY, "a"), ("a", "b"), ("b", EXIT)])
}

/// entry → a → b → exit, plus an independent entry → c → exit.
pub fn chain_with_sibling_flow() -> Flow {
    flow_with(
        nodes(&["a", "b", "c"]),
        &[(ENTRY, "a"), ("a", "b"), ("b", EXIT), (ENTRY, "c"), ("c", EXIT)],
    )
}
