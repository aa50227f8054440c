//! Flow graph model: nodes, edges, and the flow value the editor hands over.
//!
//! The JSON shape matches what the editor persists: every node carries a
//! `type` tag (`start`, `agent`, `end`, `notes`) next to its common fields,
//! and all keys are camelCase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlowError, Result};
use crate::types::Sampling;

/// Canvas position. Carried for the editor only; never read during execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the flow.
    pub id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Variant-specific node data, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    #[serde(rename = "start")]
    Entry {
        #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
        input_schema: Option<InputSchema>,
    },
    #[serde(rename = "agent")]
    Agent(AgentSpec),
    #[serde(rename = "end")]
    Exit,
    #[serde(rename = "notes")]
    Annotation {
        #[serde(default)]
        content: String,
    },
}

/// Informational description of what the entry prompt should contain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// The discriminant of a [`NodeKind`], used for connection rules and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Entry,
    Agent,
    Exit,
    Annotation,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Entry => "start",
            Self::Agent => "agent",
            Self::Exit => "end",
            Self::Annotation => "notes",
        };
        f.write_str(s)
    }
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Entry { .. } => NodeType::Entry,
            NodeKind::Agent(_) => NodeType::Agent,
            NodeKind::Exit => NodeType::Exit,
            NodeKind::Annotation { .. } => NodeType::Annotation,
        }
    }

    /// Agent settings, if this is an agent node.
    pub fn as_agent(&self) -> Option<&AgentSpec> {
        match &self.kind {
            NodeKind::Agent(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn entry(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position: Position::default(),
            kind: NodeKind::Entry { input_schema: None },
        }
    }

    pub fn agent(id: impl Into<String>, label: impl Into<String>, spec: AgentSpec) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position: Position::default(),
            kind: NodeKind::Agent(spec),
        }
    }

    pub fn exit(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position: Position::default(),
            kind: NodeKind::Exit,
        }
    }

    pub fn annotation(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: "Note".to_string(),
            position: Position::default(),
            kind: NodeKind::Annotation {
                content: content.into(),
            },
        }
    }

    /// Set the canvas position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }
}

/// Reasoning effort for reasoning-family models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Configuration of a single language-model step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// When set, replaces `temperature` for reasoning-style models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String { "gpt-4o".to_string() }
fn default_temperature() -> f64 { 0.7 }
fn default_max_tokens() -> u32 { 2000 }

impl Default for AgentSpec {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            effort: None,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Model-id prefixes of the reasoning family.
const REASONING_PREFIXES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

/// Reasoning models take `max_completion_tokens` and reject `temperature`.
pub fn is_reasoning_model(model: &str) -> bool {
    REASONING_PREFIXES.iter().any(|p| model.starts_with(p))
}

impl AgentSpec {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_effort(mut self, effort: ReasoningEffort) -> Self {
        self.effort = Some(effort);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The sampling control this agent asks for. Effort wins over temperature.
    pub fn sampling(&self) -> Sampling {
        match self.effort {
            Some(effort) => Sampling::Effort(effort),
            None => Sampling::Temperature(self.temperature),
        }
    }

    /// Whether `temperature` ends up in the request. Reasoning models and
    /// agents with an effort never send it.
    pub fn uses_temperature(&self) -> bool {
        self.effort.is_none() && !is_reasoning_model(&self.model)
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
}

impl Edge {
    /// Create an edge with the editor's derived id, `edge-<source>-<target>`.
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("edge-{}-{}", source, target),
            source_node_id: source,
            target_node_id: target,
        }
    }
}

/// How agent chains are discovered from the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// Multi-hop chains from the entry to an exit; each agent feeds the next.
    #[default]
    Sequential,
    /// Only agents wired directly entry → agent → exit, all independent.
    DirectFanout,
}

impl fmt::Display for ChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::DirectFanout => f.write_str("direct_fanout"),
        }
    }
}

impl FromStr for ChainPolicy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sequential" | "chain" => Ok(Self::Sequential),
            "direct_fanout" | "fanout" => Ok(Self::DirectFanout),
            other => Err(FlowError::Config(format!("unknown chain policy: {}", other))),
        }
    }
}

/// Whether an edge from a `source` node to a `target` node is legal.
///
/// Entry → agent and agent → exit are always legal. Agent → agent is legal
/// only under the sequential policy, where it is how chains are expressed.
pub fn connection_allowed(source: NodeType, target: NodeType, policy: ChainPolicy) -> bool {
    match (source, target) {
        (NodeType::Entry, NodeType::Agent) | (NodeType::Agent, NodeType::Exit) => true,
        (NodeType::Agent, NodeType::Agent) => policy == ChainPolicy::Sequential,
        _ => false,
    }
}

/// A user-authored agent pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: vec![],
            edges: vec![],
        }
    }

    /// A fresh flow holding only the `start-1` entry node.
    pub fn new_default(name: impl Into<String>) -> Self {
        let mut flow = Self::new(Uuid::new_v4().to_string(), name);
        flow.nodes.push(Node::entry("start-1", "Start").at(250.0, 50.0));
        flow
    }

    /// Parse a flow document, rejecting documents without an id, nodes, or edges.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        let has_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty());
        let has_nodes = value.get("nodes").is_some_and(|v| v.is_array());
        let has_edges = value.get("edges").is_some_and(|v| v.is_array());
        if !(has_id && has_nodes && has_edges) {
            return Err(FlowError::InvalidFlow(
                "expected an object with id, nodes, and edges".into(),
            ));
        }
        serde_json::from_value(value).map_err(|e| FlowError::InvalidFlow(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes of a given type, in display order.
    pub fn nodes_of(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type() == node_type)
    }

    /// Agent ids paired with their settings, in display order.
    pub fn agents(&self) -> impl Iterator<Item = (&str, &AgentSpec)> {
        self.nodes
            .iter()
            .filter_map(|n| n.as_agent().map(|spec| (n.id.as_str(), spec)))
    }

    /// Edges leaving `node_id`, in edge-list order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source_node_id == node_id)
    }

    /// Add an agent with a generated `agent-<uuid>` id and return the id.
    pub fn add_agent(&mut self, label: impl Into<String>, spec: AgentSpec) -> String {
        let id = format!("agent-{}", Uuid::new_v4());
        self.nodes.push(Node::agent(id.clone(), label, spec));
        id
    }

    /// Add an exit with a generated `end-<uuid>` id and return the id.
    pub fn add_exit(&mut self, label: impl Into<String>) -> String {
        let id = format!("end-{}", Uuid::new_v4());
        self.nodes.push(Node::exit(id.clone(), label));
        id
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.id == id)?;
        self.edges
            .retain(|e| e.source_node_id != id && e.target_node_id != id);
        Some(self.nodes.remove(idx))
    }

    /// Connect two nodes, enforcing the connection rules for `policy`.
    pub fn connect(&mut self, source: &str, target: &str, policy: ChainPolicy) -> Result<&Edge> {
        let source_type = self
            .node(source)
            .ok_or_else(|| FlowError::IllegalConnection(format!("unknown node {}", source)))?
            .node_type();
        let target_type = self
            .node(target)
            .ok_or_else(|| FlowError::IllegalConnection(format!("unknown node {}", target)))?
            .node_type();

        if source == target || !connection_allowed(source_type, target_type, policy) {
            return Err(FlowError::IllegalConnection(format!(
                "{} → {} is not allowed",
                source_type, target_type
            )));
        }

        if self
            .edges
            .iter()
            .any(|e| e.source_node_id == source && e.target_node_id == target)
        {
            return Err(FlowError::IllegalConnection(format!(
                "{} is already connected to {}",
                source, target
            )));
        }

        self.edges.push(Edge::between(source, target));
        Ok(&self.edges[self.edges.len() - 1])
    }
}
