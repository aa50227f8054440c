use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowrun_core::config::EngineConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::event::EventBus;
use flowrun_core::flow::{AgentSpec, ChainPolicy, Flow, Node};
use flowrun_core::traits::CompletionClient;
use flowrun_core::types::{
    AgentRunResult, ChainRun, CompletionRequest, FlowRunResult, RunEvent, RunId, RunInput,
};

use crate::resolver::{resolve_fanout, Chain, ExecutionPlan};
use crate::streaming::StreamingAgents;
use crate::validator::validate;

/// Receives incremental text for a single streaming agent.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Runs flows against a completion client.
///
/// Chains are executed as a prefix tree: chains that share leading agents
/// share those invocations, siblings run concurrently, and each agent's
/// output is the user prompt of the agents after it. A failure is recorded
/// for the failing agent and everything downstream of it is skipped.
pub struct FlowExecutor {
    client: Arc<dyn CompletionClient>,
    policy: ChainPolicy,
    agent_timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
    streaming: StreamingAgents,
}

impl FlowExecutor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            policy: ChainPolicy::default(),
            agent_timeout: None,
            event_bus: None,
            cancel: CancellationToken::new(),
            streaming: StreamingAgents::new(),
        }
    }

    /// Build an executor from the `[engine]` config section.
    pub fn from_config(client: Arc<dyn CompletionClient>, config: &EngineConfig) -> Self {
        let mut executor = Self::new(client).with_policy(config.policy);
        executor.agent_timeout = config.agent_timeout();
        executor
    }

    pub fn with_policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fail any single agent call that takes longer than `timeout`.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Cancelling `token` fails every in-flight and future agent call.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Agents currently streaming through this executor.
    pub fn streaming(&self) -> &StreamingAgents {
        &self.streaming
    }

    /// Validate, resolve, and execute `flow`.
    ///
    /// Only a validation failure is returned as an error. Agent failures are
    /// recorded as error-tagged results in the returned map.
    pub async fn run(&self, flow: &Flow, input: &RunInput) -> Result<FlowRunResult> {
        if let Err(e) = validate(flow, self.policy) {
            warn!(flow_id = %flow.id, error = %e, "Flow failed validation");
            return Err(e.into());
        }

        let plan = ExecutionPlan::resolve(flow, self.policy);
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            %run_id,
            flow_id = %flow.id,
            policy = %self.policy,
            chains = plan.chains.len(),
            "Starting flow run"
        );
        self.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            chains: plan.chains.len(),
        });
        if plan.is_empty() {
            warn!(%run_id, "No agent chain reaches an exit, nothing to run");
        }

        let tree = PrefixTree::build(&plan.chains);
        let ctx = RunContext {
            run_id: &run_id,
            specs: agent_specs(flow),
            tree: &tree,
        };

        let settled = join_all(
            tree.roots
                .iter()
                .map(|&root| self.run_branch(&ctx, root, input.prompt.clone())),
        )
        .await;

        let mut slots: Vec<Option<AgentRunResult>> = vec![None; tree.nodes.len()];
        for (idx, result) in settled.into_iter().flatten() {
            slots[idx] = Some(result);
        }

        let result = tree.assemble(run_id.clone(), started_at, &plan.chains, slots);
        self.finish(&result, start);
        Ok(result)
    }

    /// Run one agent on its own. Unlike [`run`](Self::run), a failure is
    /// returned as the error.
    pub async fn run_agent(
        &self,
        agent_id: &str,
        agent: &AgentSpec,
        input: &RunInput,
    ) -> Result<AgentRunResult> {
        let run_id = RunId::new();
        let output = self
            .call_agent(&run_id, agent_id, agent, input.prompt.clone(), None)
            .await?;
        Ok(AgentRunResult::success(output))
    }

    /// Stream one agent, handing each delta to `on_chunk`.
    ///
    /// On failure `on_chunk` receives one last chunk holding the formatted
    /// error, and the returned result is error-tagged.
    pub async fn stream_agent(
        &self,
        agent_id: &str,
        agent: &AgentSpec,
        input: &RunInput,
        on_chunk: ChunkSink<'_>,
    ) -> AgentRunResult {
        self.stream_in_run(&RunId::new(), agent_id, agent, input, on_chunk)
            .await
    }

    /// Stream every agent wired directly entry → agent → exit, concurrently.
    ///
    /// `on_chunk` receives `(agent_id, delta)`.
    pub async fn preview(
        &self,
        flow: &Flow,
        input: &RunInput,
        on_chunk: &(dyn Fn(&str, &str) + Sync),
    ) -> Result<FlowRunResult> {
        validate(flow, self.policy)?;

        let specs = agent_specs(flow);
        let candidates: Vec<(&str, &AgentSpec)> = resolve_fanout(flow)
            .into_iter()
            .filter_map(|id| specs.get_key_value(id.as_str()).map(|(k, v)| (*k, *v)))
            .collect();

        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(%run_id, flow_id = %flow.id, agents = candidates.len(), "Starting preview");
        self.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            chains: candidates.len(),
        });

        let streams = candidates.iter().map(|&(agent_id, agent)| {
            let run_id = &run_id;
            async move {
                let mut sink = |delta: &str| on_chunk(agent_id, delta);
                self.stream_in_run(run_id, agent_id, agent, input, &mut sink)
                    .await
            }
        });
        let settled = join_all(streams).await;

        let mut agents = BTreeMap::new();
        let mut chains = Vec::with_capacity(settled.len());
        for (&(agent_id, _), result) in candidates.iter().zip(settled) {
            chains.push(ChainRun {
                agent_ids: vec![agent_id.to_string()],
                steps: vec![result.clone()],
            });
            agents.insert(agent_id.to_string(), result);
        }

        let result = FlowRunResult {
            run_id,
            started_at,
            agents,
            chains,
        };
        self.finish(&result, start);
        Ok(result)
    }

    async fn stream_in_run(
        &self,
        run_id: &RunId,
        agent_id: &str,
        agent: &AgentSpec,
        input: &RunInput,
        on_chunk: ChunkSink<'_>,
    ) -> AgentRunResult {
        let _streaming = self.streaming.start(agent_id);

        let sink: &mut (dyn FnMut(&str) + Send) = &mut *on_chunk;
        let outcome = self
            .call_agent(run_id, agent_id, agent, input.prompt.clone(), Some(sink))
            .await;
        match outcome {
            Ok(output) => AgentRunResult::success(output),
            Err(e) => {
                let failed = AgentRunResult::failure(&e);
                on_chunk(&failed.output);
                failed
            }
        }
    }

    /// Execute one prefix-tree node, then its children concurrently with
    /// this node's output as their input.
    fn run_branch<'a>(
        &'a self,
        ctx: &'a RunContext<'a>,
        node: usize,
        input: String,
    ) -> BoxFuture<'a, Vec<(usize, AgentRunResult)>> {
        Box::pin(async move {
            let step = &ctx.tree.nodes[node];
            let outcome = match ctx.specs.get(step.agent_id.as_str()) {
                Some(spec) => {
                    self.call_agent(ctx.run_id, &step.agent_id, spec, input, None)
                        .await
                }
                None => Err(FlowError::AgentNotFound(step.agent_id.clone())),
            };

            match outcome {
                Ok(output) => {
                    let downstream = join_all(
                        step.children
                            .iter()
                            .map(|&child| self.run_branch(ctx, child, output.clone())),
                    )
                    .await;
                    let mut settled = vec![(node, AgentRunResult::success(output))];
                    settled.extend(downstream.into_iter().flatten());
                    settled
                }
                Err(e) => {
                    if !step.children.is_empty() {
                        debug!(
                            agent_id = %step.agent_id,
                            skipped = step.children.len(),
                            "Abandoning downstream agents"
                        );
                    }
                    vec![(node, AgentRunResult::failure(&e))]
                }
            }
        })
    }

    async fn call_agent(
        &self,
        run_id: &RunId,
        agent_id: &str,
        agent: &AgentSpec,
        user_prompt: String,
        on_delta: Option<ChunkSink<'_>>,
    ) -> Result<String> {
        self.publish(RunEvent::AgentStarted {
            run_id: run_id.clone(),
            agent_id: agent_id.to_string(),
        });
        info!(%run_id, agent_id, model = %agent.model, streaming = on_delta.is_some(), "Invoking agent");

        let start = Instant::now();
        let request = CompletionRequest::for_agent(agent, user_prompt);
        let outcome = match on_delta {
            None => self.guarded(self.client.complete(request)).await,
            Some(sink) => {
                let mut forward = |delta: &str| {
                    sink(delta);
                    self.publish(RunEvent::AgentDelta {
                        run_id: run_id.clone(),
                        agent_id: agent_id.to_string(),
                        delta: delta.to_string(),
                    });
                };
                self.guarded(self.client.complete_streaming(request, &mut forward))
                    .await
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(text) => {
                info!(%run_id, agent_id, elapsed_ms, chars = text.len(), "Agent completed");
                self.publish(RunEvent::AgentCompleted {
                    run_id: run_id.clone(),
                    agent_id: agent_id.to_string(),
                });
            }
            Err(e) => {
                warn!(%run_id, agent_id, elapsed_ms, error = %e, "Agent failed");
                self.publish(RunEvent::AgentFailed {
                    run_id: run_id.clone(),
                    agent_id: agent_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    /// Apply the per-agent timeout and the run's cancellation token to a call.
    async fn guarded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let bounded = async {
            match self.agent_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FlowError::Timeout(limit)),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
            outcome = bounded => outcome,
        }
    }

    fn finish(&self, result: &FlowRunResult, start: Instant) {
        let failed = result.agents.values().filter(|r| r.is_error()).count();
        info!(
            run_id = %result.run_id,
            agents = result.agents.len(),
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Flow run complete"
        );
        self.publish(RunEvent::RunCompleted {
            run_id: result.run_id.clone(),
            agents: result.agents.len(),
            failed,
        });
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Look up an agent's settings by node id.
pub fn agent_spec<'f>(flow: &'f Flow, agent_id: &str) -> Result<&'f AgentSpec> {
    flow.node(agent_id)
        .and_then(Node::as_agent)
        .ok_or_else(|| FlowError::AgentNotFound(agent_id.to_string()))
}

/// Agent settings by id. A repeated id resolves to its first node, the same
/// one [`Flow::node`] finds.
fn agent_specs(flow: &Flow) -> HashMap<&str, &AgentSpec> {
    let mut first: HashMap<&str, &Node> = HashMap::new();
    for node in &flow.nodes {
        first.entry(node.id.as_str()).or_insert(node);
    }
    first
        .into_iter()
        .filter_map(|(id, node)| node.as_agent().map(|spec| (id, spec)))
        .collect()
}

struct RunContext<'a> {
    run_id: &'a RunId,
    specs: HashMap<&'a str, &'a AgentSpec>,
    tree: &'a PrefixTree,
}

/// Chains merged on their shared leading agents.
#[derive(Debug, Default)]
struct PrefixTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    /// Node indices of each chain, in chain order.
    paths: Vec<Vec<usize>>,
}

#[derive(Debug)]
struct TreeNode {
    agent_id: String,
    children: Vec<usize>,
}

impl PrefixTree {
    fn build(chains: &[Chain]) -> Self {
        let mut tree = Self::default();
        for chain in chains {
            let mut parent = None;
            let mut path = Vec::with_capacity(chain.len());
            for agent_id in chain {
                let idx = tree.child(parent, agent_id);
                path.push(idx);
                parent = Some(idx);
            }
            tree.paths.push(path);
        }
        tree
    }

    fn child(&mut self, parent: Option<usize>, agent_id: &str) -> usize {
        let siblings = match parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        if let Some(&idx) = siblings.iter().find(|&&i| self.nodes[i].agent_id == agent_id) {
            return idx;
        }

        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            agent_id: agent_id.to_string(),
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }

    /// Fold settled node results back into per-chain reports and the
    /// per-agent map. The earliest chain wins when an agent ran on more
    /// than one path.
    fn assemble(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        chains: &[Chain],
        slots: Vec<Option<AgentRunResult>>,
    ) -> FlowRunResult {
        let mut agents = BTreeMap::new();
        let mut runs = Vec::with_capacity(chains.len());

        for (chain, path) in chains.iter().zip(&self.paths) {
            let steps: Vec<AgentRunResult> =
                path.iter().map_while(|&idx| slots[idx].clone()).collect();
            for (agent_id, step) in chain.iter().zip(&steps) {
                agents
                    .entry(agent_id.clone())
                    .or_insert_with(|| step.clone());
            }
            runs.push(ChainRun {
                agent_ids: chain.clone(),
                steps,
            });
        }

        FlowRunResult {
            run_id,
            started_at,
            agents,
            chains: runs,
        }
    }
}
