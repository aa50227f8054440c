use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowrun_core::config::AppConfig;
use flowrun_core::flow::{ChainPolicy, Flow};
use flowrun_core::types::RunInput;
use flowrun_engine::{agent_spec, ExecutionPlan, FlowExecutor, ValidationReport};

#[derive(Parser)]
#[command(name = "flowrun", version, about = "Run agent flows against a chat-completions service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowrun.toml")]
    config: PathBuf,

    /// API key for the completion service; overrides the config file.
    /// Without one, agents answer with placeholder text.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chain policy (sequential, direct_fanout); overrides the config file
    #[arg(long)]
    policy: Option<ChainPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a flow can be executed
    Validate {
        /// Flow JSON file
        flow: PathBuf,
    },
    /// Show the agent chains a run would execute
    Plan {
        /// Flow JSON file
        flow: PathBuf,
    },
    /// Run a flow and print the result as JSON
    Run {
        /// Flow JSON file
        flow: PathBuf,
        /// The prompt handed to the first agent of every chain
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Stream agent output as it arrives
    Preview {
        /// Flow JSON file
        flow: PathBuf,
        /// Stream a single agent instead of every directly connected one
        #[arg(long)]
        agent: Option<String>,
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Print a new flow holding only a Start node
    New {
        /// Flow name
        #[arg(default_value = "New Flow")]
        name: String,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrun=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(policy) = cli.policy {
        config.engine.policy = policy;
    }
    let policy = config.engine.policy;

    match cli.command {
        Commands::Validate { flow } => {
            let flow = load_flow(&flow)?;
            let report = ValidationReport::check(&flow, policy);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                std::process::exit(1);
            }
        }
        Commands::Plan { flow } => {
            let flow = load_flow(&flow)?;
            flowrun_engine::validate(&flow, policy)?;
            let plan = ExecutionPlan::resolve(&flow, policy);
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run { flow, prompt } => {
            let flow = load_flow(&flow)?;
            let executor = build_executor(&config, cli.api_key)?;
            let result = executor.run(&flow, &RunInput::new(prompt.join(" "))).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Preview {
            flow,
            agent,
            prompt,
        } => {
            let flow = load_flow(&flow)?;
            let executor = build_executor(&config, cli.api_key)?;
            let input = RunInput::new(prompt.join(" "));

            match agent {
                Some(agent_id) => {
                    let spec = agent_spec(&flow, &agent_id)?;
                    let mut print_delta = |delta: &str| {
                        print!("{}", delta);
                        io::stdout().flush().ok();
                    };
                    let result = executor
                        .stream_agent(&agent_id, spec, &input, &mut print_delta)
                        .await;
                    println!();
                    if result.is_error() {
                        std::process::exit(1);
                    }
                }
                None => {
                    let print_delta = |agent_id: &str, delta: &str| {
                        println!("[{}] {}", agent_id, delta);
                    };
                    let result = executor.preview(&flow, &input, &print_delta).await?;
                    println!();
                    for (agent_id, outcome) in &result.agents {
                        println!("== {} ==\n{}\n", agent_id, outcome.output);
                    }
                }
            }
        }
        Commands::New { name } => {
            println!("{}", Flow::new_default(name).to_json_pretty()?);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
    }

    Ok(())
}

fn load_flow(path: &Path) -> anyhow::Result<Flow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read flow file {}", path.display()))?;
    let flow = Flow::from_json(&content)
        .with_context(|| format!("failed to parse flow file {}", path.display()))?;
    info!(flow_id = %flow.id, name = %flow.name, nodes = flow.nodes.len(), "Loaded flow");
    Ok(flow)
}

/// Wire client and executor together. The credential comes from the CLI or
/// environment first, then the config file.
fn build_executor(config: &AppConfig, api_key: Option<String>) -> anyhow::Result<FlowExecutor> {
    let credential = api_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.llm.credential());
    if credential.is_none() {
        warn!("No API key configured, agents will return placeholder responses");
    }

    let client = flowrun_llm::create_client(&config.llm, credential)?;
    let executor = FlowExecutor::from_config(client, &config.engine);

    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        cancel.cancel();
    });

    Ok(executor)
}
