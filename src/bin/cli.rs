//! Kestrel CLI
//!
//! Thin one-shot adapter over `Agent::run`: load configuration, register
//! the built-in tools, run a single prompt, print the outcome.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::style;
use kestrel::config::{load_config, RuntimeConfig};
use kestrel::{
    Agent, LlmClient, PlanningTool, RunMode, RunStatus, TerminateTool, ToolRegistry, VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kestrel",
    author = "Kestrel Contributors",
    version = VERSION,
    about = "Kestrel - a tool-calling LLM agent runtime",
    long_about = None
)]
struct Cli {
    /// The prompt to run
    prompt: Vec<String>,

    /// Run mode: "action" or "plan"
    #[arg(short, long, default_value = "action")]
    mode: String,

    /// Configuration file (TOML); defaults to ./kestrel.toml if present
    #[arg(short, long)]
    config: Option<String>,

    /// Override the LLM base URL
    #[arg(long, env = "KESTREL_LLM__BASE_URL")]
    base_url: Option<String>,

    /// Override the model identifier
    #[arg(long, env = "KESTREL_LLM__MODEL")]
    model: Option<String>,

    /// Print dispatched tool calls after the response
    #[arg(long)]
    show_tools: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let prompt = cli.prompt.join(" ");
    let mode = RunMode::from_str(&cli.mode)?;

    let mut config: RuntimeConfig =
        load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(base_url) = cli.base_url {
        config.llm.base_url = base_url;
    }
    if let Some(model) = cli.model {
        config.llm.model = model;
    }

    let llm = Arc::new(LlmClient::new(config.llm)?);

    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(TerminateTool))?;
    registry.register(Arc::new(
        PlanningTool::new(&config.planning.plans_dir).with_generator(llm.clone()),
    ))?;

    info!(tools = registry.count(), model = llm.model(), "starting run");

    let mut agent = Agent::new(config.agent, llm, registry);

    // Ctrl-C cancels the run cooperatively
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let outcome = agent.run_cancellable(&prompt, mode, cancel).await?;

    match outcome.status {
        RunStatus::Success => println!("{}", outcome.response),
        RunStatus::Error | RunStatus::Timeout => {
            eprintln!("{} {}", style("error:").red().bold(), outcome.response)
        }
    }

    if cli.show_tools && !outcome.tool_calls.is_empty() {
        eprintln!();
        eprintln!("{}", style("tool calls:").dim());
        for call in &outcome.tool_calls {
            eprintln!("  {} {}", style(&call.name).cyan(), call.arguments);
        }
    }

    agent.shutdown().await;
    Ok(())
}
