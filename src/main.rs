use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use toolgate_core::{AppBuilder, CallContext, resolve_config_path};
use toolgate_policy::ToolArgs;

/// Permission gate for agent tool calls.
#[derive(Parser, Debug)]
#[command(name = "toolgate", version)]
#[command(about = "Check agent tool calls against a permission policy")]
struct Cli {
    /// Policy file; falls back to `TOOLGATE_CONFIG`, then `config/toolgate.toml`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the policy file
    Validate,
    /// Run one permission check and print the decision as JSON
    Check {
        /// Tool name
        #[arg(long)]
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// What the agent is trying to achieve, shown to approvers
        #[arg(long, default_value = "")]
        intent: String,
    },
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_subscriber();
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Command::Validate => validate(config_path).await,
        Command::Check { tool, args, intent } => check(config_path, &tool, &args, &intent).await,
    }
}

async fn validate(config_path: PathBuf) -> anyhow::Result<ExitCode> {
    let builder = AppBuilder::from_path(config_path).await?;
    let config = builder.config();
    let summary = json!({
        "config": builder.config_path().display().to_string(),
        "valid": true,
        "default_policy": config.policy.default_policy,
        "channel": config.channel.kind,
        "blacklist": {
            "tools": config.policy.blacklist.tools.len(),
            "patterns": config.policy.blacklist.patterns.len(),
        },
        "whitelist": {
            "tools": config.policy.whitelist.tools.len(),
            "patterns": config.policy.whitelist.patterns.len(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

async fn check(
    config_path: PathBuf,
    tool: &str,
    raw_args: &str,
    intent: &str,
) -> anyhow::Result<ExitCode> {
    let args: ToolArgs =
        serde_json::from_str(raw_args).context("--args must be a JSON object")?;
    let builder = AppBuilder::from_path(config_path).await?;
    let gate = builder.build_gate().await?;

    let decision = gate
        .check(tool, &args, intent, &CallContext::default())
        .await;
    let output = json!({
        "tool": tool,
        "decision": decision.verdict(),
        "reason": decision.reason,
        "method": decision.method,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if decision.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
