use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::{debug, info, warn};

use tool_runner::agent::{Agent, DEFAULT_MAX_ATTEMPTS};
use tool_runner::application::stdio;
use tool_runner::config::AppConfig;
use tool_runner::logging;
use tool_runner::mcp::{McpEndpoint, load_toolkit};
use tool_runner::model::OllamaClient;
use tool_runner::toolkit::Toolkit;

#[derive(Parser, Debug)]
#[command(
    name = "tool-runner",
    version,
    about = "Tool-calling agent over MCP servers, powered by Ollama"
)]
struct Cli {
    #[arg(long)]
    ollama_url: Option<String>,
    #[arg(long)]
    config: Option<String>,
    /// MCP endpoint: an http(s) SSE URL or a JSON stdio server
    /// configuration. May be given more than once.
    #[arg(long = "mcp")]
    mcp: Vec<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system: Option<String>,
    /// Run tools that normally require approval without asking.
    #[arg(long)]
    execute: bool,
    #[arg(long)]
    max_attempts: Option<usize>,
    #[arg(long)]
    prompt_file: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Cli)]
    mode: RunMode,
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Cli,
    Stdio,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    logging::init();
    info!("Starting tool-runner");
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, mcp = ?cli.mcp, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let file_config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }

    let ollama_url = cli
        .ollama_url
        .clone()
        .unwrap_or_else(|| file_config.ollama_url.clone());
    let model = cli
        .model
        .clone()
        .unwrap_or_else(|| file_config.model.clone());
    let max_attempts = cli
        .max_attempts
        .or(file_config.max_attempts)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);

    debug!(ollama_url = %ollama_url, model = %model, "Creating Ollama provider");
    let provider = OllamaClient::new(ollama_url);

    let mut endpoints = file_config.endpoints()?;
    for input in &cli.mcp {
        endpoints.push(McpEndpoint::detect(input)?);
    }

    let mut toolkit = Toolkit::new();
    for endpoint in endpoints {
        info!(server = %endpoint.label(), "Connecting to MCP server");
        let entries = load_toolkit(Arc::new(endpoint)).await?;
        for entry in entries {
            toolkit.register(entry);
        }
    }

    let mut builder = Agent::builder("assistant", provider, model)
        .toolkit(toolkit)
        .max_attempts(max_attempts);
    if let Some(system) = cli.system.clone().or(file_config.system_prompt.clone()) {
        builder = builder.system_instruction(system);
    }
    let mut agent = builder.build()?;

    info!(mode = ?cli.mode, "Running in selected mode");
    match cli.mode {
        RunMode::Cli => {
            let prompt = load_prompt(&cli)?;
            info!("Dispatching single prompt");
            let outcome = agent.invoke(prompt, cli.execute).await?;
            let output = json!({
                "output": outcome.output,
                "artifacts": outcome.artifacts,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        RunMode::Stdio => {
            info!("Entering stdio mode; awaiting JSON line input");
            stdio::run(&mut agent).await?;
        }
    }
    info!("Execution finished");
    Ok(())
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading prompt from file");
        let content = fs::read_to_string(path)?;
        return Ok(normalize_prompt(content));
    }

    if !cli.prompt.is_empty() {
        info!("Using prompt provided through CLI arguments");
        let joined = cli.prompt.join(" ");
        return Ok(normalize_prompt(joined));
    }

    if atty::isnt(atty::Stream::Stdin) {
        info!("Reading prompt from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(normalize_prompt(buffer));
    }

    warn!("Prompt not provided via arguments, file, or stdin");
    Err("prompt required via arguments, file, or stdin".into())
}

fn normalize_prompt(prompt: String) -> String {
    prompt.trim().to_string()
}
