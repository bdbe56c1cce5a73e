//! Thinnest possible external collaborator: loads config, reads a diff and
//! its file list off disk, builds the default agent fleet from whichever
//! provider credentials are present in the environment, runs the router,
//! and prints the merged report as JSON.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use revrouter_agents::{ControlFlowAgent, LlmAgent, OllamaAgent, SemgrepAgent};
use revrouter_config::Config;
use revrouter_core::model::{DiffFile, Provider};
use revrouter_core::router::{Agent, Router};
use revrouter_provider::anthropic::AnthropicClient;
use revrouter_provider::openai::{AzureOpenAiClient, OpenAiClient};
use revrouter_provider::ChatClient;

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Parser, Debug)]
#[command(name = "revrouter", about = "Runs the review-router agent fleet over a diff")]
struct Cli {
    /// Path to the repository the diff applies to.
    #[arg(long)]
    repo: PathBuf,

    /// Path to a unified diff file covering the changed files.
    #[arg(long)]
    diff: PathBuf,

    /// Path to a JSON array of `DiffFile` entries (path/status/additions/deletions).
    #[arg(long)]
    files: PathBuf,

    /// Optional project-level TOML config, merged on top of defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn client_fleet(process_env: &HashMap<String, String>) -> HashMap<Provider, Arc<dyn ChatClient>> {
    let mut clients: HashMap<Provider, Arc<dyn ChatClient>> = HashMap::new();

    if let Some(key) = process_env.get("ANTHROPIC_API_KEY") {
        clients.insert(Provider::Anthropic, Arc::new(AnthropicClient::new(key.clone(), None)));
    }
    if let Some(key) = process_env.get("OPENAI_API_KEY") {
        clients.insert(Provider::Openai, Arc::new(OpenAiClient::new(key.clone(), None)));
    }
    if let (Some(key), Some(endpoint), Some(deployment)) = (
        process_env.get("AZURE_OPENAI_API_KEY"),
        process_env.get("AZURE_OPENAI_ENDPOINT"),
        process_env.get("AZURE_OPENAI_DEPLOYMENT"),
    ) {
        clients.insert(
            Provider::AzureOpenai,
            Arc::new(AzureOpenAiClient::new(key.clone(), endpoint.clone(), deployment.clone(), None)),
        );
    }

    clients
}

fn default_fleet(process_env: &HashMap<String, String>) -> Vec<Arc<dyn Agent>> {
    let mut fleet: Vec<Arc<dyn Agent>> = Vec::new();

    let clients = client_fleet(process_env);
    if !clients.is_empty() {
        fleet.push(Arc::new(LlmAgent::new(clients)));
    }

    let ollama_base_url = process_env
        .get("OLLAMA_BASE_URL")
        .cloned()
        .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
    fleet.push(Arc::new(OllamaAgent::new(ollama_base_url)));

    fleet.push(Arc::new(SemgrepAgent::new()));
    fleet.push(Arc::new(ControlFlowAgent::new()));

    fleet
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::default().merge(Config::load_file(path)?)),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let diff_content = std::fs::read_to_string(&cli.diff)?;
    let files_raw = std::fs::read_to_string(&cli.files)?;
    let files: Vec<DiffFile> = serde_json::from_str(&files_raw)?;
    let config = load_config(cli.config.as_ref())?;

    let process_env: HashMap<String, String> = std::env::vars().collect();
    let home = process_env.get("HOME").cloned().unwrap_or_default();

    let router = Router::new(config, process_env.clone(), home);
    let fleet = default_fleet(&process_env);

    let summary = router.run(&cli.repo, &files, &diff_content, fleet).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
