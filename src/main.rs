use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use officesim::agent::AgentState;
use officesim::bus::{ChatBus, Directory};
use officesim::config::Config;
use officesim::dispatch::Dispatcher;
use officesim::llm::HttpBackend;
use officesim::scheduler::Scheduler;
use officesim::skills::SkillRegistry;
use officesim::store::RecordStore;
use officesim::workspace::Workspace;

/// Officesim - simulated software-company workday with LLM-driven agents
#[derive(Parser, Debug)]
#[command(name = "officesim", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend choice override (groq, openai, ollama, anthropic)
    #[arg(short, long)]
    backend: Option<String>,

    /// Model override for the chosen backend
    #[arg(short, long)]
    model: Option<String>,

    /// Workday duration override, in seconds
    #[arg(short, long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(model) = args.model {
        config.model = Some(model);
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    config.validate()?;

    info!(
        backend = %config.backend,
        agents = config.agents.len(),
        duration_secs = config.duration_secs,
        "officesim starting"
    );

    let store = Arc::new(RecordStore::open(&config.store_dir)?);
    let workspace = Arc::new(Workspace::open(&config.workspace_dir)?);
    let directory = Arc::new(Directory::new());
    let bus = Arc::new(ChatBus::new(
        directory.clone(),
        store.clone(),
        &config.email_domain,
    ));
    let registry = Arc::new(SkillRegistry::with_builtins());
    let dispatcher = Arc::new(Dispatcher::new(bus.clone(), registry));

    let backend = Arc::new(HttpBackend::from_choice(
        &config.backend,
        config.base_url.as_deref(),
        config.model.as_deref(),
    )?);

    let mut agents = Vec::with_capacity(config.agents.len());
    for agent_config in &config.agents {
        workspace.add_agent(&agent_config.name)?;
        let state = AgentState::new(
            &agent_config.name,
            &agent_config.role,
            &agent_config.responsibilities,
            agent_config.skills.clone(),
        );
        directory.update(state.snapshot());
        agents.push(state);
    }

    let resumed = bus.load_emails()?;
    if resumed > 0 {
        info!(emails = resumed, "restored persisted inboxes");
    }

    let scheduler = Scheduler::new(
        &config,
        agents,
        backend,
        bus,
        directory,
        dispatcher,
        store,
        workspace,
    );

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the workday");
            stop.stop();
        }
    });

    scheduler.run().await;

    info!("officesim finished");
    Ok(())
}
