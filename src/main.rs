use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rand::thread_rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use overseer::api::{self, AppState};
use overseer::events::{EventBus, NotificationSink};
use overseer::launcher::ProcessLauncher;
use overseer::scheduler::{DurationState, Scheduler};
use overseer::storage::{JsonFileStore, ScheduleStore};
use overseer::supervisor::{AgentControl, SupervisorRegistry};
use overseer::Config;

#[derive(Parser)]
#[command(name = "overseer")]
#[command(about = "Supervises long-running automation agents on a schedule", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file. Defaults to $OVERSEER_CONFIG or overseer.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the control API until interrupted.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one agent in the foreground until its session loop ends.
    Run {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        manual: bool,
        /// Start even outside the schedule window.
        #[arg(long)]
        force: bool,
    },
    /// Print a sample duration-mode day plan for an agent.
    Plan {
        #[arg(long)]
        agent: String,
    },
    /// Show whether an agent is inside its schedule window.
    Window {
        #[arg(long)]
        agent: String,
    },
    /// Print the recorded day history of an agent.
    History {
        #[arg(long)]
        agent: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Serve { port } => serve(config, port).await?,
        Commands::Run { agent, manual, force } => run_agent(config, &agent, manual, force).await?,
        Commands::Plan { agent } => print_plan(&config, &agent)?,
        Commands::Window { agent } => print_window(config, &agent).await?,
        Commands::History { agent } => print_history(&config, &agent).await?,
    }

    Ok(())
}

struct Overseer {
    registry: SupervisorRegistry,
    scheduler: Arc<Scheduler>,
    events: EventBus,
}

async fn build_overseer(config: Config) -> Overseer {
    let store: Arc<dyn ScheduleStore> = Arc::new(JsonFileStore::new(config.state_dir.clone()));
    let shared = config.shared();
    let events = EventBus::default();
    let registry = SupervisorRegistry::new(
        shared.clone(),
        Arc::new(ProcessLauncher),
        Arc::new(events.clone()) as Arc<dyn NotificationSink>,
    );
    let scheduler = Scheduler::new(
        shared,
        Arc::new(registry.clone()) as Arc<dyn AgentControl>,
        store,
    )
    .await;

    Overseer {
        registry,
        scheduler: Arc::new(scheduler),
        events,
    }
}

async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.api_port);
    let overseer = build_overseer(config).await;

    let scheduler = overseer.scheduler.clone();
    let ticking = tokio::spawn(async move { scheduler.run().await });

    let state = AppState {
        registry: overseer.registry.clone(),
        scheduler: overseer.scheduler.clone(),
        events: overseer.events.clone(),
    };

    tokio::select! {
        served = api::serve(state, port) => served?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            log::info!("interrupted, stopping all agents");
        }
    }

    overseer.scheduler.shutdown();
    overseer.registry.stop_all().await;
    ticking.await?;
    Ok(())
}

async fn run_agent(config: Config, agent: &str, manual: bool, force: bool) -> Result<()> {
    let overseer = build_overseer(config).await;
    let now = Local::now();
    if !force && !overseer.scheduler.is_within_schedule(agent, now) {
        match overseer.scheduler.next_window_start(agent, now) {
            Some(next) => println!("{} is outside its schedule, next window at {}", agent, next.format("%Y-%m-%d %H:%M")),
            None => println!("{} is outside its schedule", agent),
        }
        return Ok(());
    }

    let registry = overseer.registry.clone();
    let name = agent.to_string();
    let running = tokio::spawn(async move { registry.start(&name, false, manual).await });

    tokio::select! {
        finished = running => finished??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            overseer.registry.stop_all().await;
        }
    }
    Ok(())
}

fn print_plan(config: &Config, agent: &str) -> Result<()> {
    let agent_config = config
        .agent(agent)
        .with_context(|| format!("agent {} is not configured", agent))?;

    let mut plan = DurationState::default();
    plan.initialize_day(agent, &agent_config.scheduler.duration, Local::now(), &mut thread_rng());
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn print_window(config: Config, agent: &str) -> Result<()> {
    if config.agent(agent).is_none() {
        anyhow::bail!("agent {} is not configured", agent);
    }
    let overseer = build_overseer(config).await;
    let summary = overseer.scheduler.summary(agent, Local::now());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn print_history(config: &Config, agent: &str) -> Result<()> {
    let store = JsonFileStore::new(config.state_dir.clone());
    let history = store.load_history(agent).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
