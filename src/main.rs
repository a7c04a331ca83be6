// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{AgentsCommands, Cli, Commands, CronCommands, TasksCommands};

/// Exit codes (§4.12).
const EXIT_OK: i32 = 0;
const EXIT_FATAL_INIT: i32 = 1;
const EXIT_INCOMPATIBLE_CLI: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => EXIT_OK,
        Err(HostError::FatalInit(err)) => {
            error!(error = %err, "fatal initialization error");
            EXIT_FATAL_INIT
        }
        Err(HostError::IncompatibleCli(err)) => {
            error!(error = %err, "external CLI is incompatible");
            EXIT_INCOMPATIBLE_CLI
        }
        Err(HostError::Other(err)) => {
            error!(error = %err, "command failed");
            EXIT_FATAL_INIT
        }
    };
    std::process::exit(code);
}

enum HostError {
    FatalInit(anyhow::Error),
    IncompatibleCli(anyhow::Error),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for HostError {
    fn from(e: anyhow::Error) -> Self {
        HostError::Other(e)
    }
}

async fn run(cli: Cli) -> Result<(), HostError> {
    match cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(shell);
            Ok(())
        }
        Some(Commands::ShowConfig) => show_config(cli.config.as_deref()),
        Some(Commands::ToolBridge { server }) => run_tool_bridge(server).await,
        Some(Commands::Agents { command }) => run_agents_command(cli.config.as_deref(), command).await,
        Some(Commands::Cron { command }) => run_cron_command(cli.config.as_deref(), command).await,
        Some(Commands::Tasks { command }) => run_tasks_command(cli.config.as_deref(), command).await,
        Some(Commands::Serve) | None => serve(cli.config.as_deref()).await,
    }
}

fn show_config(config_path: Option<&std::path::Path>) -> Result<(), HostError> {
    let config = clade_config::load(config_path).map_err(|e| HostError::FatalInit(e.into()))?;
    println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
    Ok(())
}

/// Everything shared between `serve` and the one-shot operator subcommands:
/// the resolved `$HOME_DIR`, the loaded config, and the store/registry pair
/// (§9 "construct leaves first").
struct Host {
    home_dir: PathBuf,
    store: Arc<clade_store::Store>,
    registry: Arc<clade_registry::Registry>,
}

fn open_host(config_path: Option<&std::path::Path>) -> anyhow::Result<Host> {
    let home_dir = clade_config::default_home_dir();
    let config = clade_config::load(config_path).context("loading config")?;
    let db_path = home_dir.join("data").join("clade.db");
    let store = Arc::new(clade_store::Store::open(&db_path).context("opening store")?);
    let registry = Arc::new(clade_registry::Registry::new(home_dir.clone(), config));
    Ok(Host {
        home_dir,
        store,
        registry,
    })
}

async fn run_agents_command(
    config_path: Option<&std::path::Path>,
    command: AgentsCommands,
) -> Result<(), HostError> {
    let host = open_host(config_path).map_err(HostError::FatalInit)?;
    match command {
        AgentsCommands::List => {
            let mut agents = host.registry.list();
            agents.sort_by(|a, b| a.id.cmp(&b.id));
            for bundle in agents {
                println!("{}\t{}\t{:?}", bundle.id, bundle.config.name, bundle.config.preset);
            }
        }
        AgentsCommands::Add {
            id,
            name,
            model,
            preset,
        } => {
            let preset = parse_preset(&preset).map_err(|e| HostError::Other(anyhow::anyhow!(e)))?;
            let config = clade_core::AgentConfig {
                name,
                description: String::new(),
                model,
                preset,
                custom_tools: Vec::new(),
                skills: Vec::new(),
                heartbeat: Default::default(),
                reflection: Default::default(),
                max_turns: 50,
                admin: Default::default(),
            };
            host.registry
                .register(&id, config)
                .map_err(|e| HostError::Other(e.into()))?;
            info!(agent = %id, "agent registered");
        }
        AgentsCommands::Remove { id } => {
            host.registry
                .unregister(&id)
                .map_err(|e| HostError::Other(e.into()))?;
            info!(agent = %id, "agent unregistered");
        }
        AgentsCommands::Reindex { id } => {
            let total = reindex_agent(&host, &id).await.map_err(HostError::Other)?;
            info!(agent = %id, chunks = total, "agent memory reindexed");
            println!("{total}");
        }
    }
    Ok(())
}

/// Reindexes every markdown document in an agent's bundle into the memory
/// full-text index: SOUL.md, MEMORY.md, TOOLS.md, and each `memory/*.md`
/// daily activity log (§3 `MemoryChunk` lifetime, §4.1 `indexChunk`).
/// Missing files are skipped rather than treated as an error — a freshly
/// registered agent may not have written a tools-notes file yet.
async fn reindex_agent(host: &Host, agent_id: &str) -> anyhow::Result<usize> {
    let bundle = host
        .registry
        .try_get(agent_id)
        .ok_or_else(|| anyhow::anyhow!("agent {agent_id:?} is not registered"))?;

    host.store.clear_agent_memory(agent_id).await?;

    let mut files = vec![
        ("SOUL.md".to_string(), bundle.soul_path.clone()),
        ("MEMORY.md".to_string(), bundle.memory_path.clone()),
        ("TOOLS.md".to_string(), bundle.tools_path.clone()),
    ];
    if let Ok(entries) = std::fs::read_dir(&bundle.memory_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                let rel = format!("memory/{}", entry.file_name().to_string_lossy());
                files.push((rel, path));
            }
        }
    }

    let mut total = 0;
    for (rel_path, path) in files {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        total += host.store.reindex_file(agent_id, &rel_path, &text).await?;
    }
    Ok(total)
}

fn parse_preset(s: &str) -> Result<clade_core::ToolPreset, String> {
    use clade_core::ToolPreset::*;
    match s {
        "potato" => Ok(Potato),
        "coding" => Ok(Coding),
        "messaging" => Ok(Messaging),
        "full" => Ok(Full),
        "custom" => Ok(Custom),
        other => Err(format!("unknown preset {other:?}")),
    }
}

async fn run_cron_command(
    config_path: Option<&std::path::Path>,
    command: CronCommands,
) -> Result<(), HostError> {
    let host = open_host(config_path).map_err(HostError::FatalInit)?;
    let sessions = build_session_manager(&host).map_err(HostError::FatalInit)?;
    let scheduler = Arc::new(clade_cron::CronScheduler::new(
        host.store.clone(),
        sessions,
        Vec::new(),
    ));
    match command {
        CronCommands::List => {
            let jobs = scheduler.list_jobs().await.map_err(|e| HostError::Other(e.into()))?;
            for job in jobs {
                println!(
                    "{}\t{}\t{}\t{}\tenabled={}",
                    job.id, job.name, job.schedule, job.agent_id, job.enabled
                );
            }
        }
        CronCommands::Add {
            name,
            schedule,
            agent,
            prompt,
            deliver_to,
        } => {
            let job = scheduler
                .add_job(name, schedule, agent, prompt, deliver_to, true)
                .await
                .map_err(|e| HostError::Other(e.into()))?;
            println!("{}", job.id);
        }
        CronCommands::Remove { id } => {
            scheduler.remove_job(&id).await.map_err(|e| HostError::Other(e.into()))?;
        }
        CronCommands::Enable { id } => {
            scheduler.enable_job(&id).await.map_err(|e| HostError::Other(e.into()))?;
        }
        CronCommands::Disable { id } => {
            scheduler.disable_job(&id).await.map_err(|e| HostError::Other(e.into()))?;
        }
    }
    Ok(())
}

async fn run_tasks_command(
    config_path: Option<&std::path::Path>,
    command: TasksCommands,
) -> Result<(), HostError> {
    let host = open_host(config_path).map_err(HostError::FatalInit)?;
    match command {
        TasksCommands::List { agent } => {
            let tasks = host
                .store
                .list_tasks_by_agent(agent.as_deref())
                .await
                .map_err(|e| HostError::Other(e.into()))?;
            for task in tasks {
                println!(
                    "{}\t{}\t{:?}\t{}",
                    task.id, task.agent_id, task.status, task.execute_at
                );
            }
        }
        TasksCommands::Cancel { id } => {
            let cancelled = host
                .store
                .cancel_task(&id)
                .await
                .map_err(|e| HostError::Other(e.into()))?;
            if !cancelled {
                return Err(HostError::Other(anyhow::anyhow!(
                    "task {id:?} is not in a cancellable state"
                )));
            }
        }
    }
    Ok(())
}

async fn run_tool_bridge(server: String) -> Result<(), HostError> {
    let socket_path = std::env::var("IPC_SOCKET_PATH")
        .context("IPC_SOCKET_PATH must be set by the parent host process")
        .map_err(HostError::Other)?;
    let agent_id = std::env::var("AGENT_ID")
        .context("AGENT_ID must be set by the parent host process")
        .map_err(HostError::Other)?;
    let bridge = clade_ipc::ToolBridgeServer::new(socket_path, server, agent_id);
    clade_ipc::serve_stdio(bridge)
        .await
        .map_err(|e| HostError::Other(e.into()))
}

fn build_session_manager(host: &Host) -> anyhow::Result<Arc<clade_session::SessionManager>> {
    let reflection = Arc::new(clade_reflection::ReflectionDriver::new(host.registry.clone()));
    let host_exe = std::env::current_exe().context("resolving current executable path")?;
    let ipc_socket_path = host.home_dir.join(format!("ipc-{}.sock", std::process::id()));
    let cli_path = std::env::var("CLADE_CLI_PATH").unwrap_or_else(|_| "claude".to_string());
    let manager = clade_session::SessionManager::new(
        host.store.clone(),
        host.registry.clone(),
        reflection,
        clade_session::SessionManagerConfig {
            host_exe,
            home_dir: host.home_dir.clone(),
            ipc_socket_path,
            browser: None,
            cli: clade_cli_runner::CliRunnerConfig {
                cli_path,
                ..Default::default()
            },
        },
    );
    Ok(Arc::new(manager))
}

/// Runs the full host loop: probes the external CLI, wires every component
/// (§9 "construct leaves first"), starts the IPC server, task queue ticker,
/// and cron scheduler, then waits for SIGTERM/SIGINT and drains each
/// subsystem in turn before returning (§4.12).
async fn serve(config_path: Option<&std::path::Path>) -> Result<(), HostError> {
    let host = open_host(config_path).map_err(HostError::FatalInit)?;
    let sessions = build_session_manager(&host).map_err(HostError::FatalInit)?;

    // §4.2: probe the external CLI once up front so an incompatible CLI is
    // reported immediately with exit code 2, rather than surfacing as an
    // opaque CLI error on the first real turn.
    let cli_path = std::env::var("CLADE_CLI_PATH").unwrap_or_else(|_| "claude".to_string());
    if let Err(err) = clade_capability::probe(&cli_path).await {
        return Err(HostError::IncompatibleCli(err.into()));
    }

    let ipc_socket_path = host.home_dir.join(format!("ipc-{}.sock", std::process::id()));
    let ipc_server = Arc::new(clade_ipc::IpcServer::new(
        ipc_socket_path,
        host.store.clone(),
        host.registry.clone(),
        sessions.clone(),
        std::env::current_exe().map_err(|e| HostError::FatalInit(e.into()))?,
        host.home_dir.clone(),
        None,
    ));

    let ticker = Arc::new(clade_taskqueue::TaskQueueTicker::new(
        host.store.clone(),
        sessions.clone(),
        clade_taskqueue::TaskQueueTickerConfig::default(),
    ));

    let cron = Arc::new(clade_cron::CronScheduler::new(
        host.store.clone(),
        sessions.clone(),
        Vec::new(),
    ));
    cron.start().await.map_err(|e| HostError::Other(e.into()))?;

    let (ipc_shutdown_tx, ipc_shutdown_rx) = tokio::sync::oneshot::channel();
    let (ticker_shutdown_tx, ticker_shutdown_rx) = tokio::sync::oneshot::channel();

    let ipc_handle = tokio::spawn({
        let ipc_server = ipc_server.clone();
        async move {
            if let Err(err) = ipc_server.run(ipc_shutdown_rx).await {
                error!(error = %err, "IPC server exited with an error");
            }
        }
    });
    let ticker_handle = tokio::spawn({
        let ticker = ticker.clone();
        async move {
            ticker.run(ticker_shutdown_rx).await;
        }
    });

    info!(home = %host.home_dir.display(), "clade host started");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining subsystems");

    cron.stop().await;
    let _ = ipc_shutdown_tx.send(());
    let _ = ticker_shutdown_tx.send(());

    if tokio::time::timeout(Duration::from_secs(10), ipc_handle).await.is_err() {
        warn!("IPC server did not shut down within the grace period");
    }
    if tokio::time::timeout(Duration::from_secs(10), ticker_handle).await.is_err() {
        warn!("task queue ticker did not shut down within the grace period");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // CLADE_LOG_FILE opts into a file sink for long-running daemon mode;
    // otherwise logs go to stderr (§4.12).
    if let Ok(log_path) = std::env::var("CLADE_LOG_FILE") {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .with(filter)
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
