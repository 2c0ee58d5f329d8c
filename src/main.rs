//! Overseer CLI entry point.
//!
//! `run` starts every background loop; the other subcommands perform one
//! supervisor or RCON action and exit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use overseer::config::{load_config, resolve_config_path, watch_config, OverseerConfig, RuntimePaths};
use overseer::ledger::SqliteLedger;
use overseer::notify::telegram::bot_token;
use overseer::notify::{run_relay_listener, LogNotifier, TelegramNotifier};
use overseer::pipeline::{ChatRelay, LogPipeline};
use overseer::prober::{HttpStatusProber, StatusProber};
use overseer::rcon::{GameAdmin, RconClient, RconSettings};
use overseer::sinks::NotificationSink;
use overseer::supervisor::daily::{parse_hhmm, run_daily_shutdown, run_daily_startup, DailyTrigger};
use overseer::supervisor::scheduler::{
    effective_interval_minutes, next_restart_local, Announcer, RestartScheduler, RestartTarget,
};
use overseer::supervisor::{Supervisor, SupervisorSettings, SysinfoHost};

/// How long background tasks get to wind down after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Overseer: game server supervisor, RCON client, and log pipeline.
#[derive(Parser)]
#[command(name = "overseer", version, about)]
struct Cli {
    /// Config file (default: $OVERSEER_CONFIG or ./overseer.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the supervisor, scheduler, daily triggers, and log pipeline.
    Run,
    /// Start the game server.
    Start,
    /// Stop the game server.
    Stop {
        /// Skip the save-and-warn sequence.
        #[arg(long)]
        force: bool,
    },
    /// Restart the game server.
    Restart {
        /// Skip the save-and-warn sequence.
        #[arg(long)]
        force: bool,
    },
    /// Print the detected server state and next scheduled restart.
    Status,
    /// Send one RCON command and print the response.
    Rcon {
        /// Command words, joined with spaces.
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Command::Run => handle_run(config_path).await,
        Command::Start => handle_start(&config_path).await,
        Command::Stop { force } => handle_stop(&config_path, force).await,
        Command::Restart { force } => handle_restart(&config_path, force).await,
        Command::Status => handle_status(&config_path).await,
        Command::Rcon { command } => handle_rcon(&config_path, &command.join(" ")).await,
    }
}

/// Shared components built from config.
struct Core {
    supervisor: Arc<Supervisor>,
    admin: Arc<GameAdmin>,
    notifier: Arc<dyn NotificationSink>,
}

fn build_notifier(config: &OverseerConfig) -> Arc<dyn NotificationSink> {
    match TelegramNotifier::from_config(&config.telegram) {
        Some(telegram) => Arc::new(telegram),
        None => {
            info!("telegram not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

fn build_core(config: &OverseerConfig, paths: &RuntimePaths) -> anyhow::Result<Core> {
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;

    let notifier = build_notifier(config);

    let prober: Option<Arc<dyn StatusProber>> = if config.status.base_url.is_empty() {
        None
    } else {
        Some(Arc::new(
            HttpStatusProber::from_config(&config.status).context("failed to build status prober")?,
        ))
    };

    let rcon = match RconSettings::from_config(&config.rcon) {
        Ok(settings) => Some(Arc::new(RconClient::new(settings))),
        Err(e) => {
            info!(reason = %e, "rcon disabled");
            None
        }
    };

    let admin = Arc::new(GameAdmin::new(
        rcon,
        config.rcon.commands.clone(),
        prober.clone(),
    ));

    let mut supervisor = Supervisor::new(
        SupervisorSettings::from_config(config),
        Arc::new(SysinfoHost::new()),
        Arc::clone(&notifier),
    )
    .with_admin(Arc::clone(&admin))
    .with_lock_file(paths.root.join("overseer.lock"));
    if let Some(prober) = prober {
        supervisor = supervisor.with_prober(prober);
    }

    Ok(Core {
        supervisor: Arc::new(supervisor),
        admin,
        notifier,
    })
}

/// Load config and build the core for a one-shot subcommand.
async fn one_shot(config_path: &Path) -> anyhow::Result<(OverseerConfig, Core)> {
    overseer::logging::init_cli();
    let config = load_config(config_path)?;
    let paths = config.runtime_paths()?;
    let core = build_core(&config, &paths)?;
    core.supervisor.detect_initial().await;
    Ok((config, core))
}

/// Run every background loop until Ctrl+C.
async fn handle_run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let paths = config.runtime_paths()?;
    let _logging_guard = overseer::logging::init_production(&paths.logs_dir)?;

    let Core {
        supervisor,
        admin,
        notifier,
    } = build_core(&config, &paths)?;

    let initial = supervisor.detect_initial().await;
    info!(
        config = %config_path.display(),
        state = %initial,
        "overseer started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(tokio::spawn(
        Arc::clone(&supervisor).run_monitor(shutdown_rx.clone()),
    ));

    let announcer: Arc<dyn Announcer> = Arc::clone(&admin) as Arc<dyn Announcer>;
    let target: Arc<dyn RestartTarget> = Arc::clone(&supervisor) as Arc<dyn RestartTarget>;
    let scheduler = Arc::new(RestartScheduler::new(
        &config.schedule,
        Arc::clone(&announcer),
        target,
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&scheduler).run(shutdown_rx.clone()),
    ));

    if let Some(at) = &config.daily.shutdown_at {
        let trigger = DailyTrigger::new(parse_hhmm(at)?);
        tasks.push(tokio::spawn(run_daily_shutdown(
            Arc::clone(&supervisor),
            Arc::clone(&announcer),
            trigger,
            Duration::from_secs(config.daily.pre_announce_secs),
            shutdown_rx.clone(),
        )));
    }
    if let Some(at) = &config.daily.startup_at {
        let trigger = DailyTrigger::new(parse_hhmm(at)?);
        tasks.push(tokio::spawn(run_daily_startup(
            Arc::clone(&supervisor),
            trigger,
            shutdown_rx.clone(),
        )));
    }

    let relay = Arc::new(ChatRelay::new(&config.relay));

    if config.logs.enabled {
        let ledger = SqliteLedger::open(&paths.ledger_db)
            .await
            .with_context(|| format!("failed to open ledger {}", paths.ledger_db.display()))?;
        let pipeline = LogPipeline::new(
            &config,
            Arc::clone(&relay),
            Arc::new(ledger),
            Arc::clone(&notifier),
            Some(Arc::clone(&admin)),
        )?;
        tasks.push(tokio::spawn(pipeline.run(shutdown_rx.clone())));
    } else {
        info!("log pipeline disabled");
    }

    if config.relay.enabled {
        if let (Some(token), Some(chat)) = (bot_token(&config.telegram), config.telegram.relay_chat) {
            let relay = Arc::clone(&relay);
            let admin = Arc::clone(&admin);
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                run_relay_listener(&token, chat, relay, admin, rx).await;
            }));
        }
    }

    let (reload_tx, mut reload_rx) = mpsc::channel::<OverseerConfig>(4);
    tasks.push(tokio::spawn(watch_config(
        config_path.clone(),
        reload_tx,
        shutdown_rx.clone(),
    )));
    {
        let supervisor = Arc::clone(&supervisor);
        let scheduler = Arc::clone(&scheduler);
        tasks.push(tokio::spawn(async move {
            while let Some(reloaded) = reload_rx.recv().await {
                supervisor.reconfigure(SupervisorSettings::from_config(&reloaded));
                scheduler.reconfigure(&reloaded.schedule);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("background task did not stop in time");
        }
    }
    info!("overseer stopped");
    Ok(())
}

async fn handle_start(config_path: &Path) -> anyhow::Result<()> {
    let (_, core) = one_shot(config_path).await?;
    let report = core.supervisor.start().await?;
    println!("started pid {} ({})", report.pid, report.state);
    Ok(())
}

async fn handle_stop(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let (_, core) = one_shot(config_path).await?;
    let report = core.supervisor.stop(!force).await?;
    if report.was_running {
        println!(
            "stopped (graceful exit: {}, terminated: {})",
            report.graceful_exit, report.terminated
        );
    } else {
        println!("server was not running");
    }
    Ok(())
}

async fn handle_restart(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let (_, core) = one_shot(config_path).await?;
    let report = core.supervisor.restart(!force).await?;
    println!("restarted pid {} ({})", report.pid, report.state);
    Ok(())
}

async fn handle_status(config_path: &Path) -> anyhow::Result<()> {
    let (config, core) = one_shot(config_path).await?;
    println!("state: {}", core.supervisor.state());
    if config.schedule.enabled {
        let interval = effective_interval_minutes(config.schedule.interval_minutes);
        let next = next_restart_local(Local::now(), interval);
        println!("next restart: {}", next.format("%Y-%m-%d %H:%M"));
    } else {
        println!("automatic restarts: disabled");
    }
    Ok(())
}

async fn handle_rcon(config_path: &Path, command: &str) -> anyhow::Result<()> {
    overseer::logging::init_cli();
    let config = load_config(config_path)?;
    let settings = RconSettings::from_config(&config.rcon)?;
    let client = RconClient::new(settings);
    let body = client
        .execute(command)
        .await
        .with_context(|| format!("rcon command failed against {}", client.addr()))?;
    println!("{body}");
    Ok(())
}
