//! curfewd - the curfew lock service
//!
//! This is the main entry point for curfewd.
//! It wires together all the components:
//! - Configuration loading
//! - Audit store and encrypted schedule store
//! - Lock orchestrator on the Linux host adapters
//! - Scheduler loop
//! - Password-gated CLI actions

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use curfew_config::{CurfewConfig, load_or_init_config};
use curfew_core::{Control, LockOrchestrator, SchedulerEngine, Supervisor};
use curfew_host_api::{AudioController, NotificationSink, StopMode};
use curfew_host_linux::{
    DesktopNotifier, LinuxAudioController, LinuxHost, UserKeyProtector, VtSurfaceManager,
};
use curfew_store::{
    AuditEvent, AuditEventType, ReleasePath, ScheduleConfig, SecureScheduleStore, SqliteStore, Store,
};
use curfew_util::{
    AUDIT_DB_FILENAME, CURFEW_CONFIG_ENV, SCHEDULE_FILENAME, USER_KEY_FILENAME, WallClock,
    default_config_path, default_data_dir,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// curfewd - Locks this session on demand or on a daily schedule
#[derive(Parser, Debug)]
#[command(name = "curfewd")]
#[command(about = "Locks this session on demand or on a daily schedule", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/curfew/config.toml, or $CURFEW_CONFIG)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (default: ~/.local/share/curfew, or $CURFEW_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler (default). Locks at once if the window is open.
    Run,

    /// Lock now and stay running; Ctrl+C unlocks
    LockNow,

    /// Set or change the unlock password
    SetPassword,

    /// Change the daily lock window
    SetSchedule {
        /// Window start, HH:MM
        #[arg(long)]
        start: Option<WallClock>,

        /// Window end, HH:MM
        #[arg(long)]
        end: Option<WallClock>,

        /// Turn the schedule on
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Turn the schedule off
        #[arg(long)]
        disable: bool,

        /// Minutes before the window to warn, e.g. 5,1
        #[arg(long, value_delimiter = ',')]
        notify: Option<Vec<u32>>,
    },

    /// Change the loopback control API settings
    SetApi {
        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the schedule, settings and recent activity
    Status,
}

/// Fields given to `set-schedule`. Anything left `None` keeps its stored
/// value, including whether the schedule is on.
#[derive(Debug, Default)]
struct ScheduleEdit {
    start: Option<WallClock>,
    end: Option<WallClock>,
    enabled: Option<bool>,
    notify: Option<Vec<u32>>,
}

impl ScheduleEdit {
    fn apply(self, schedule: &mut ScheduleConfig) {
        if let Some(start) = self.start {
            schedule.start = start.to_string();
        }
        if let Some(end) = self.end {
            schedule.end = end.to_string();
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(notify) = self.notify {
            schedule.notify_minutes = notify.into_iter().collect();
        }
    }
}

/// Main service state
struct Service {
    config_path: PathBuf,
    data_dir: PathBuf,
    config: CurfewConfig,
    schedule: SecureScheduleStore,
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
    orchestrator: Arc<LockOrchestrator>,
    control: Control,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = load_or_init_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(config_path = %args.config.display(), "Configuration loaded");

        let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(AUDIT_DB_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        let protector = Arc::new(UserKeyProtector::new(data_dir.join(USER_KEY_FILENAME)));
        let schedule = SecureScheduleStore::new(data_dir.join(SCHEDULE_FILENAME), protector);

        let audio = LinuxAudioController::detect().await;
        if audio.capabilities().available {
            info!(backend = ?audio.capabilities().backend, "Audio controller initialized");
        } else {
            warn!("No sound backend detected, audio will not be muted while locked");
        }

        let notifier: Arc<dyn NotificationSink> = Arc::new(DesktopNotifier::new());

        let supervisor = Supervisor::new(
            Arc::new(LinuxHost::new()),
            &config.presentation,
            config.hotkey.clone(),
        )
        .with_stop_mode(StopMode::Graceful {
            attempts: config.scheduler.stop_poll_attempts,
            interval: Duration::from_millis(config.scheduler.stop_poll_millis),
        })
        .with_env(CURFEW_CONFIG_ENV, args.config.display().to_string())
        .with_log_path(data_dir.join("lockscreen.log"));

        let orchestrator = LockOrchestrator::with_audio(
            Arc::new(VtSurfaceManager::new()),
            supervisor,
            Some(Arc::new(audio) as Arc<dyn AudioController>),
            schedule.clone(),
            store.clone(),
            notifier.clone(),
            config.presentation.surface_name.clone(),
        );

        let control = Control::new(
            orchestrator.clone(),
            schedule.clone(),
            store.clone(),
            config.clone(),
            Some(args.config.clone()),
        );

        Ok(Self {
            config_path: args.config.clone(),
            data_dir,
            config,
            schedule,
            store,
            notifier,
            orchestrator,
            control,
        })
    }

    fn require_password(&self) -> Result<()> {
        if !self.control.has_password() {
            bail!("No password is set. Run `curfewd set-password` first.");
        }
        Ok(())
    }

    async fn run(self) -> Result<()> {
        self.require_password()?;
        self.store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let scheduler = SchedulerEngine::new(
            self.orchestrator.clone(),
            self.schedule.clone(),
            self.store.clone(),
            self.notifier.clone(),
            Duration::from_millis(self.config.scheduler.tick_millis),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

        info!("Service running");
        println!("curfew scheduler running. Press Ctrl+C to exit.");

        wait_for_shutdown().await?;

        let _ = shutdown_tx.send(true);
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Scheduler task failed");
        }

        self.shutdown().await;
        Ok(())
    }

    async fn lock_now(self) -> Result<()> {
        self.require_password()?;
        self.store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let password = prompt("Password: ")?;
        let decision = self.control.lock(&password).await?;
        drop(password);

        info!(session_id = %decision.snapshot().session_id, "Locked from the command line");
        println!("Locked. Press Ctrl+C to unlock and exit.");

        // Exit once the lock screen lets the user back in, or on a signal
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);
        let mut poll = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result?;
                    break;
                }
                _ = poll.tick() => {
                    if !self.orchestrator.is_locked().await {
                        info!("Lock released");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down curfewd");

        self.orchestrator.unlock(ReleasePath::Shutdown).await;

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
    }

    fn set_password(&self) -> Result<()> {
        let current = if self.control.has_password() {
            Some(prompt("Current password: ")?)
        } else {
            println!("No password is set yet. Choose one now.");
            None
        };
        let new = prompt("New password: ")?;
        let confirmation = prompt("Confirm new password: ")?;

        self.control
            .set_password(current.as_ref().map(|p| p.as_str()), &new, &confirmation)?;
        println!("Password saved.");
        Ok(())
    }

    fn set_schedule(&self, edit: ScheduleEdit) -> Result<()> {
        let mut schedule = self.schedule.read();
        edit.apply(&mut schedule);

        let password = prompt("Password: ")?;
        let window = self.control.save_schedule(&password, &schedule)?;

        if schedule.enabled {
            println!("Schedule enabled: locks daily {}.", window);
            if window.start == window.end {
                println!("Start and end are equal, so the window never opens.");
            }
        } else {
            println!("Schedule saved, disabled. Pass --enable to turn it on.");
        }
        Ok(())
    }

    fn set_api(&self, enabled: Option<bool>, host: Option<String>, port: Option<u16>) -> Result<()> {
        let mut api = self.control.config().api;
        if let Some(enabled) = enabled {
            api.enabled = enabled;
        }
        if let Some(host) = host {
            api.host = host;
        }
        if let Some(port) = port {
            api.port = port;
        }

        let password = prompt("Password: ")?;
        self.control.set_api_config(&password, api.clone())?;
        println!(
            "API {} on {}:{}.",
            if api.enabled { "enabled" } else { "disabled" },
            api.host,
            api.port
        );
        Ok(())
    }

    fn status(&self) -> Result<()> {
        let schedule = self.schedule.read();
        let config = self.control.config();

        println!("Config:     {}", self.config_path.display());
        println!("Data:       {}", self.data_dir.display());
        println!(
            "Password:   {}",
            if config.password.is_configured() { "set" } else { "not set" }
        );
        println!(
            "Schedule:   {} {}-{}",
            if schedule.enabled { "enabled" } else { "disabled" },
            schedule.start,
            schedule.end
        );
        if let Err(e) = schedule.window() {
            println!("            unusable: {}", e);
        }
        let notify: Vec<String> = schedule
            .notify_minutes
            .iter()
            .rev()
            .map(|m| m.to_string())
            .collect();
        println!("Warnings:   {} minutes before", notify.join(", "));
        println!(
            "API:        {} on {}:{}",
            if config.api.enabled { "enabled" } else { "disabled" },
            config.api.host,
            config.api.port
        );
        println!("Hotkey:     {}", config.hotkey);
        println!("Lock screen: {}", config.presentation.argv.join(" "));
        println!(
            "Audit log:  {}",
            if self.store.is_healthy() { "ok" } else { "unavailable" }
        );

        let events = self.store.get_recent_audits(10)?;
        if !events.is_empty() {
            println!();
            println!("Recent activity:");
            for event in events {
                println!("  {}  {:?}", event.timestamp.format("%Y-%m-%d %H:%M:%S"), event.event);
            }
        }
        Ok(())
    }
}

fn prompt(label: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(label)
        .map(Zeroizing::new)
        .context("Failed to read password")
}

/// Resolve on SIGTERM, SIGINT or SIGHUP
async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "curfewd starting");
    if curfew_util::is_mock_time_active() {
        warn!(now = %curfew_util::now(), "Mock time is active, the schedule follows the overridden clock");
    }

    let service = Service::new(&args).await?;
    match args.command.unwrap_or(Command::Run) {
        Command::Run => service.run().await,
        Command::LockNow => service.lock_now().await,
        Command::SetPassword => service.set_password(),
        Command::SetSchedule {
            start,
            end,
            enable,
            disable,
            notify,
        } => service.set_schedule(ScheduleEdit {
            start,
            end,
            enabled: match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            notify,
        }),
        Command::SetApi {
            enabled,
            host,
            port,
        } => service.set_api(enabled, host, port),
        Command::Status => service.status(),
    }
}
