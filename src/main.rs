//! micron-sync - Alesis Micron parameter sync and editor
//!
//! Binds the configured MIDI ports, keeps the parameter set in step with the
//! device and offers an interactive shell for editing.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use crate::cli::{PushMode, Repl};
use micron_sync::config::{AppConfig, ConfigWatcher};
use micron_sync::params::load_table;
use micron_sync::paths::AppPaths;
use micron_sync::port::{is_unbind_name, MidiBackend, MidirBackend};
use micron_sync::{EditorModel, PortDirection, Preset, Session};

/// Alesis Micron parameter sync and editor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MICRON_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Session file to restore (overrides state.file)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Send the restored patch to the device and exit
    #[arg(long, value_enum)]
    push: Option<PushMode>,

    /// Ask the device for its patch, wait for the reply and exit
    #[arg(long)]
    request_dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();
    paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting micron-sync {}...", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        list_ports_formatted(&MidirBackend::default());
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());
    info!("Configuration file: {}", config_path.display());

    let (config_watcher, config) = if config_path.exists() {
        let (watcher, config) = ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        (Some(watcher), (*config).clone())
    } else {
        warn!("{} not found, using defaults", config_path.display());
        (None, AppConfig::default())
    };

    let table = load_table(config.params.table.as_deref()).await?;
    info!("Parameter table: {} parameters", table.len());

    let backend: Arc<dyn MidiBackend> = Arc::new(MidirBackend::default());
    let session = Arc::new(Session::with_queue_depth(
        table,
        backend,
        config.sysex.framing()?,
        config.midi.queue_depth,
    ));

    let state_file = args
        .state
        .clone()
        .or_else(|| config.state.file.clone())
        .unwrap_or_else(|| paths.state_file.clone());
    if state_file.exists() {
        match Preset::load(&state_file).await {
            Ok(preset) => session.apply_preset(&preset)?,
            Err(e) => warn!("Could not restore session (starting fresh): {:#}", e),
        }
    } else if args.state.is_some() {
        anyhow::bail!("Session file not found: {}", state_file.display());
    }

    // Config names win over ports remembered in the session
    session.engine().set_channel(config.midi.wire_channel());
    bind_configured_ports(&session, &config);

    let mut editor = EditorModel::new(session.engine().clone(), config.editor.history_limit);
    editor.set_randomize_amount(config.editor.randomize_amount);
    editor.set_lock_pitch(config.editor.lock_pitch);
    // A restored session becomes the undo floor
    editor.poll();
    let editor = Arc::new(Mutex::new(editor));

    if args.push.is_some() || args.request_dump {
        return run_once(&session, &editor, &args).await;
    }

    let (repl_done_tx, repl_done_rx) = oneshot::channel();
    let repl = Repl::new(
        session.clone(),
        editor.clone(),
        state_file.clone(),
        tokio::runtime::Handle::current(),
    );
    // Plain thread: a blocked readline must not hold up runtime shutdown
    std::thread::Builder::new()
        .name("repl".into())
        .spawn(move || {
            let result = repl.run();
            let _ = repl_done_tx.send(result);
        })
        .context("Failed to start REPL thread")?;

    run_app(
        &session,
        &editor,
        config.clone(),
        config_watcher,
        repl_done_rx,
    )
    .await?;

    if config.state.autosave {
        let preset = session.capture_preset();
        match preset.save(&state_file).await {
            Ok(()) => info!("Session saved to {}", state_file.display()),
            Err(e) => warn!("Autosave failed: {:#}", e),
        }
    }

    info!("micron-sync shutdown complete");
    Ok(())
}

async fn run_app(
    session: &Arc<Session>,
    editor: &Arc<Mutex<EditorModel>>,
    mut config: AppConfig,
    mut config_watcher: Option<ConfigWatcher>,
    mut repl_done: oneshot::Receiver<Result<()>>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.editor.poll_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = editor.lock().poll();
                if !outcome.is_idle() {
                    trace!(
                        "Poll: {} changed, resync={}, snapshot={}",
                        outcome.changed.len(),
                        outcome.resync_requested,
                        outcome.snapshot_taken
                    );
                }
            }

            Some(new_config) = next_config(&mut config_watcher) => {
                info!("Configuration file changed, applying...");
                apply_config_change(session, editor, &config, &new_config);
                if new_config.editor.poll_interval_ms != config.editor.poll_interval_ms {
                    ticker = tokio::time::interval(Duration::from_millis(new_config.editor.poll_interval_ms));
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                }
                config = new_config;
            }

            result = &mut repl_done => {
                match result {
                    Ok(Err(e)) => warn!("REPL stopped: {:#}", e),
                    Ok(Ok(())) | Err(_) => debug!("REPL finished"),
                }
                break;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    Ok(())
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

/// Bring the running session in line with an edited config
fn apply_config_change(session: &Session, editor: &Mutex<EditorModel>, old: &AppConfig, new: &AppConfig) {
    if new.midi.input_port != old.midi.input_port {
        if let Err(e) = session.select_port(PortDirection::Input, &new.midi.input_port) {
            warn!("{}", e);
        }
    }
    if new.midi.output_port != old.midi.output_port {
        if let Err(e) = session.select_port(PortDirection::Output, &new.midi.output_port) {
            warn!("{}", e);
        }
    }
    if new.midi.channel != old.midi.channel {
        session.engine().set_channel(new.midi.wire_channel());
        info!("Output channel {}", new.midi.channel);
    }
    if new.editor != old.editor {
        let mut editor = editor.lock();
        editor.set_randomize_amount(new.editor.randomize_amount);
        editor.set_lock_pitch(new.editor.lock_pitch);
    }

    if new.sysex != old.sysex || new.params != old.params || new.midi.queue_depth != old.midi.queue_depth {
        warn!("sysex, params and queue_depth changes take effect after restart");
    }
}

fn bind_configured_ports(session: &Session, config: &AppConfig) {
    for (direction, name) in [
        (PortDirection::Input, &config.midi.input_port),
        (PortDirection::Output, &config.midi.output_port),
    ] {
        if is_unbind_name(name) {
            continue;
        }
        if let Err(e) = session.select_port(direction, name) {
            warn!("{}", e);
        }
    }
}

/// `--push` / `--request-dump`
async fn run_once(session: &Session, editor: &Mutex<EditorModel>, args: &Args) -> Result<()> {
    let engine = session.engine();

    if args.request_dump {
        engine.request_dump();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut received = false;
        while tokio::time::Instant::now() < deadline {
            if editor.lock().poll().snapshot_taken {
                received = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if received {
            println!("Received patch '{}'", session.store().program_name().green());
        } else {
            println!("{}", "No patch dump received".yellow());
        }
    }

    match args.push {
        Some(PushMode::Nrpn) => {
            let report = engine.push_via_nrpn();
            println!("Sent {} parameters via NRPN", report.queued);
        }
        Some(PushMode::Sysex) => {
            let outcome = engine.push_via_sysex();
            println!("Patch dump: {:?}", outcome);
        }
        None => {}
    }

    // Dropping the session drains the output queue before the port closes
    Ok(())
}

fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "micron-sync.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

fn list_ports_formatted(backend: &dyn MidiBackend) {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (direction, title) in [
        (PortDirection::Input, "Input Ports:"),
        (PortDirection::Output, "Output Ports:"),
    ] {
        println!("\n{}", title.bold());
        match backend.list_ports(direction) {
            Ok(names) if names.is_empty() => println!("  {}", "No ports found".dimmed()),
            Ok(names) => {
                for name in names {
                    let marker = if name.to_lowercase().contains("micron") {
                        "[MICRON]".bright_green()
                    } else {
                        "[PORT]".normal()
                    };
                    println!("  {} {}", marker, name);
                }
            }
            Err(e) => println!("  {} {}", "Error:".red(), e),
        }
    }
    println!();
}
