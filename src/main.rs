//! remountd - remote mount supervisor
//!
//! Watches the connection behind each remote filesystem mount and remounts
//! it once the connection has been failing for long enough.

mod cli;
mod error;
mod lifecycle;
mod machine;
mod manifest;
mod mount;
mod mounter;
mod pinger;
mod remount;
mod retry;
mod warden;

use cli::{Cli, Commands};
use error::Result;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use machine::Machine;
use manifest::{MountDef, RemountdConfig};
use mount::Mount;
use mounter::Mounter;
use pinger::{Monitor, TcpPinger};
use remount::CommandRemounter;

const MANUAL_REMOUNTING: &str = "Manual remount in progress";
const MANUAL_REMOUNT_FAILED: &str = "Manual remount failed";

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// RUST_LOG wins; otherwise info, or debug with --verbose
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
        }
        Commands::Check => {
            let config = manifest::load(&cli.config)?;
            check(&config);
        }
        Commands::Status { mount, json } => {
            let config = manifest::load(&cli.config)?;
            status(&config, mount.as_deref(), json)?;
        }
        Commands::Remount { mount } => {
            let config = manifest::load(&cli.config)?;
            remount(&config, &mount)?;
        }
        Commands::Supervise => {
            let config = manifest::load(&cli.config)?;
            supervise(&config)?;
        }
    }

    Ok(())
}

fn check(config: &RemountdConfig) {
    println!("Configuration is valid.");
    println!(
        "Monitor: every {}s, probe timeout {}s",
        config.monitor.interval, config.monitor.timeout
    );
    println!(
        "Remount: {} attempt(s) while refused, {}ms apart, command timeout {}s",
        config.config.retry_attempts, config.config.retry_delay_ms, config.config.command_timeout
    );
    println!("Mounts ({}):", config.mounts.len());
    for def in &config.mounts {
        println!("  {}", Mount::from(def));
    }
}

#[derive(Serialize)]
struct StatusRow {
    name: String,
    local_path: String,
    remote: String,
    #[serde(flatten)]
    status: machine::StatusSnapshot,
}

fn status(config: &RemountdConfig, name: Option<&str>, json: bool) -> Result<()> {
    let defs: Vec<&MountDef> = match name {
        Some(name) => vec![config.find_mount(name)?],
        None => config.mounts.iter().collect(),
    };

    let mut rows = Vec::with_capacity(defs.len());
    for def in defs {
        let mount = Mount::from(def);
        let machine = Arc::new(Machine::new());
        let pinger = TcpPinger::new(&mount.remote, config.monitor.timeout_duration());
        Monitor::new(
            mount.clone(),
            pinger,
            Arc::clone(&machine),
            config.monitor.interval_duration(),
        )
        .sample();

        rows.push(StatusRow {
            name: mount.name,
            local_path: mount.local_path.display().to_string(),
            remote: mount.remote,
            status: machine.snapshot(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<16} {:<12} {:<24} {}", "MOUNT", "STATUS", "REMOTE", "PATH");
    println!("{}", "-".repeat(72));
    for row in &rows {
        println!(
            "{:<16} {:<12} {:<24} {}",
            row.name,
            row.status.status.to_string(),
            row.remote,
            row.local_path
        );
        if !row.status.message.is_empty() {
            println!("  {}", row.status.message);
        }
    }
    Ok(())
}

fn remount(config: &RemountdConfig, name: &str) -> Result<()> {
    let def = config.find_mount(name)?;
    let mount = Mount::from(def);
    let remounter =
        CommandRemounter::from_config(def, &config.config, config.monitor.timeout_duration());
    let mounter = Mounter::new(Arc::new(Machine::new()));

    println!("Remounting {}...", mount);
    if let Err(e) = mounter.run_remount(&mount, &remounter, MANUAL_REMOUNTING, MANUAL_REMOUNT_FAILED)
    {
        let (status, message) = mounter.machine().get_status();
        eprintln!("Mount '{}' is now {}: {}", mount.name, status, message);
        return Err(e);
    }
    println!("Mount '{}' remounted successfully", mount.name);
    Ok(())
}

fn supervise(config: &RemountdConfig) -> Result<()> {
    let mut supervised = Vec::with_capacity(config.mounts.len());
    let mut monitors = Vec::with_capacity(config.mounts.len());

    for def in &config.mounts {
        let mount = Mount::from(def);
        let machine = Arc::new(Machine::new());
        let pinger = TcpPinger::new(&mount.remote, config.monitor.timeout_duration());
        let remounter =
            CommandRemounter::from_config(def, &config.config, config.monitor.timeout_duration());

        monitors.push(Monitor::new(
            mount.clone(),
            pinger,
            Arc::clone(&machine),
            config.monitor.interval_duration(),
        ));
        supervised.push(warden::Supervised {
            mount,
            mounter: Mounter::new(machine),
            remounter: Arc::new(remounter),
        });
    }

    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let warden = warden::Warden::new(supervised);
        let sender = warden.sender();
        let handle = warden::WardenHandle::new(&warden);

        let mut warden = warden;
        let warden_task = tokio::spawn(async move {
            warden.run().await;
        });

        let mut stop_signals = Vec::with_capacity(monitors.len());
        let mut threads = Vec::with_capacity(monitors.len());
        for monitor in monitors {
            let monitor = monitor.with_warden_handle(handle.clone());
            stop_signals.push(monitor.stop_signal());
            threads.push(monitor.spawn()?);
        }

        info!("supervisor started, press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C, shutting down");
        }

        info!("shutting down");
        for stop_signal in &stop_signals {
            stop_signal.store(true, Ordering::SeqCst);
        }

        warden::Warden::request_shutdown(&sender).await;
        if let Err(e) = warden_task.await {
            warn!(error = %e, "warden task failed");
        }

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;
        if joined.is_err() {
            warn!("failed to join health monitors");
        }

        Ok::<(), error::Error>(())
    })
}
