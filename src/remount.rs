//! Command-driven remounting
//!
//! Remounts by running the manifest's unmount and mount commands through
//! `sh -c`, after waiting for the remote to accept connections again.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lifecycle::{MountLifecycle, State};
use crate::manifest::{GlobalConfig, MountDef};
use crate::mount::Mount;
use crate::mounter::Remounter;
use crate::pinger::{Pinger, TcpPinger};
use crate::retry::retry_on_conn_err;

/// Time a command gets to exit after SIGTERM before it is killed
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Time allowed to collect output once a command has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Remounts a single mount using shell commands
pub struct CommandRemounter {
    mount_command: String,
    unmount_command: Option<String>,
    retry_attempts: u32,
    retry_delay: Duration,
    probe_timeout: Duration,
    command_timeout: Duration,
    lifecycle: Mutex<MountLifecycle>,
}

impl CommandRemounter {
    pub fn new(mount_command: impl Into<String>) -> Self {
        Self {
            mount_command: mount_command.into(),
            unmount_command: None,
            retry_attempts: 5,
            retry_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
            lifecycle: Mutex::new(MountLifecycle::new()),
        }
    }

    /// Build from a manifest entry and the global settings
    pub fn from_config(def: &MountDef, config: &GlobalConfig, probe_timeout: Duration) -> Self {
        let remounter = Self::new(&def.mount_command)
            .with_retry(config.retry_attempts, config.retry_delay())
            .with_probe_timeout(probe_timeout)
            .with_command_timeout(config.command_timeout_duration());
        match &def.unmount_command {
            Some(cmd) => remounter.with_unmount_command(cmd),
            None => remounter,
        }
    }

    pub fn with_unmount_command(mut self, command: impl Into<String>) -> Self {
        self.unmount_command = Some(command.into());
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn lifecycle(&self) -> MutexGuard<'_, MountLifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for the remote to stop refusing connections
    fn wait_for_remote(&self, mount: &Mount) -> Result<()> {
        let pinger = TcpPinger::new(&mount.remote, self.probe_timeout);
        retry_on_conn_err(self.retry_attempts, self.retry_delay, || pinger.ping())
    }

    fn remount_steps(&self, mount: &Mount, lifecycle: &mut MountLifecycle) -> Result<()> {
        self.wait_for_remote(mount)?;
        debug!(mount = %mount.name, remote = %mount.remote, "remote is reachable");

        let was_mounted = lifecycle.state() == State::Mounted;
        if was_mounted {
            lifecycle.unmount()?;
        }
        if let Some(cmd) = &self.unmount_command {
            // The mount may already be gone after a long outage
            if let Err(e) = run_command(cmd, self.command_timeout) {
                warn!(mount = %mount.name, error = %e, "unmount failed, continuing");
            }
        }
        if was_mounted {
            lifecycle.unmounted()?;
        }

        lifecycle.mount()?;
        run_command(&self.mount_command, self.command_timeout)?;
        lifecycle.mounted()?;
        Ok(())
    }
}

impl Remounter for CommandRemounter {
    fn remount(&self, mount: &Mount) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state() == State::Failed {
            lifecycle.recover()?;
        }

        info!(mount = %mount, "remounting");
        match self.remount_steps(mount, &mut lifecycle) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(fail_err) = lifecycle.fail() {
                    warn!(mount = %mount.name, error = %fail_err, "could not mark mount failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
impl CommandRemounter {
    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.lifecycle().state()
    }
}

/// Run a shell command, killing it if it outlives `timeout`
pub fn run_command(command: &str, timeout: Duration) -> Result<String> {
    debug!(command, "running command");
    let mut child = Command::new("sh")
        .args(["-c", command])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command: command.to_string(),
            message: e.to_string(),
        })?;

    // Drain both pipes while waiting so a chatty command cannot block on write
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    terminate(&mut child);
                    return Err(Error::CommandTimeout {
                        command: command.to_string(),
                        secs: timeout.as_secs(),
                    });
                }
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                terminate(&mut child);
                return Err(Error::CommandFailed {
                    command: command.to_string(),
                    message: format!("Failed to wait for process: {}", e),
                });
            }
        }
    };

    // A daemonized grandchild may keep the pipes open after the shell exits
    let stdout = stdout.recv_timeout(DRAIN_GRACE).unwrap_or_default();
    let stderr = stderr.recv_timeout(DRAIN_GRACE).unwrap_or_default();
    if status.success() {
        return Ok(stdout);
    }
    let message = match stderr.lines().next() {
        Some(line) if !line.is_empty() => format!("{}: {}", status, line),
        _ => status.to_string(),
    };
    Err(Error::CommandFailed {
        command: command.to_string(),
        message,
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        tx.send(read_pipe(pipe)).ok();
    });
    rx
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    pipe.map(|mut p| {
        let mut buf = String::new();
        p.read_to_string(&mut buf).ok();
        buf
    })
    .unwrap_or_default()
}

/// SIGTERM, then SIGKILL after a grace period, then reap
fn terminate(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    if kill(pid, Signal::SIGTERM).is_ok() {
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
