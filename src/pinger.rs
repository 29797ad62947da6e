//! Connection health monitoring
//!
//! Samples a mount's remote endpoint and reports status transitions as
//! [`ChangeSummary`] events, each describing the status that just ended and
//! how long it lasted.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::machine::Machine;
use crate::mount::Mount;
use crate::warden::WardenHandle;

/// Sampled health of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No sample taken yet
    #[default]
    Unknown,
    Success,
    Failure,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Unknown => write!(f, "unknown"),
            ConnectionStatus::Success => write!(f, "success"),
            ConnectionStatus::Failure => write!(f, "failure"),
        }
    }
}

/// A connection status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Status held before the transition
    pub old_status: ConnectionStatus,
    /// How long `old_status` persisted
    pub old_status_dur: Duration,
    /// Status after the transition
    pub new_status: ConnectionStatus,
}

#[cfg(test)]
impl ChangeSummary {
    /// Summary of a transition away from `old_status`
    pub fn new(old_status: ConnectionStatus, old_status_dur: Duration) -> Self {
        let new_status = match old_status {
            ConnectionStatus::Failure => ConnectionStatus::Success,
            _ => ConnectionStatus::Failure,
        };
        Self {
            old_status,
            old_status_dur,
            new_status,
        }
    }
}

/// Tracks the current status and when it began
#[derive(Debug)]
pub struct StatusTracker {
    status: ConnectionStatus,
    since: Instant,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            status: ConnectionStatus::Unknown,
            since: now,
        }
    }

    /// Record a sample taken now
    pub fn record(&mut self, status: ConnectionStatus) -> Option<ChangeSummary> {
        self.record_at(status, Instant::now())
    }

    /// Record a sample taken at `now`, returning a summary on transition
    pub fn record_at(&mut self, status: ConnectionStatus, now: Instant) -> Option<ChangeSummary> {
        if status == self.status {
            return None;
        }

        let summary = ChangeSummary {
            old_status: self.status,
            old_status_dur: now.saturating_duration_since(self.since),
            new_status: status,
        };
        self.status = status;
        self.since = now;
        Some(summary)
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can check whether a remote is reachable
pub trait Pinger: Send {
    fn ping(&self) -> Result<()>;
}

/// Pings by opening a TCP connection to the remote
///
/// The remote is resolved on every ping, so a lookup failure counts as a
/// failed sample and address changes are picked up.
#[derive(Debug, Clone)]
pub struct TcpPinger {
    remote: String,
    timeout: Duration,
}

impl TcpPinger {
    pub fn new(remote: impl Into<String>, timeout: Duration) -> Self {
        Self {
            remote: remote.into(),
            timeout,
        }
    }
}

impl Pinger for TcpPinger {
    fn ping(&self) -> Result<()> {
        let mut last_err = None;
        for addr in self.remote.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("'{}' resolved to no address", self.remote),
                )
            })
            .into())
    }
}

/// Background health monitor for a single mount
pub struct Monitor<P: Pinger> {
    mount: Mount,
    pinger: P,
    machine: Arc<Machine>,
    tracker: StatusTracker,
    interval: Duration,
    stop_signal: Arc<AtomicBool>,
    warden_handle: Option<WardenHandle>,
}

impl<P: Pinger> Monitor<P> {
    pub fn new(mount: Mount, pinger: P, machine: Arc<Machine>, interval: Duration) -> Self {
        Self {
            mount,
            pinger,
            machine,
            tracker: StatusTracker::new(),
            interval,
            stop_signal: Arc::new(AtomicBool::new(false)),
            warden_handle: None,
        }
    }

    /// Forward change summaries to the Warden
    pub fn with_warden_handle(mut self, handle: WardenHandle) -> Self {
        self.warden_handle = Some(handle);
        self
    }

    /// Get stop signal for external control
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Take one sample, update the machine and report any transition
    pub fn sample(&mut self) -> Option<ChangeSummary> {
        let status = match self.pinger.ping() {
            Ok(()) => ConnectionStatus::Success,
            Err(e) => {
                debug!(mount = %self.mount.name, error = %e, "ping failed");
                ConnectionStatus::Failure
            }
        };
        self.machine.set_connectivity(status);

        let summary = self.tracker.record(status)?;
        info!(
            mount = %self.mount.name,
            from = %summary.old_status,
            to = %summary.new_status,
            after = ?summary.old_status_dur,
            "connection status changed"
        );

        if let Some(handle) = &self.warden_handle {
            if let Err(e) = handle.notify_change_blocking(&self.mount.name, summary) {
                warn!(mount = %self.mount.name, error = %e, "failed to notify warden");
            }
        }
        Some(summary)
    }

    /// Sample until stopped
    pub fn run(mut self) {
        info!(mount = %self.mount.name, interval = ?self.interval, "health monitor started");
        while !self.is_stopped() {
            self.sample();
            self.sleep_interval();
        }
        info!(mount = %self.mount.name, "health monitor stopped");
    }

    /// Sleep in short slices so a stop request is noticed promptly
    fn sleep_interval(&self) {
        let slice = Duration::from_millis(100);
        let deadline = Instant::now() + self.interval;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

impl<P: Pinger + 'static> Monitor<P> {
    /// Run on a dedicated thread
    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        let name = format!("monitor-{}", self.mount.name);
        let handle = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(handle)
    }
}
