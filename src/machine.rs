//! Machine status register
//!
//! Holds the externally visible `(status, message)` pair for one managed
//! connection. Several writers share it (health monitor, mounter, CLI) and
//! every read or write of the pair happens under one lock.

use std::sync::Mutex;

use serde::Serialize;

use crate::pinger::ConnectionStatus;

/// Externally visible status of a managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// No explicit status; readers see the computed online/offline state
    #[default]
    Unknown,
    Online,
    Offline,
    Connected,
    Disconnected,
    Remounting,
    Error,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Unknown => write!(f, "unknown"),
            MachineStatus::Online => write!(f, "online"),
            MachineStatus::Offline => write!(f, "offline"),
            MachineStatus::Connected => write!(f, "connected"),
            MachineStatus::Disconnected => write!(f, "disconnected"),
            MachineStatus::Remounting => write!(f, "remounting"),
            MachineStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    status: MachineStatus,
    message: String,
    connectivity: ConnectionStatus,
}

/// Point-in-time copy of a machine's status, for display
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: MachineStatus,
    pub message: String,
}

/// Shared status register for one managed connection
#[derive(Debug, Default)]
pub struct Machine {
    inner: Mutex<Inner>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A writer that panicked cannot leave a torn pair behind, so the
        // data is still usable after poisoning.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current status and message.
    ///
    /// With no explicit status set, the status is computed from the last
    /// connectivity sample.
    pub fn get_status(&self) -> (MachineStatus, String) {
        let inner = self.lock();
        let status = match inner.status {
            MachineStatus::Unknown => match inner.connectivity {
                ConnectionStatus::Success => MachineStatus::Online,
                ConnectionStatus::Failure => MachineStatus::Offline,
                ConnectionStatus::Unknown => MachineStatus::Unknown,
            },
            explicit => explicit,
        };
        (status, inner.message.clone())
    }

    /// Replace the status and message together
    pub fn set_status(&self, status: MachineStatus, message: &str) {
        let mut inner = self.lock();
        inner.status = status;
        inner.message = message.to_string();
    }

    /// Drop any explicit status so readers see the computed one again
    pub fn clear_status(&self) {
        self.set_status(MachineStatus::Unknown, "");
    }

    /// Record the latest connection sample
    pub fn set_connectivity(&self, connectivity: ConnectionStatus) {
        self.lock().connectivity = connectivity;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let (status, message) = self.get_status();
        StatusSnapshot { status, message }
    }
}
