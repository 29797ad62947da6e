//! Automatic remount decisions
//!
//! A [`Mounter`] reacts to connection status transitions. When a mount's
//! connection has been failing for [`REMOUNT_THRESHOLD`] or longer, it runs
//! the supplied [`Remounter`] and reflects the attempt on the [`Machine`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::error::Result;
use crate::machine::{Machine, MachineStatus};
use crate::mount::Mount;
use crate::pinger::{ChangeSummary, ConnectionStatus};

/// How long a connection must have been failing before a remount
pub const REMOUNT_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Machine message while an automatic remount is running
pub const AUTO_REMOUNTING: &str = "Remounting after extended connection failure";

/// Machine message after an automatic remount failed
pub const AUTO_REMOUNT_FAILED: &str = "Automatic remount failed, manual remount required";

/// Performs the actual remount of a mount
pub trait Remounter {
    fn remount(&self, mount: &Mount) -> Result<()>;
}

impl<F> Remounter for F
where
    F: Fn(&Mount) -> Result<()>,
{
    fn remount(&self, mount: &Mount) -> Result<()> {
        self(mount)
    }
}

/// Whether a transition warrants an automatic remount
pub fn should_remount(summary: &ChangeSummary) -> bool {
    summary.old_status == ConnectionStatus::Failure && summary.old_status_dur >= REMOUNT_THRESHOLD
}

/// Drives automatic remounts for one machine
#[derive(Debug, Clone)]
pub struct Mounter {
    machine: Arc<Machine>,
}

impl Mounter {
    pub fn new(machine: Arc<Machine>) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// React to a connection status transition.
    ///
    /// Does nothing unless the connection had been failing for at least
    /// [`REMOUNT_THRESHOLD`]. Otherwise blocks on `remounter` with the
    /// machine showing [`MachineStatus::Remounting`]. Success clears the
    /// status; failure leaves [`MachineStatus::Error`] in place and returns
    /// the remounter's error untouched.
    pub fn handle_change_summary<R>(
        &self,
        mount: &Mount,
        summary: ChangeSummary,
        remounter: &R,
    ) -> Result<()>
    where
        R: Remounter + ?Sized,
    {
        if !should_remount(&summary) {
            return Ok(());
        }

        info!(
            mount = %mount.name,
            failing_for = ?summary.old_status_dur,
            "connection failed for too long, remounting"
        );
        self.run_remount(mount, remounter, AUTO_REMOUNTING, AUTO_REMOUNT_FAILED)
    }

    /// Remount with the given in-progress and failure messages
    pub fn run_remount<R>(
        &self,
        mount: &Mount,
        remounter: &R,
        in_progress: &str,
        failed: &str,
    ) -> Result<()>
    where
        R: Remounter + ?Sized,
    {
        self.machine.set_status(MachineStatus::Remounting, in_progress);

        if let Err(e) = remounter.remount(mount) {
            error!(mount = %mount.name, error = %e, "remount failed");
            self.machine.set_status(MachineStatus::Error, failed);
            return Err(e);
        }

        info!(mount = %mount.name, "remount succeeded");
        self.machine.clear_status();
        Ok(())
    }
}
