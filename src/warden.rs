//! The Warden - mount supervisor
//!
//! Receives connection status transitions from the health monitors and
//! hands each one to the mount's [`Mounter`]:
//! - Remounts run on the blocking pool so the event loop keeps draining
//! - A transition for a mount that is already remounting is dropped
//! - Shutdown waits for in-flight remounts to finish

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mount::Mount;
use crate::mounter::{Mounter, Remounter, should_remount};
use crate::pinger::ChangeSummary;

/// Events the Warden receives
#[derive(Debug)]
pub enum WardenEvent {
    /// A mount's connection status changed
    Changed { mount: String, summary: ChangeSummary },
    /// Shutdown the Warden
    Shutdown,
}

/// Everything the Warden needs to remount one mount
pub struct Supervised {
    pub mount: Mount,
    pub mounter: Mounter,
    pub remounter: Arc<dyn Remounter + Send + Sync>,
}

/// The Warden supervises all mounts
pub struct Warden {
    /// Channel to receive events
    rx: mpsc::Receiver<WardenEvent>,
    /// Sender for notifying the Warden (cloneable)
    tx: mpsc::Sender<WardenEvent>,
    /// Supervised mounts by name
    mounts: HashMap<String, Arc<Supervised>>,
    /// Mounts with a remount in progress
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Running remount tasks
    tasks: JoinSet<()>,
}

impl Warden {
    /// Create a new Warden for the given mounts
    pub fn new(mounts: Vec<Supervised>) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            rx,
            tx,
            mounts: mounts
                .into_iter()
                .map(|s| (s.mount.name.clone(), Arc::new(s)))
                .collect(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: JoinSet::new(),
        }
    }

    /// Get a sender to notify the Warden of events
    pub fn sender(&self) -> mpsc::Sender<WardenEvent> {
        self.tx.clone()
    }

    /// Run the Warden event loop
    ///
    /// This should be spawned as a tokio task
    pub async fn run(&mut self) {
        info!(mounts = self.mounts.len(), "warden started");

        while let Some(event) = self.rx.recv().await {
            match event {
                WardenEvent::Changed { mount, summary } => self.handle_change(&mount, summary),
                WardenEvent::Shutdown => {
                    info!("warden shutting down");
                    break;
                }
            }
        }

        if !self.tasks.is_empty() {
            info!(remounts = self.tasks.len(), "waiting for in-flight remounts");
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "remount task panicked");
            }
        }

        info!("warden stopped");
    }

    fn handle_change(&mut self, name: &str, summary: ChangeSummary) {
        let Some(supervised) = self.mounts.get(name) else {
            warn!(mount = name, "change reported for unknown mount");
            return;
        };

        if !should_remount(&summary) {
            debug!(mount = name, from = %summary.old_status, "no remount needed");
            return;
        }

        if !lock(&self.in_flight).insert(name.to_string()) {
            warn!(mount = name, "remount already in progress, dropping change");
            return;
        }

        let supervised = Arc::clone(supervised);
        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            name: name.to_string(),
        };
        self.tasks.spawn_blocking(move || {
            let _guard = guard;
            let Supervised {
                mount,
                mounter,
                remounter,
            } = &*supervised;

            if let Err(e) = mounter.handle_change_summary(mount, summary, remounter.as_ref()) {
                error!(mount = %mount.name, error = %e, "automatic remount failed");
            }
        });
    }

    /// Request the Warden to shutdown
    pub async fn request_shutdown(sender: &mpsc::Sender<WardenEvent>) {
        let _ = sender.send(WardenEvent::Shutdown).await;
    }
}

/// Clears a mount's in-flight entry when its remount task ends, even by panic
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.name);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for interacting with the Warden from non-async code
#[derive(Clone)]
pub struct WardenHandle {
    sender: mpsc::Sender<WardenEvent>,
}

impl WardenHandle {
    /// Create a handle from a Warden
    pub fn new(warden: &Warden) -> Self {
        Self {
            sender: warden.sender(),
        }
    }

    /// Report a connection status change (blocking version for sync code)
    pub fn notify_change_blocking(&self, mount: &str, summary: ChangeSummary) -> Result<()> {
        self.sender
            .blocking_send(WardenEvent::Changed {
                mount: mount.to_string(),
                summary,
            })
            .map_err(|_| Error::Io(std::io::Error::other("Warden channel closed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Machine, MachineStatus};
    use crate::pinger::ConnectionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn supervised(remounter: Arc<dyn Remounter + Send + Sync>) -> (Supervised, Arc<Machine>) {
        let machine = Arc::new(Machine::new());
        let supervised = Supervised {
            mount: Mount::new("projects", "/mnt/projects", "127.0.0.1:22"),
            mounter: Mounter::new(Arc::clone(&machine)),
            remounter,
        };
        (supervised, machine)
    }

    fn long_failure() -> ChangeSummary {
        ChangeSummary::new(ConnectionStatus::Failure, Duration::from_secs(40 * 60))
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Arc<dyn Remounter + Send + Sync> {
        let calls = Arc::clone(calls);
        Arc::new(move |_: &Mount| -> Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_long_failure_triggers_remount() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (supervised, machine) = supervised(counting(&calls));
        machine.set_status(MachineStatus::Connected, "before");

        let mut warden = Warden::new(vec![supervised]);
        let sender = warden.sender();
        sender
            .send(WardenEvent::Changed {
                mount: "projects".into(),
                summary: long_failure(),
            })
            .await
            .unwrap();
        Warden::request_shutdown(&sender).await;
        warden.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(machine.get_status(), (MachineStatus::Unknown, String::new()));
    }

    #[tokio::test]
    async fn test_short_failure_and_unknown_mount_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (supervised, _machine) = supervised(counting(&calls));

        let mut warden = Warden::new(vec![supervised]);
        let sender = warden.sender();
        let short = ChangeSummary::new(ConnectionStatus::Failure, Duration::from_secs(60));
        sender
            .send(WardenEvent::Changed {
                mount: "projects".into(),
                summary: short,
            })
            .await
            .unwrap();
        sender
            .send(WardenEvent::Changed {
                mount: "unknown".into(),
                summary: long_failure(),
            })
            .await
            .unwrap();
        Warden::request_shutdown(&sender).await;
        warden.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overlapping_remount_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let remounter: Arc<dyn Remounter + Send + Sync> = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &Mount| -> Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                release_rx.lock().unwrap().recv().unwrap();
                Ok(())
            })
        };
        let (supervised, _machine) = supervised(remounter);

        let mut warden = Warden::new(vec![supervised]);
        let sender = warden.sender();
        for _ in 0..2 {
            sender
                .send(WardenEvent::Changed {
                    mount: "projects".into(),
                    summary: long_failure(),
                })
                .await
                .unwrap();
        }
        Warden::request_shutdown(&sender).await;

        // Hold the first remount open while the loop drains both events
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            release_tx.send(()).unwrap();
        });
        warden.run().await;
        releaser.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicked_remount_does_not_block_later_ones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let remounter: Arc<dyn Remounter + Send + Sync> = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &Mount| -> Result<()> {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("remount blew up");
                }
                Ok(())
            })
        };
        let (supervised, _machine) = supervised(remounter);

        let mut warden = Warden::new(vec![supervised]);
        let sender = warden.sender();
        for _ in 0..2 {
            sender
                .send(WardenEvent::Changed {
                    mount: "projects".into(),
                    summary: long_failure(),
                })
                .await
                .unwrap();
            Warden::request_shutdown(&sender).await;
            warden.run().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(lock(&warden.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_failed_remount_leaves_error_status() {
        let failing: Arc<dyn Remounter + Send + Sync> = Arc::new(|_: &Mount| -> Result<()> {
            Err(Error::CommandFailed {
                command: "remount".into(),
                message: "boom".into(),
            })
        });
        let (supervised, machine) = supervised(failing);

        let mut warden = Warden::new(vec![supervised]);
        let sender = warden.sender();
        sender
            .send(WardenEvent::Changed {
                mount: "projects".into(),
                summary: long_failure(),
            })
            .await
            .unwrap();
        Warden::request_shutdown(&sender).await;
        warden.run().await;

        assert_eq!(machine.get_status().0, MachineStatus::Error);
    }
}
