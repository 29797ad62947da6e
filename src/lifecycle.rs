//! Mount lifecycle state machine
//!
//! Tracks where a remount is between unmounting and mounting again, using
//! the state-machines crate in dynamic dispatch mode.

use state_machines::state_machine;

use crate::error::{self, Error};

state_machine! {
    name: MountMachine,
    dynamic: true,
    initial: Mounted,
    states: [Mounted, Unmounting, Unmounted, Mounting, Failed],
    events {
        unmount {
            transition: { from: Mounted, to: Unmounting }
        }
        unmounted {
            transition: { from: Unmounting, to: Unmounted }
        }
        mount {
            transition: { from: Unmounted, to: Mounting }
        }
        mounted {
            transition: { from: Mounting, to: Mounted }
        }
        fail {
            transition: { from: [Mounted, Unmounting, Unmounted, Mounting], to: Failed }
        }
        recover {
            transition: { from: Failed, to: Unmounted }
        }
    }
}

/// Lifecycle state for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Mounted,
    Unmounting,
    Unmounted,
    Mounting,
    Failed,
}

impl State {
    fn from_name(s: &str) -> Self {
        match s {
            "Mounted" => State::Mounted,
            "Unmounting" => State::Unmounting,
            "Unmounted" => State::Unmounted,
            "Mounting" => State::Mounting,
            _ => State::Failed,
        }
    }
}

/// Lifecycle of a single mount
pub struct MountLifecycle {
    machine: DynamicMountMachine<()>,
}

impl MountLifecycle {
    pub fn new() -> Self {
        Self {
            machine: MountMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> State {
        State::from_name(self.machine.current_state())
    }

    fn handle(&mut self, event: MountMachineEvent) -> error::Result<()> {
        let from = self.machine.current_state().to_string();
        self.machine
            .handle(event)
            .map_err(|e| Error::Lifecycle(format!("invalid transition from {}: {:?}", from, e)))
    }

    /// Start taking the mount down
    pub fn unmount(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Unmount)
    }

    pub fn unmounted(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Unmounted)
    }

    /// Start bringing the mount up
    pub fn mount(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Mount)
    }

    pub fn mounted(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Mounted)
    }

    pub fn fail(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Fail)
    }

    /// Return a failed mount to the unmounted state so it can be mounted again
    pub fn recover(&mut self) -> error::Result<()> {
        self.handle(MountMachineEvent::Recover)
    }
}

impl Default for MountLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lifecycle = MountLifecycle::new();
        assert_eq!(lifecycle.state(), State::Mounted);
    }

    #[test]
    fn test_full_remount_cycle() {
        let mut lifecycle = MountLifecycle::new();

        lifecycle.unmount().unwrap();
        assert_eq!(lifecycle.state(), State::Unmounting);

        lifecycle.unmounted().unwrap();
        assert_eq!(lifecycle.state(), State::Unmounted);

        lifecycle.mount().unwrap();
        assert_eq!(lifecycle.state(), State::Mounting);

        lifecycle.mounted().unwrap();
        assert_eq!(lifecycle.state(), State::Mounted);
    }

    #[test]
    fn test_fail_and_recover() {
        let mut lifecycle = MountLifecycle::new();
        lifecycle.unmount().unwrap();
        lifecycle.unmounted().unwrap();
        lifecycle.mount().unwrap();
        lifecycle.fail().unwrap();
        assert_eq!(lifecycle.state(), State::Failed);

        lifecycle.recover().unwrap();
        assert_eq!(lifecycle.state(), State::Unmounted);
        lifecycle.mount().unwrap();
        assert_eq!(lifecycle.state(), State::Mounting);
    }

    #[test]
    fn test_fail_from_every_state() {
        let steps: [fn(&mut MountLifecycle) -> error::Result<()>; 3] = [
            MountLifecycle::unmount,
            MountLifecycle::unmounted,
            MountLifecycle::mount,
        ];

        for reached in 0..=steps.len() {
            let mut lifecycle = MountLifecycle::new();
            for step in &steps[..reached] {
                step(&mut lifecycle).unwrap();
            }
            lifecycle.fail().unwrap();
            assert_eq!(lifecycle.state(), State::Failed);
        }

        let mut lifecycle = MountLifecycle::new();
        lifecycle.fail().unwrap();
        assert!(matches!(lifecycle.fail(), Err(Error::Lifecycle(_))));
        assert!(matches!(lifecycle.mount(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_invalid_transition() {
        let mut lifecycle = MountLifecycle::new();
        // Can't finish mounting something that is already mounted
        let err = lifecycle.mounted().unwrap_err();
        assert!(matches!(err, Error::Lifecycle(_)));
        assert_eq!(lifecycle.state(), State::Mounted);
    }
}
