//! Shared vocabulary for where a run is.
//!
//! `RunPhase` is tracked in memory by the event loop and published to
//! observers with every transition.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Nothing started yet.
    Idle,
    /// `tart run` is being spawned.
    Launching,
    /// Waiting for the host network to settle, then resolving its address.
    AwaitingNetwork,
    /// Scanning the VM output for the VNC descriptor.
    AwaitingCredentials,
    /// RFB handshake in progress.
    ConnectingVnc,
    /// Typing the boot command.
    InjectingBoot,
    /// VM is up; waiting for teardown or for the VM to exit.
    Running,
    /// Graceful guest shutdown and process reaping.
    ShuttingDown,
    /// VM process is gone.
    Terminated,
}

impl RunPhase {
    /// Terminal phases end the event loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Terminated)
    }

    /// Phases where the event loop parks and waits for a teardown or for
    /// the VM to exit on its own.
    pub fn is_interactive_wait(self) -> bool {
        matches!(self, RunPhase::Running)
    }

    /// Phases whose in-flight effect a teardown may abort.
    pub fn is_interruptible(self) -> bool {
        matches!(
            self,
            RunPhase::Launching
                | RunPhase::AwaitingNetwork
                | RunPhase::AwaitingCredentials
                | RunPhase::ConnectingVnc
                | RunPhase::InjectingBoot
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Launching => "launching",
            RunPhase::AwaitingNetwork => "awaiting-network",
            RunPhase::AwaitingCredentials => "awaiting-credentials",
            RunPhase::ConnectingVnc => "connecting-vnc",
            RunPhase::InjectingBoot => "injecting-boot",
            RunPhase::Running => "running",
            RunPhase::ShuttingDown => "shutting-down",
            RunPhase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
