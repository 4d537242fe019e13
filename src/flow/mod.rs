//! Event-driven run flow.
//!
//! A run is a set of transition rules mapping `(RunPhase, Event) ->
//! (RunPhase, Vec<Effect>)`. The event loop executes effects one at a
//! time and feeds their completion events back into [`UpFlow::transition`].

pub mod event_loop;

use std::net::Ipv4Addr;

use crate::discover::VncEndpoint;
use crate::phase::RunPhase;

// ── Events ──────────────────────────────────────────────────────────

/// Events emitted by effects or received from the controlling client.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Flow just started, triggers the initial effects.
    FlowStarted,

    // Effect completion events
    VmLaunched,
    LaunchFailed(String),
    /// Network phase done; `None` when the host address is unknown.
    NetworkResolved(Option<Ipv4Addr>),
    CredentialsFound,
    CredentialsFailed(String),
    VncConnected,
    VncFailed(String),
    BootCommandSent,
    BootCommandFailed(String),
    /// A hard cancellation aborted the effect in flight.
    Aborted(String),
    RunStatePublished,

    /// Teardown requested (Ctrl+C or the command channel closed).
    Teardown,
    /// The VM process exited while the run was parked in `Running`.
    VmExited,

    GuestShutdownDone,
    VmStopped,
}

impl Event {
    pub fn label(&self) -> &'static str {
        match self {
            Event::FlowStarted => "flow-started",
            Event::VmLaunched => "vm-launched",
            Event::LaunchFailed(_) => "launch-failed",
            Event::NetworkResolved(_) => "network-resolved",
            Event::CredentialsFound => "credentials-found",
            Event::CredentialsFailed(_) => "credentials-failed",
            Event::VncConnected => "vnc-connected",
            Event::VncFailed(_) => "vnc-failed",
            Event::BootCommandSent => "boot-command-sent",
            Event::BootCommandFailed(_) => "boot-command-failed",
            Event::Aborted(_) => "aborted",
            Event::RunStatePublished => "run-state-published",
            Event::Teardown => "teardown",
            Event::VmExited => "vm-exited",
            Event::GuestShutdownDone => "guest-shutdown-done",
            Event::VmStopped => "vm-stopped",
        }
    }

    /// Error text carried by failure events.
    pub fn error(&self) -> Option<&str> {
        match self {
            Event::LaunchFailed(e)
            | Event::CredentialsFailed(e)
            | Event::VncFailed(e)
            | Event::BootCommandFailed(e)
            | Event::Aborted(e) => Some(e),
            _ => None,
        }
    }
}

// ── Effects ─────────────────────────────────────────────────────────

/// Work the event loop performs on behalf of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Spawn `tart run` and start capturing its output.
    LaunchVm,
    /// Settle delay, resolve the host interface address, prepare the boot command.
    ResolveAddress,
    /// Scan the VM output for the VNC descriptor.
    AwaitCredentials,
    /// Dial and authenticate the VNC session.
    ConnectVnc,
    /// Type the boot command, then close the session.
    InjectBootCommand,
    /// Hand the run state to whoever is watching.
    PublishRunState,
    /// Time-boxed shutdown over the guest command channel.
    GracefulShutdown,
    /// Wait for the VM process to exit, terminating it after the exit timeout.
    StopVm,
    /// Terminate the VM process right away and reap it.
    TerminateVm,
}

// ── RunState ────────────────────────────────────────────────────────

/// What a consumer needs once the VM is up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunState {
    pub host_ip: Option<Ipv4Addr>,
    pub vnc_endpoint: Option<VncEndpoint>,
    pub http_port: u16,
    pub warnings: Vec<String>,
}

// ── Flow ────────────────────────────────────────────────────────────

/// The `up` flow: launch, optionally type the boot command, park in
/// `Running`, then tear down.
#[derive(Debug, Clone, Copy)]
pub struct UpFlow {
    boot_injection: bool,
}

impl UpFlow {
    pub fn new(boot_injection: bool) -> Self {
        Self { boot_injection }
    }

    /// Pure transition: given the current phase and an event, return the
    /// new phase and any effects to run.
    ///
    /// Unknown events leave the phase unchanged with no effects.
    pub fn transition(&self, phase: RunPhase, event: &Event) -> (RunPhase, Vec<Effect>) {
        use RunPhase::*;

        match (phase, event) {
            (Idle, Event::FlowStarted) => (Launching, vec![Effect::LaunchVm]),
            (Idle, Event::Teardown) => (Terminated, vec![]),

            // ── launch ──
            (Launching, Event::VmLaunched) => (AwaitingNetwork, vec![Effect::ResolveAddress]),
            (Launching, Event::LaunchFailed(_)) => (Terminated, vec![]),

            // ── network → boot command or straight to running ──
            (AwaitingNetwork, Event::NetworkResolved(_)) => {
                if self.boot_injection {
                    (AwaitingCredentials, vec![Effect::AwaitCredentials])
                } else {
                    (Running, vec![Effect::PublishRunState])
                }
            }
            (AwaitingCredentials, Event::CredentialsFound) => (ConnectingVnc, vec![Effect::ConnectVnc]),
            (ConnectingVnc, Event::VncConnected) => (InjectingBoot, vec![Effect::InjectBootCommand]),
            (InjectingBoot, Event::BootCommandSent) => (Running, vec![Effect::PublishRunState]),

            // ── parked ──
            (Running, Event::RunStatePublished) => (Running, vec![]),
            (Running, Event::VmExited) => (ShuttingDown, vec![Effect::StopVm]),

            // ── fatal errors once the VM exists: kill it and reap it ──
            (
                AwaitingNetwork | AwaitingCredentials | ConnectingVnc | InjectingBoot,
                Event::CredentialsFailed(_)
                | Event::VncFailed(_)
                | Event::BootCommandFailed(_)
                | Event::Aborted(_),
            ) => (ShuttingDown, vec![Effect::TerminateVm]),

            // ── teardown ──
            (
                Launching | AwaitingNetwork | AwaitingCredentials | ConnectingVnc | InjectingBoot
                | Running,
                Event::Teardown,
            ) => (ShuttingDown, vec![Effect::GracefulShutdown]),
            (ShuttingDown, Event::GuestShutdownDone) => (ShuttingDown, vec![Effect::StopVm]),
            (ShuttingDown, Event::VmStopped) => (Terminated, vec![]),

            // ── unknown event → same phase, no effects ──
            _ => {
                tracing::debug!(%phase, event = event.label(), "event ignored");
                (phase, vec![])
            }
        }
    }

    /// Number of user-visible steps a run goes through.
    pub fn expected_steps(&self) -> usize {
        if self.boot_injection { 7 } else { 4 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunPhase::*;

    // ── Happy paths ──

    #[test]
    fn happy_path_with_boot_command() {
        let flow = UpFlow::new(true);

        let (phase, effects) = flow.transition(Idle, &Event::FlowStarted);
        assert_eq!(phase, Launching);
        assert_eq!(effects, vec![Effect::LaunchVm]);

        let (phase, effects) = flow.transition(phase, &Event::VmLaunched);
        assert_eq!(phase, AwaitingNetwork);
        assert_eq!(effects, vec![Effect::ResolveAddress]);

        let ip = Some(Ipv4Addr::new(192, 168, 64, 1));
        let (phase, effects) = flow.transition(phase, &Event::NetworkResolved(ip));
        assert_eq!(phase, AwaitingCredentials);
        assert_eq!(effects, vec![Effect::AwaitCredentials]);

        let (phase, effects) = flow.transition(phase, &Event::CredentialsFound);
        assert_eq!(phase, ConnectingVnc);
        assert_eq!(effects, vec![Effect::ConnectVnc]);

        let (phase, effects) = flow.transition(phase, &Event::VncConnected);
        assert_eq!(phase, InjectingBoot);
        assert_eq!(effects, vec![Effect::InjectBootCommand]);

        let (phase, effects) = flow.transition(phase, &Event::BootCommandSent);
        assert_eq!(phase, Running);
        assert_eq!(effects, vec![Effect::PublishRunState]);

        let (phase, effects) = flow.transition(phase, &Event::RunStatePublished);
        assert_eq!(phase, Running);
        assert!(effects.is_empty());
    }

    #[test]
    fn without_boot_command_network_leads_to_running() {
        let flow = UpFlow::new(false);
        let (phase, effects) = flow.transition(AwaitingNetwork, &Event::NetworkResolved(None));
        assert_eq!(phase, Running);
        assert_eq!(effects, vec![Effect::PublishRunState]);
    }

    #[test]
    fn unresolved_network_still_proceeds_to_credentials() {
        let flow = UpFlow::new(true);
        let (phase, _) = flow.transition(AwaitingNetwork, &Event::NetworkResolved(None));
        assert_eq!(phase, AwaitingCredentials);
    }

    // ── Failures ──

    #[test]
    fn launch_failure_terminates_without_effects() {
        let flow = UpFlow::new(true);
        let (phase, effects) = flow.transition(Launching, &Event::LaunchFailed("no tart".into()));
        assert_eq!(phase, Terminated);
        assert!(effects.is_empty());
    }

    #[test]
    fn failures_after_launch_terminate_the_vm() {
        let flow = UpFlow::new(true);
        let cases = [
            (AwaitingNetwork, Event::BootCommandFailed("bad template".into())),
            (AwaitingNetwork, Event::Aborted("cancelled".into())),
            (AwaitingCredentials, Event::CredentialsFailed("timeout".into())),
            (ConnectingVnc, Event::VncFailed("refused".into())),
            (InjectingBoot, Event::BootCommandFailed("broken pipe".into())),
        ];
        for (from, event) in cases {
            let (phase, effects) = flow.transition(from, &event);
            assert_eq!(phase, ShuttingDown, "{from:?} + {event:?}");
            assert_eq!(effects, vec![Effect::TerminateVm]);
            assert!(event.error().is_some());
        }

        let (phase, effects) = flow.transition(ShuttingDown, &Event::VmStopped);
        assert_eq!(phase, Terminated);
        assert!(effects.is_empty());
    }

    // ── Teardown ──

    #[test]
    fn teardown_from_running_is_two_phase() {
        let flow = UpFlow::new(false);

        let (phase, effects) = flow.transition(Running, &Event::Teardown);
        assert_eq!(phase, ShuttingDown);
        assert_eq!(effects, vec![Effect::GracefulShutdown]);

        let (phase, effects) = flow.transition(phase, &Event::GuestShutdownDone);
        assert_eq!(phase, ShuttingDown);
        assert_eq!(effects, vec![Effect::StopVm]);

        let (phase, _) = flow.transition(phase, &Event::VmStopped);
        assert_eq!(phase, Terminated);
    }

    #[test]
    fn teardown_interrupts_boot_phases() {
        let flow = UpFlow::new(true);
        for from in [Launching, AwaitingNetwork, AwaitingCredentials, ConnectingVnc, InjectingBoot] {
            let (phase, effects) = flow.transition(from, &Event::Teardown);
            assert_eq!(phase, ShuttingDown);
            assert_eq!(effects, vec![Effect::GracefulShutdown]);
        }
    }

    #[test]
    fn teardown_before_start_terminates() {
        let flow = UpFlow::new(true);
        assert_eq!(flow.transition(Idle, &Event::Teardown), (Terminated, vec![]));
    }

    #[test]
    fn vm_exit_while_running_skips_graceful_shutdown() {
        let flow = UpFlow::new(false);
        let (phase, effects) = flow.transition(Running, &Event::VmExited);
        assert_eq!(phase, ShuttingDown);
        assert_eq!(effects, vec![Effect::StopVm]);
    }

    #[test]
    fn repeated_teardown_while_shutting_down_is_ignored() {
        let flow = UpFlow::new(false);
        let (phase, effects) = flow.transition(ShuttingDown, &Event::Teardown);
        assert_eq!(phase, ShuttingDown);
        assert!(effects.is_empty());
    }

    // ── Unknown events ──

    #[test]
    fn unknown_event_in_running_is_ignored() {
        let flow = UpFlow::new(true);
        let (phase, effects) = flow.transition(Running, &Event::VncConnected);
        assert_eq!(phase, Running);
        assert!(effects.is_empty());
    }

    #[test]
    fn late_success_after_terminated_is_ignored() {
        let flow = UpFlow::new(true);
        let (phase, effects) = flow.transition(Terminated, &Event::CredentialsFound);
        assert_eq!(phase, Terminated);
        assert!(effects.is_empty());
    }
}
