//! Client-side observer model.
//!
//! The event loop publishes every phase transition; observers render them.
//! Different implementations handle interactive TTY, plain text, and JSON
//! output modes. [`run_attached_client`] drives an observer and turns
//! Ctrl+C into teardown commands.

pub mod interactive;
pub mod json;
pub mod plain;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::flow::event_loop::Command;
use crate::flow::{Event, RunState};
use crate::phase::RunPhase;

// ── Types ───────────────────────────────────────────────────────────

/// A phase transition published by the event loop.
#[derive(Debug, Clone)]
pub struct Transition {
    pub old_phase: RunPhase,
    pub new_phase: RunPhase,
    pub event: Event,
}

impl Transition {
    pub fn new(old: RunPhase, new: RunPhase, event: Event) -> Self {
        Self {
            old_phase: old,
            new_phase: new,
            event,
        }
    }
}

/// Label of the user-visible step this transition completes, if any.
///
/// A run with a boot command completes seven steps, one without four;
/// see [`crate::flow::UpFlow::expected_steps`].
pub fn completed_step(t: &Transition) -> Option<String> {
    use RunPhase::*;

    match (t.old_phase, t.new_phase, &t.event) {
        (Launching, AwaitingNetwork, _) => Some("VM launched".into()),
        (AwaitingNetwork, _, Event::NetworkResolved(Some(ip))) => {
            Some(format!("Host address {ip}"))
        }
        (AwaitingNetwork, _, Event::NetworkResolved(None)) => {
            Some("Host address unknown".into())
        }
        (AwaitingCredentials, ConnectingVnc, _) => Some("VNC credentials found".into()),
        (ConnectingVnc, InjectingBoot, _) => Some("VNC connected".into()),
        (InjectingBoot, Running, _) => Some("Boot command typed".into()),
        (Running, Running, Event::RunStatePublished) => Some("Ready".into()),
        (ShuttingDown, Terminated, _) => Some("VM stopped".into()),
        _ => None,
    }
}

/// What the run is doing while in `phase`, for spinners.
pub fn activity(phase: RunPhase) -> Option<&'static str> {
    match phase {
        RunPhase::Launching => Some("Launching VM"),
        RunPhase::AwaitingNetwork => Some("Resolving host address"),
        RunPhase::AwaitingCredentials => Some("Waiting for VNC credentials"),
        RunPhase::ConnectingVnc => Some("Connecting to VNC"),
        RunPhase::InjectingBoot => Some("Typing boot command"),
        RunPhase::Running => Some("Running (Ctrl+C to stop)"),
        RunPhase::ShuttingDown => Some("Shutting down"),
        RunPhase::Idle | RunPhase::Terminated => None,
    }
}

/// Human-readable facts about a running VM. The VNC password is left out.
pub fn summary(state: &RunState) -> Vec<String> {
    let mut lines = Vec::new();
    match state.host_ip {
        Some(ip) => lines.push(format!("host address: {ip}:{}", state.http_port)),
        None => lines.push("host address: unknown".into()),
    }
    if let Some(endpoint) = &state.vnc_endpoint {
        lines.push(format!("VNC: vnc://{}", endpoint.addr()));
    }
    lines.extend(state.warnings.iter().map(|w| format!("warning: {w}")));
    lines
}

// ── Observer trait ──────────────────────────────────────────────────

/// Renders a run for one output mode.
pub trait Observer: Send {
    /// Called once per transition, in order.
    fn on_transition(&mut self, t: &Transition);

    /// Called when the run reaches `Running` and its state is known.
    fn on_ready(&mut self, state: &RunState);

    /// Called when Ctrl+C was pressed. `hard` is set on the second press.
    fn on_interrupt(&mut self, hard: bool);
}

// ── Attached client ────────────────────────────────────────────────

/// Drive `obs` until the run terminates.
///
/// The first Ctrl+C requests teardown; the second cancels every wait so
/// the run ends as fast as the VM process can be reaped.
pub async fn run_attached_client(
    transition_rx: &mut broadcast::Receiver<Transition>,
    run_state_rx: &mut watch::Receiver<Option<RunState>>,
    cmd_tx: &mpsc::Sender<Command>,
    cancel: &CancellationToken,
    obs: &mut dyn Observer,
) {
    let mut interrupts = 0u32;
    let mut run_state_open = true;

    loop {
        tokio::select! {
            biased;
            received = transition_rx.recv() => match received {
                Ok(t) => {
                    obs.on_transition(&t);
                    if t.new_phase.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("observer lagged, missed {n} transitions");
                }
                Err(RecvError::Closed) => break,
            },
            changed = run_state_rx.changed(), if run_state_open => {
                if changed.is_err() {
                    run_state_open = false;
                    continue;
                }
                let state = run_state_rx.borrow_and_update().clone();
                if let Some(state) = state {
                    obs.on_ready(&state);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("cannot listen for Ctrl+C: {e}");
                    break;
                }
                interrupts += 1;
                let hard = interrupts > 1;
                obs.on_interrupt(hard);
                if hard {
                    cancel.cancel();
                } else {
                    // event loop already gone
                    let _ = cmd_tx.send(Command::Teardown).await;
                }
            }
        }
    }
}
