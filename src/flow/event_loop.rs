//! Event loop that drives the `up` flow.
//!
//! Effects run strictly one at a time. While the run is still booting, a
//! teardown command aborts the effect in flight by dropping its future; once
//! `Running`, the loop parks until a teardown arrives or the VM exits.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, ssh};
use crate::bootcommand::{self, BootContext, KeystrokeSequence};
use crate::config::SystemConfig;
use crate::discover::{EndpointDiscoverer, OutputScanner, VncEndpoint};
use crate::error::TartbootError;
use crate::logging::{self, ProcessLog};
use crate::observer::Transition;
use crate::phase::RunPhase;
use crate::process::{LaunchSpec, VmProcess};
use crate::wait::{self, WaitError};

use super::{Effect, Event, RunState, UpFlow};

const PROCESS_LOG_NAME: &str = "tart-run";
const RESOLVE_INTERVAL: Duration = Duration::from_secs(1);

/// Commands a controlling client can send into a running flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop the run: shut the guest down and reap the VM process.
    Teardown,
}

// ── Channels ───────────────────────────────────────────────────────

pub struct FlowChannels {
    /// Commands from the client (Ctrl+C handler). Closing it means teardown.
    pub command_rx: mpsc::Receiver<Command>,
    /// Broadcasts transitions to observers.
    pub transition_tx: broadcast::Sender<Transition>,
    /// Set once the run reaches `Running`.
    pub run_state_tx: watch::Sender<Option<RunState>>,
}

// ── RunContext ─────────────────────────────────────────────────────

/// Typed state accumulated over one run.
pub struct RunContext {
    pub sys_config: SystemConfig,
    pub launch_spec: LaunchSpec,
    /// Where VM output logs go; `None` disables them.
    pub logs_dir: Option<PathBuf>,
    /// Hard abort for every wait in the run.
    pub cancel: CancellationToken,

    process: Option<VmProcess>,
    host_ip: Option<Ipv4Addr>,
    sequence: Option<KeystrokeSequence>,
    endpoint: Option<VncEndpoint>,
    warnings: Vec<String>,
    error: Option<TartbootError>,
    exit_status: Option<ExitStatus>,
}

impl RunContext {
    pub fn new(sys_config: SystemConfig, cancel: CancellationToken) -> Self {
        let launch_spec = LaunchSpec::tart_run(&sys_config);
        let logs_dir = Some(sys_config.logs_dir());
        Self {
            sys_config,
            launch_spec,
            logs_dir,
            cancel,
            process: None,
            host_ip: None,
            sequence: None,
            endpoint: None,
            warnings: Vec::new(),
            error: None,
            exit_status: None,
        }
    }

    fn warn(&mut self, err: TartbootError) {
        tracing::warn!("{err}");
        self.warnings.push(err.to_string());
    }

    /// Record a fatal error (the first one wins) and turn it into `event`.
    fn fail(&mut self, err: TartbootError, event: fn(String) -> Event) -> Event {
        let message = err.to_string();
        if self.error.is_none() {
            self.error = Some(err);
        }
        event(message)
    }
}

/// How a run that did not fail ended.
#[derive(Debug)]
pub struct RunReport {
    pub phase: RunPhase,
    pub warnings: Vec<String>,
    pub exit_status: Option<ExitStatus>,
}

// ── Event loop ─────────────────────────────────────────────────────

/// Run the flow until it reaches a terminal phase.
///
/// Returns the fatal error of the run, if any, only after the VM process
/// has been reaped.
pub async fn run_event_loop<B: Backend>(
    flow: UpFlow,
    backend: &B,
    ctx: &mut RunContext,
    channels: &mut FlowChannels,
) -> Result<RunReport, TartbootError> {
    let mut phase = RunPhase::Idle;
    let mut pending: VecDeque<Effect> = VecDeque::new();
    let mut session: Option<B::Session> = None;
    let mut commands_open = true;
    let mut event = Event::FlowStarted;

    loop {
        let (new_phase, effects) = flow.transition(phase, &event);
        if let Some(message) = event.error() {
            tracing::error!(%phase, "{message}");
        }
        publish_transition(&channels.transition_tx, phase, new_phase, &event);
        if event == Event::Teardown {
            pending.clear();
        }
        phase = new_phase;
        pending.extend(effects);

        if phase.is_terminal() {
            break;
        }

        event = if let Some(effect) = pending.pop_front() {
            tracing::debug!(%phase, ?effect, "running effect");
            if phase.is_interruptible() && commands_open {
                tokio::select! {
                    cmd = channels.command_rx.recv() => {
                        commands_open = cmd.is_some();
                        tracing::info!(%phase, "teardown requested, aborting {effect:?}");
                        Event::Teardown
                    }
                    evt = execute(effect, backend, ctx, &mut session, &channels.run_state_tx) => evt,
                }
            } else {
                execute(effect, backend, ctx, &mut session, &channels.run_state_tx).await
            }
        } else if phase.is_interactive_wait() {
            park(ctx, &mut channels.command_rx, &mut commands_open).await
        } else {
            tracing::error!(%phase, "flow stalled with no pending effects");
            break;
        };
    }

    if let Some(open) = session.take() {
        backend.close_vnc(open).await;
    }

    match ctx.error.take() {
        Some(err) => Err(err),
        None => Ok(RunReport {
            phase,
            warnings: std::mem::take(&mut ctx.warnings),
            exit_status: ctx.exit_status,
        }),
    }
}

/// Wait in `Running` for a teardown command, a hard cancel, or the VM to exit.
async fn park(
    ctx: &mut RunContext,
    command_rx: &mut mpsc::Receiver<Command>,
    commands_open: &mut bool,
) -> Event {
    let Some(process) = ctx.process.as_mut() else {
        return Event::VmExited;
    };

    let exited = tokio::select! {
        cmd = command_rx.recv(), if *commands_open => {
            *commands_open = cmd.is_some();
            None
        }
        _ = ctx.cancel.cancelled() => None,
        status = process.wait() => Some(status),
    };

    match exited {
        None => Event::Teardown,
        Some(Ok(status)) => {
            tracing::info!(%status, "VM exited on its own");
            ctx.exit_status = Some(status);
            Event::VmExited
        }
        Some(Err(e)) => {
            ctx.warn(e);
            Event::VmExited
        }
    }
}

// ── Effects ────────────────────────────────────────────────────────

async fn execute<B: Backend>(
    effect: Effect,
    backend: &B,
    ctx: &mut RunContext,
    session: &mut Option<B::Session>,
    run_state_tx: &watch::Sender<Option<RunState>>,
) -> Event {
    match effect {
        Effect::LaunchVm => launch_vm(backend, ctx),
        Effect::ResolveAddress => resolve_address(backend, ctx).await,
        Effect::AwaitCredentials => await_credentials(ctx).await,
        Effect::ConnectVnc => connect_vnc(backend, ctx, session).await,
        Effect::InjectBootCommand => inject_boot_command(backend, ctx, session).await,
        Effect::PublishRunState => {
            let state = RunState {
                host_ip: ctx.host_ip,
                vnc_endpoint: ctx.endpoint.clone(),
                http_port: ctx.sys_config.config.network.http_port,
                warnings: ctx.warnings.clone(),
            };
            tracing::info!(host_ip = ?state.host_ip, "VM is running");
            run_state_tx.send_replace(Some(state));
            Event::RunStatePublished
        }
        Effect::GracefulShutdown => graceful_shutdown(backend, ctx).await,
        Effect::StopVm => {
            stop_vm(ctx).await;
            Event::VmStopped
        }
        Effect::TerminateVm => {
            if let Some(process) = ctx.process.as_mut() {
                let status = terminate_and_reap(process).await;
                ctx.exit_status = ctx.exit_status.or(status);
            }
            Event::VmStopped
        }
    }
}

fn launch_vm<B: Backend>(backend: &B, ctx: &mut RunContext) -> Event {
    let log = ctx.logs_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("cannot create {}: {e}", dir.display());
            return None;
        }
        logging::rotate_logs(dir, PROCESS_LOG_NAME, logging::KEEP_PROCESS_LOGS);
        ProcessLog::new(dir, PROCESS_LOG_NAME)
            .inspect_err(|e| tracing::warn!("cannot create VM output log: {e}"))
            .ok()
    });

    match backend.launch(&ctx.launch_spec, log) {
        Ok(process) => {
            ctx.process = Some(process);
            Event::VmLaunched
        }
        Err(e) => ctx.fail(e, Event::LaunchFailed),
    }
}

async fn resolve_address<B: Backend>(backend: &B, ctx: &mut RunContext) -> Event {
    let settle = ctx.sys_config.settle_delay();
    let interface = ctx.sys_config.config.network.interface.clone();
    tracing::info!(interface, "waiting up to {}s for the host address", settle.as_secs());

    let iface = interface.as_str();
    let polled = wait::poll_until(settle, RESOLVE_INTERVAL, &ctx.cancel, move || async move {
        backend.resolve_host_address(iface).await.ok()
    })
    .await;

    let resolved = match polled {
        Ok(ip) => Ok(ip),
        // one last attempt for the error to report
        Err(WaitError::Timeout) => backend.resolve_host_address(iface).await,
        Err(WaitError::Cancelled) => {
            return ctx.fail(
                TartbootError::Cancelled {
                    phase: "waiting for the network".into(),
                },
                Event::Aborted,
            );
        }
    };
    match resolved {
        Ok(ip) => {
            tracing::info!(interface, %ip, "host address resolved");
            ctx.host_ip = Some(ip);
        }
        Err(e) => ctx.warn(e),
    }

    if ctx.sys_config.boot_injection_requested() {
        let boot = BootContext {
            host_ip: ctx.host_ip,
            http_port: ctx.sys_config.config.network.http_port,
        };
        match bootcommand::prepare(&ctx.sys_config.config.vnc.boot_command, &boot) {
            Ok(sequence) => {
                tracing::debug!(events = sequence.len(), "boot command prepared");
                ctx.sequence = Some(sequence);
            }
            Err(e) => return ctx.fail(e, Event::BootCommandFailed),
        }
    }

    Event::NetworkResolved(ctx.host_ip)
}

async fn await_credentials(ctx: &mut RunContext) -> Event {
    let Some(process) = ctx.process.as_mut() else {
        return ctx.fail(no_process(), Event::CredentialsFailed);
    };

    let scanner = OutputScanner::new(process.output(), ctx.sys_config.credentials_timeout());
    let result = tokio::select! {
        found = scanner.discover(&ctx.cancel) => found,
        status = process.wait() => Err(match status {
            Ok(status) => TartbootError::Launch {
                message: format!("the VM process exited ({status}) before printing VNC credentials"),
                hint: "check the VM output with `tartboot log`".into(),
            },
            Err(e) => e,
        }),
    };

    match result {
        Ok(endpoint) => {
            ctx.endpoint = Some(endpoint);
            Event::CredentialsFound
        }
        Err(e @ TartbootError::Cancelled { .. }) => ctx.fail(e, Event::Aborted),
        Err(e) => ctx.fail(e, Event::CredentialsFailed),
    }
}

async fn connect_vnc<B: Backend>(
    backend: &B,
    ctx: &mut RunContext,
    session: &mut Option<B::Session>,
) -> Event {
    let Some(endpoint) = ctx.endpoint.clone() else {
        return ctx.fail(
            TartbootError::VncConnect {
                addr: "unknown".into(),
                message: "no VNC endpoint was discovered".into(),
            },
            Event::VncFailed,
        );
    };

    tracing::info!(addr = %endpoint.addr(), "connecting to VNC");
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TartbootError::Cancelled {
            phase: "connecting to VNC".into(),
        }),
        connected = backend.connect_vnc(&endpoint) => connected,
    };

    match result {
        Ok(open) => {
            *session = Some(open);
            Event::VncConnected
        }
        Err(e @ TartbootError::Cancelled { .. }) => ctx.fail(e, Event::Aborted),
        Err(e) => ctx.fail(e, Event::VncFailed),
    }
}

async fn inject_boot_command<B: Backend>(
    backend: &B,
    ctx: &mut RunContext,
    session: &mut Option<B::Session>,
) -> Event {
    let Some(mut open) = session.take() else {
        return ctx.fail(
            TartbootError::Inject {
                index: 0,
                message: "no VNC session".into(),
            },
            Event::BootCommandFailed,
        );
    };
    let sequence = ctx.sequence.take().unwrap_or_default();

    tracing::info!(events = sequence.len(), "typing boot command");
    let result = bootcommand::inject(
        &sequence,
        &mut open,
        ctx.sys_config.key_interval(),
        &ctx.cancel,
    )
    .await;
    backend.close_vnc(open).await;

    match result {
        Ok(()) => Event::BootCommandSent,
        Err(e @ TartbootError::Cancelled { .. }) => ctx.fail(e, Event::Aborted),
        Err(e) => ctx.fail(e, Event::BootCommandFailed),
    }
}

/// The configured shutdown command, run through `sudo -S` when a password
/// is known.
fn shutdown_command(sys_config: &SystemConfig) -> String {
    let command = &sys_config.config.shutdown.command;
    match &sys_config.config.communicator {
        Some(comm) => ssh::sudo_command(&comm.password, command),
        None => command.clone(),
    }
}

async fn graceful_shutdown<B: Backend>(backend: &B, ctx: &mut RunContext) -> Event {
    let exited = ctx.process.as_mut().is_none_or(|p| p.has_exited());
    if exited {
        return Event::GuestShutdownDone;
    }
    if !backend.has_guest_channel() {
        tracing::info!("no guest command channel configured, skipping graceful shutdown");
        return Event::GuestShutdownDone;
    }

    let command = shutdown_command(&ctx.sys_config);
    let timeout = ctx.sys_config.graceful_timeout();
    tracing::info!("gracefully shutting down the guest");

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err("cancelled".to_string()),
        ran = tokio::time::timeout(timeout, backend.run_guest_command(&command)) => match ran {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no response within {}s", timeout.as_secs())),
        },
    };

    if let Err(message) = result {
        ctx.warn(TartbootError::Shutdown { message });
    }
    Event::GuestShutdownDone
}

/// Wait up to the exit timeout for the VM to exit, then terminate it.
async fn stop_vm(ctx: &mut RunContext) {
    let Some(process) = ctx.process.as_mut() else {
        return;
    };

    let exit_timeout = ctx.sys_config.exit_timeout();
    tracing::info!("waiting up to {}s for the VM to exit", exit_timeout.as_secs());
    let waited = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        r = tokio::time::timeout(exit_timeout, process.wait()) => r.ok(),
    };

    let status = match waited {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            tracing::warn!("waiting for the VM process: {e}");
            terminate_and_reap(process).await
        }
        None => {
            tracing::warn!("VM did not exit in time");
            terminate_and_reap(process).await
        }
    };
    ctx.exit_status = ctx.exit_status.or(status);
}

async fn terminate_and_reap(process: &mut VmProcess) -> Option<ExitStatus> {
    if let Err(e) = process.terminate() {
        tracing::warn!("{e}");
    }
    process
        .wait()
        .await
        .inspect_err(|e| tracing::error!("{e}"))
        .ok()
}

fn no_process() -> TartbootError {
    TartbootError::Launch {
        message: "the VM process is not running".into(),
        hint: "this is a bug in the run flow".into(),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Publish a phase transition to all observers.
fn publish_transition(
    tx: &broadcast::Sender<Transition>,
    old: RunPhase,
    new: RunPhase,
    event: &Event,
) {
    // no subscribers is fine
    let _ = tx.send(Transition::new(old, new, event.clone()));
}

// ── Tests ──────────────────────────────────────────────────────────
