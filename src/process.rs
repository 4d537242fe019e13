//! Supervision of the `tart run` process.
//!
//! Stdout and stderr are merged into one append-only [`OutputBuffer`] as
//! they arrive. The buffer is the only place the VNC credentials ever show
//! up, so readers always take full snapshots rather than draining it.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, RwLock};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::SystemConfig;
use crate::discover;
use crate::error::TartbootError;
use crate::logging::ProcessLog;

/// Program, arguments and extra environment for the VM host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// `tart run <vm>` with flags derived from the config.
    pub fn tart_run(sys_config: &SystemConfig) -> Self {
        let vm = &sys_config.config.vm;
        let vnc_enabled = !sys_config.config.vnc.disable;

        let mut args = vec!["run".to_string(), vm.name.clone()];
        args.push(if vm.headless { "--no-graphics" } else { "--graphics" }.to_string());
        if vnc_enabled {
            args.push("--vnc-experimental".into());
        }
        if vm.recovery {
            args.push("--recovery".into());
        }
        for disk in &vm.disks {
            args.push(format!("--disk={disk}"));
        }

        // Tart opens Screen Sharing against its own VNC server unless it
        // thinks it runs in CI; that viewer would fight us for the session.
        let mut env = Vec::new();
        if vnc_enabled {
            env.push(("CI".to_string(), "true".to_string()));
        }

        Self {
            program: vm.tart_path.clone(),
            args,
            env,
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── OutputBuffer ──────────────────────────────────────────

/// Shared, append-only capture of the process output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<RwLock<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: &str) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(text);
    }

    /// Everything captured so far.
    pub fn snapshot(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// ── VmProcess ─────────────────────────────────────────────

/// The one running VM host process of a run.
pub struct VmProcess {
    child: Child,
    pid: Option<u32>,
    output: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
    log: Option<ProcessLog>,
    terminate_requested: bool,
    exit_status: Option<ExitStatus>,
}

impl VmProcess {
    /// Spawn the process and start capturing its output in the background.
    pub fn start(spec: &LaunchSpec, log: Option<ProcessLog>) -> Result<Self, TartbootError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TartbootError::Launch {
            message: format!("{}: {e}", spec.display()),
            hint: format!("check that `{}` is installed and on PATH", spec.program),
        })?;

        let pid = child.id();
        tracing::info!(pid, command = %spec.display(), "VM process started");

        let output = OutputBuffer::new();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, "stdout", output.clone(), log.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, "stderr", output.clone(), log.clone()));
        }

        Ok(Self {
            child,
            pid,
            output,
            readers,
            log,
            terminate_requested: false,
            exit_status: None,
        })
    }

    pub fn output(&self) -> OutputBuffer {
        self.output.clone()
    }

    /// Non-blocking exit check.
    pub fn has_exited(&mut self) -> bool {
        if self.exit_status.is_some() {
            return true;
        }
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Wait for the process to exit and for its output to be fully captured.
    pub async fn wait(&mut self) -> Result<ExitStatus, TartbootError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = self.child.wait().await.map_err(|e| TartbootError::Io {
            context: "waiting for the VM process".into(),
            source: e,
        })?;

        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        if let Some(log) = &self.log {
            log.finish(status.success());
        }

        tracing::info!(pid = self.pid, %status, "VM process exited");
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Kill the process. Only the first call sends a signal; returns whether
    /// this call did.
    pub fn terminate(&mut self) -> Result<bool, TartbootError> {
        if self.terminate_requested || self.exit_status.is_some() {
            return Ok(false);
        }
        self.terminate_requested = true;

        tracing::warn!(pid = self.pid, "terminating VM process");
        match self.child.start_kill() {
            Ok(()) => Ok(true),
            // already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(false),
            Err(e) => Err(TartbootError::Io {
                context: "terminating the VM process".into(),
                source: e,
            }),
        }
    }
}

fn spawn_reader<R>(
    stream: R,
    name: &'static str,
    output: OutputBuffer,
    log: Option<ProcessLog>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    output.append(&chunk);

                    // only the buffer sees the VNC password
                    let shown = discover::redact(&chunk);
                    if let Some(log) = &log {
                        log.write(&shown);
                    }
                    if name == "stderr" {
                        tracing::info!(target: "tartboot::tart", "{}", shown.trim_end());
                    } else {
                        tracing::debug!(target: "tartboot::tart", "{}", shown.trim_end());
                    }
                }
                Err(e) => {
                    tracing::debug!("VM process {name} closed: {e}");
                    break;
                }
            }
        }
    })
}
