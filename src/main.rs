use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tartboot::backend;
use tartboot::bootcommand::{self, BootContext};
use tartboot::cli::{Cli, Command, OutputFormat};
use tartboot::config::{self, SystemConfig};
use tartboot::error::TartbootError;
use tartboot::flow::UpFlow;
use tartboot::flow::event_loop::{FlowChannels, RunContext, run_event_loop};
use tartboot::logging;
use tartboot::network;
use tartboot::observer::{self, Observer};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let output_format = resolve_output_format(cli.output);

    // Terminal layer: the spinner owns the terminal in interactive mode, and
    // tracing output to stderr would corrupt its redraws.
    let terminal_filter = if cli.verbose {
        EnvFilter::new("tartboot=debug")
    } else {
        match output_format {
            OutputFormat::Interactive | OutputFormat::Auto => EnvFilter::new("off"),
            OutputFormat::Plain | OutputFormat::Json if cli.quiet => EnvFilter::new("tartboot=warn"),
            OutputFormat::Plain | OutputFormat::Json => EnvFilter::from_default_env()
                .add_directive("tartboot=info".parse().expect("valid log directive")),
        }
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures tartboot=debug, initially discards until activated
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("tartboot=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let sys_config = config::load_config(&cli.config)?;
    let logs_dir = sys_config.logs_dir();

    match cli.command {
        Command::Up { timeout } => {
            std::fs::create_dir_all(&logs_dir).ok();
            file_handle.set_file(&logs_dir.join("tartboot.log")).ok();
            run_up(sys_config, timeout, output_format, cli.quiet).await?;
        }
        Command::Render => run_render(&sys_config, output_format).await?,
        Command::Log {
            failed,
            all,
            tartboot,
        } => handle_log_command(&logs_dir, failed, all, tartboot)?,
    }

    Ok(())
}

/// Run `tartboot up` through the event loop + observer pipeline.
async fn run_up(
    sys_config: SystemConfig,
    timeout: Option<u64>,
    output_format: OutputFormat,
    quiet: bool,
) -> Result<(), TartbootError> {
    let backend = backend::create_backend(&sys_config);
    let flow = UpFlow::new(sys_config.boot_injection_requested());
    let total_steps = flow.expected_steps();

    let (cmd_tx, command_rx) = mpsc::channel(16);
    let (transition_tx, _) = broadcast::channel(64);
    let (run_state_tx, mut run_state_rx) = watch::channel(None);
    let cancel = CancellationToken::new();

    let mut obs: Box<dyn Observer> = match output_format {
        OutputFormat::Json => Box::new(observer::json::JsonObserver::new()),
        OutputFormat::Plain => Box::new(observer::plain::PlainObserver::new(total_steps, quiet)),
        OutputFormat::Interactive | OutputFormat::Auto => Box::new(
            observer::interactive::InteractiveObserver::new(total_steps, quiet),
        ),
    };

    // Subscribe before the event loop starts so no transitions are missed
    let mut transition_rx = transition_tx.subscribe();

    let deadline = timeout.map(|secs| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::warn!("run timed out after {secs}s, stopping the VM");
            cancel.cancel();
        })
    });

    let mut ctx = RunContext::new(sys_config, cancel.clone());
    let mut channels = FlowChannels {
        command_rx,
        transition_tx,
        run_state_tx,
    };

    let run = async move {
        let result = run_event_loop(flow, &backend, &mut ctx, &mut channels).await;
        // Closing the channels ends the observer even if no terminal
        // transition was published.
        drop(channels);
        result
    };
    let observe = observer::run_attached_client(
        &mut transition_rx,
        &mut run_state_rx,
        &cmd_tx,
        &cancel,
        &mut *obs,
    );

    let (result, ()) = tokio::join!(run, observe);

    if let Some(handle) = deadline {
        handle.abort();
    }

    let report = result?;
    match report.exit_status {
        Some(status) => tracing::info!(%status, "run finished"),
        None => tracing::info!("run finished"),
    }
    Ok(())
}

/// Print the rendered boot command and the input events it expands to.
async fn run_render(
    sys_config: &SystemConfig,
    output_format: OutputFormat,
) -> Result<(), TartbootError> {
    let vnc = &sys_config.config.vnc;
    if vnc.boot_command.is_empty() {
        println!("No boot command configured.");
        return Ok(());
    }

    let network_config = &sys_config.config.network;
    let host_ip = match network::resolve_interface(&network_config.interface).await {
        Ok(ip) => Some(ip),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    };
    let ctx = BootContext {
        host_ip,
        http_port: network_config.http_port,
    };

    let rendered = bootcommand::render(&bootcommand::flatten(&vnc.boot_command), &ctx)?;
    let sequence = bootcommand::parse(&rendered)?;
    if sequence.is_empty() {
        println!("Boot command renders to no input events.");
        return Ok(());
    }

    if matches!(output_format, OutputFormat::Json) {
        println!(
            "{}",
            facet_json::to_string(&RenderJson {
                rendered,
                events: sequence.events().iter().map(ToString::to_string).collect(),
                wait_ms: sequence.total_wait().as_millis() as u64,
            })
            .expect("JSON serialization"),
        );
        return Ok(());
    }

    println!("{rendered}");
    println!();
    for (index, event) in sequence.events().iter().enumerate() {
        println!("{index:>4}  {event}");
    }
    println!(
        "{} events, {:?} of waits",
        sequence.len(),
        sequence.total_wait()
    );
    Ok(())
}

fn handle_log_command(
    logs_dir: &std::path::Path,
    failed: bool,
    all: bool,
    tartboot_log: bool,
) -> miette::Result<()> {
    if tartboot_log {
        let log_path = logs_dir.join("tartboot.log");
        if log_path.exists() {
            let contents = std::fs::read_to_string(&log_path).map_err(|e| TartbootError::Io {
                context: format!("reading {}", log_path.display()),
                source: e,
            })?;
            print!("{contents}");
        } else {
            println!("No tartboot.log found. Run `tartboot up` first.");
        }
        return Ok(());
    }

    if all {
        let logs = logging::list_logs(logs_dir);
        if logs.is_empty() {
            println!("No VM logs found.");
        } else {
            for entry in &logs {
                let status_indicator = if entry.status == "failed" {
                    "FAIL"
                } else {
                    " OK "
                };
                println!(
                    "[{status_indicator}] {} {} ({})",
                    entry.timestamp,
                    entry.name,
                    entry.path.display()
                );
            }
        }
        return Ok(());
    }

    match logging::latest_log(logs_dir, failed) {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).map_err(|e| TartbootError::Io {
                context: format!("reading {}", path.display()),
                source: e,
            })?;
            let fname = path.file_name().and_then(|f| f.to_str()).unwrap_or("?");
            println!("--- {fname} ---");
            print!("{contents}");
        }
        None => {
            if failed {
                println!("No failed VM logs found.");
            } else {
                println!("No VM logs found. Run `tartboot up` first.");
            }
        }
    }

    Ok(())
}

// ── JSON output structs ─────────────────────────────────────────────

#[derive(facet::Facet)]
struct RenderJson {
    rendered: String,
    events: Vec<String>,
    wait_ms: u64,
}

/// Resolve `Auto` to a concrete format based on terminal detection.
fn resolve_output_format(format: OutputFormat) -> OutputFormat {
    match format {
        OutputFormat::Auto => {
            if !std::io::stdout().is_terminal() || !std::io::stdin().is_terminal() {
                OutputFormat::Plain
            } else {
                OutputFormat::Interactive
            }
        }
        other => other,
    }
}
