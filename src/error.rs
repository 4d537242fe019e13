use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TartbootError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start the VM: {message}")]
    #[diagnostic(help("{hint}"))]
    Launch { message: String, hint: String },

    #[error("failed to resolve an IPv4 address for interface {interface}: {message}")]
    #[diagnostic(help("the interface may not exist yet; raise network.settle_delay_s"))]
    InterfaceResolution { interface: String, message: String },

    #[error("no VNC credentials appeared in the VM output within {seconds}s")]
    #[diagnostic(help("check the tart log with `tartboot log`; raise vnc.credentials_timeout_s"))]
    CredentialTimeout { seconds: u64 },

    #[error("{phase} was cancelled")]
    Cancelled { phase: String },

    #[error("failed to connect to the VNC server at {addr}: {message}")]
    VncConnect { addr: String, message: String },

    #[error("VNC authentication failed: {message}")]
    VncAuth { message: String },

    #[error("failed to render the boot command: {message}")]
    Template { message: String },

    #[error("failed to parse the boot command at offset {offset}: {message}")]
    BootCommandParse { offset: usize, message: String },

    #[error("failed to run the boot command at event {index}: {message}")]
    Inject { index: usize, message: String },

    #[error("failed to gracefully shut down the guest: {message}")]
    Shutdown { message: String },

    #[error("SSH error: {message}")]
    Ssh { message: String },
}
