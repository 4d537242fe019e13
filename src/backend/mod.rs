pub mod ssh;
pub mod tart;

use std::net::Ipv4Addr;

use crate::discover::VncEndpoint;
use crate::error::TartbootError;
use crate::logging::ProcessLog;
use crate::process::{LaunchSpec, VmProcess};
use crate::vnc::InputSink;

/// Everything the run controller needs from the host and the guest.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Backend {
    type Session: InputSink;

    fn launch(&self, spec: &LaunchSpec, log: Option<ProcessLog>) -> Result<VmProcess, TartbootError>;
    async fn resolve_host_address(&self, interface: &str) -> Result<Ipv4Addr, TartbootError>;
    async fn connect_vnc(&self, endpoint: &VncEndpoint) -> Result<Self::Session, TartbootError>;
    async fn close_vnc(&self, session: Self::Session);
    /// Whether a remote command channel into the guest is configured.
    fn has_guest_channel(&self) -> bool;
    async fn run_guest_command(&self, command: &str) -> Result<(), TartbootError>;
}

pub fn create_backend(sys_config: &crate::config::SystemConfig) -> tart::TartBackend {
    tart::TartBackend::new(sys_config)
}
