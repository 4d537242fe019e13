use std::net::Ipv4Addr;

use tokio::net::TcpStream;

use super::{Backend, ssh};
use crate::config::{CommunicatorConfig, SystemConfig};
use crate::discover::VncEndpoint;
use crate::error::TartbootError;
use crate::logging::ProcessLog;
use crate::network;
use crate::process::{LaunchSpec, VmProcess};
use crate::vnc::VncClient;

pub struct TartBackend {
    tart_path: String,
    vm_name: String,
    communicator: Option<CommunicatorConfig>,
}

impl TartBackend {
    pub fn new(sys_config: &SystemConfig) -> Self {
        Self {
            tart_path: sys_config.config.vm.tart_path.clone(),
            vm_name: sys_config.vm_name().to_string(),
            communicator: sys_config.config.communicator.clone(),
        }
    }

    async fn guest_host(&self, comm: &CommunicatorConfig) -> Result<String, TartbootError> {
        if !comm.host.is_empty() {
            return Ok(comm.host.clone());
        }
        network::guest_ip(&self.tart_path, &self.vm_name).await
    }
}

impl Backend for TartBackend {
    type Session = VncClient<TcpStream>;

    fn launch(&self, spec: &LaunchSpec, log: Option<ProcessLog>) -> Result<VmProcess, TartbootError> {
        VmProcess::start(spec, log)
    }

    async fn resolve_host_address(&self, interface: &str) -> Result<Ipv4Addr, TartbootError> {
        network::resolve_interface(interface).await
    }

    async fn connect_vnc(&self, endpoint: &VncEndpoint) -> Result<Self::Session, TartbootError> {
        let client = VncClient::connect(endpoint).await?;
        let (version, server) = (client.version(), client.server());
        tracing::info!(
            rfb = %format_args!("{}.{}", version.major, version.minor),
            desktop = %server.name,
            width = server.width,
            height = server.height,
            "VNC session open"
        );
        Ok(client)
    }

    async fn close_vnc(&self, session: Self::Session) {
        if let Err(e) = session.close().await {
            tracing::debug!("closing VNC session: {e}");
        }
    }

    fn has_guest_channel(&self) -> bool {
        self.communicator.is_some()
    }

    async fn run_guest_command(&self, command: &str) -> Result<(), TartbootError> {
        let comm = self.communicator.as_ref().ok_or_else(|| TartbootError::Ssh {
            message: "no [communicator] configured".into(),
        })?;
        let host = self.guest_host(comm).await?;

        let handle = ssh::connect(&host, comm.port, &comm.user, &comm.password).await?;
        let status = ssh::exec(&handle, command).await;
        ssh::disconnect(handle).await;

        match status? {
            Some(0) => Ok(()),
            // the guest may drop the connection before reporting a status
            None => Ok(()),
            Some(code) => Err(TartbootError::Ssh {
                message: format!("guest command exited with status {code}"),
            }),
        }
    }
}
