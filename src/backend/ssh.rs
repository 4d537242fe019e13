//! Guest command channel over SSH with password auth.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::{ChannelMsg, Disconnect, keys};

use crate::error::TartbootError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimal russh client handler, accepts all server keys (like StrictHostKeyChecking=no).
pub struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connect to `host:port` and authenticate with a password.
pub async fn connect(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
) -> Result<client::Handle<SshHandler>, TartbootError> {
    let config = Arc::new(client::Config::default());
    let addr = format!("{host}:{port}");
    tracing::info!(addr, user, "connecting SSH");

    let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, client::connect(config, &*addr, SshHandler))
        .await
        .map_err(|_| TartbootError::Ssh {
            message: format!("connecting to {addr} timed out"),
        })?
        .map_err(|e| TartbootError::Ssh {
            message: format!("connecting to {addr}: {e}"),
        })?;

    let auth = handle
        .authenticate_password(user, password)
        .await
        .map_err(|e| TartbootError::Ssh {
            message: format!("authenticating as {user}: {e}"),
        })?;
    if !auth.success() {
        return Err(TartbootError::Ssh {
            message: format!("password rejected for user {user}"),
        });
    }

    tracing::debug!(addr, "SSH authenticated");
    Ok(handle)
}

/// Run `command` on a fresh channel and return its exit status, if the
/// server reported one before the channel closed.
pub async fn exec(
    handle: &client::Handle<SshHandler>,
    command: &str,
) -> Result<Option<u32>, TartbootError> {
    let ssh_err = |e: russh::Error| TartbootError::Ssh {
        message: e.to_string(),
    };

    let mut channel = handle.channel_open_session().await.map_err(ssh_err)?;
    channel.exec(true, command).await.map_err(ssh_err)?;

    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        if let ChannelMsg::ExitStatus { exit_status: code } = msg {
            exit_status = Some(code);
        }
    }
    Ok(exit_status)
}

pub async fn disconnect(handle: client::Handle<SshHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!("SSH disconnect: {e}");
    }
}

/// Minimal shell escaping: wrap in single quotes, escape embedded single quotes.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// `command` run through `sudo -S`, with the password fed on stdin.
pub fn sudo_command(password: &str, command: &str) -> String {
    format!("echo {} | sudo -S {command}", shell_escape(password))
}
