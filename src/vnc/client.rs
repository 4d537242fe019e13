//! RFB client: handshake plus the two input messages the boot command needs.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::InputSink;
use super::auth::{self, CHALLENGE_LEN};
use crate::discover::VncEndpoint;
use crate::error::TartbootError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REASON_LEN: u32 = 64 * 1024;
const MAX_NAME_LEN: u32 = 64 * 1024;

const SECURITY_INVALID: u32 = 0;
const SECURITY_NONE: u8 = 1;
const SECURITY_VNC: u8 = 2;

const MSG_KEY_EVENT: u8 = 4;
const MSG_POINTER_EVENT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const V3_3: Self = Self { major: 3, minor: 3 };
    pub const V3_7: Self = Self { major: 3, minor: 7 };
    pub const V3_8: Self = Self { major: 3, minor: 8 };

    /// Parse a `RFB xxx.yyy\n` greeting.
    pub fn parse(greeting: &[u8; 12]) -> Option<Self> {
        let text = std::str::from_utf8(greeting).ok()?;
        let rest = text.strip_prefix("RFB ")?.strip_suffix('\n')?;
        let (major, minor) = rest.split_once('.')?;
        if major.len() != 3 || minor.len() != 3 {
            return None;
        }
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// Highest version we speak that the server also offers.
    ///
    /// Apple's server announces 3.889 and otherwise behaves like 3.8.
    pub fn negotiate(server: Self) -> Self {
        if server.major > 3 || server.minor >= 8 {
            Self::V3_8
        } else if server.minor == 7 {
            Self::V3_7
        } else {
            Self::V3_3
        }
    }

    fn greeting(self) -> String {
        format!("RFB {:03}.{:03}\n", self.major, self.minor)
    }
}

/// What the server told us about its framebuffer after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub name: String,
}

pub struct VncClient<S> {
    stream: S,
    version: ProtocolVersion,
    server: ServerInit,
}

impl VncClient<TcpStream> {
    /// Open a TCP connection to `endpoint` and complete the handshake.
    pub async fn connect(endpoint: &VncEndpoint) -> Result<Self, TartbootError> {
        let addr = endpoint.addr();
        let attempt = async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| connect_error(&addr, e))?;
            let _ = stream.set_nodelay(true);
            Self::handshake(stream, &addr, &endpoint.password).await
        };

        tokio::time::timeout(CONNECT_TIMEOUT, attempt)
            .await
            .map_err(|_| TartbootError::VncConnect {
                addr: addr.clone(),
                message: format!("handshake did not finish within {}s", CONNECT_TIMEOUT.as_secs()),
            })?
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> VncClient<S> {
    /// Run the RFB handshake over an already connected stream.
    pub async fn handshake(mut stream: S, addr: &str, password: &str) -> Result<Self, TartbootError> {
        let io = |e: std::io::Error| connect_error(addr, e);

        let mut greeting = [0u8; 12];
        stream.read_exact(&mut greeting).await.map_err(io)?;
        let server_version =
            ProtocolVersion::parse(&greeting).ok_or_else(|| TartbootError::VncConnect {
                addr: addr.into(),
                message: format!(
                    "not an RFB server (greeting {:?})",
                    String::from_utf8_lossy(&greeting)
                ),
            })?;
        let version = ProtocolVersion::negotiate(server_version);
        stream
            .write_all(version.greeting().as_bytes())
            .await
            .map_err(io)?;
        tracing::debug!(?server_version, ?version, "RFB version negotiated");

        let security = if version == ProtocolVersion::V3_3 {
            let ty = stream.read_u32().await.map_err(io)?;
            if ty == SECURITY_INVALID {
                let reason = read_reason(&mut stream).await.map_err(io)?;
                return Err(TartbootError::VncConnect {
                    addr: addr.into(),
                    message: format!("server refused the connection: {reason}"),
                });
            }
            u8::try_from(ty).unwrap_or(u8::MAX)
        } else {
            let count = stream.read_u8().await.map_err(io)?;
            if count == 0 {
                let reason = read_reason(&mut stream).await.map_err(io)?;
                return Err(TartbootError::VncConnect {
                    addr: addr.into(),
                    message: format!("server refused the connection: {reason}"),
                });
            }
            let mut offered = vec![0u8; usize::from(count)];
            stream.read_exact(&mut offered).await.map_err(io)?;

            let chosen = [SECURITY_VNC, SECURITY_NONE]
                .into_iter()
                .find(|ty| offered.contains(ty))
                .ok_or_else(|| TartbootError::VncAuth {
                    message: format!("no supported security type offered ({offered:?})"),
                })?;
            stream.write_u8(chosen).await.map_err(io)?;
            chosen
        };

        match security {
            SECURITY_VNC => {
                let mut challenge = [0u8; CHALLENGE_LEN];
                stream.read_exact(&mut challenge).await.map_err(io)?;
                let response = auth::encrypt_challenge(password, &challenge);
                stream.write_all(&response).await.map_err(io)?;
            }
            SECURITY_NONE => {}
            other => {
                return Err(TartbootError::VncAuth {
                    message: format!("unsupported security type {other}"),
                });
            }
        }

        // Before 3.8 a server skips SecurityResult when no auth was done.
        if security == SECURITY_VNC || version == ProtocolVersion::V3_8 {
            let result = stream.read_u32().await.map_err(io)?;
            if result != 0 {
                let reason = if version == ProtocolVersion::V3_8 {
                    read_reason(&mut stream).await.unwrap_or_default()
                } else {
                    String::new()
                };
                return Err(TartbootError::VncAuth {
                    message: if reason.is_empty() {
                        "the server rejected the password".into()
                    } else {
                        reason
                    },
                });
            }
        }

        // ClientInit: shared session
        stream.write_u8(1).await.map_err(io)?;
        stream.flush().await.map_err(io)?;

        let width = stream.read_u16().await.map_err(io)?;
        let height = stream.read_u16().await.map_err(io)?;
        let mut pixel_format = [0u8; 16];
        stream.read_exact(&mut pixel_format).await.map_err(io)?;
        let name = read_string(&mut stream, MAX_NAME_LEN).await.map_err(io)?;

        let server = ServerInit {
            width,
            height,
            name,
        };
        tracing::info!(addr, width, height, name = %server.name, "VNC session established");

        Ok(Self {
            stream,
            version,
            server,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn server(&self) -> &ServerInit {
        &self.server
    }

    /// Shut down the write half of the connection.
    pub async fn close(mut self) -> Result<(), TartbootError> {
        self.stream.shutdown().await.map_err(|e| TartbootError::Io {
            context: "closing the VNC connection".into(),
            source: e,
        })
    }
}

impl<S: AsyncWrite + Unpin> InputSink for VncClient<S> {
    async fn key_event(&mut self, keysym: u32, down: bool) -> std::io::Result<()> {
        let mut msg = [0u8; 8];
        msg[0] = MSG_KEY_EVENT;
        msg[1] = u8::from(down);
        msg[4..].copy_from_slice(&keysym.to_be_bytes());
        self.stream.write_all(&msg).await?;
        self.stream.flush().await
    }

    async fn pointer_event(&mut self, buttons: u8, x: u16, y: u16) -> std::io::Result<()> {
        let mut msg = [0u8; 6];
        msg[0] = MSG_POINTER_EVENT;
        msg[1] = buttons;
        msg[2..4].copy_from_slice(&x.to_be_bytes());
        msg[4..].copy_from_slice(&y.to_be_bytes());
        self.stream.write_all(&msg).await?;
        self.stream.flush().await
    }
}

fn connect_error(addr: &str, e: std::io::Error) -> TartbootError {
    TartbootError::VncConnect {
        addr: addr.into(),
        message: e.to_string(),
    }
}

async fn read_string<S: AsyncRead + Unpin>(stream: &mut S, max: u32) -> std::io::Result<String> {
    let len = stream.read_u32().await?;
    if len > max {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("string of {len} bytes exceeds {max}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn read_reason<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<String> {
    read_string(stream, MAX_REASON_LEN).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnc::testing::serve_v38;
    use tokio::io::DuplexStream;

    async fn expect_greeting(s: &mut DuplexStream, expected: &[u8; 12]) {
        let mut got = [0u8; 12];
        s.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, expected, "client version");
    }

    async fn send_server_init(s: &mut DuplexStream) {
        assert_eq!(s.read_u8().await.unwrap(), 1, "shared flag");
        s.write_u16(1024).await.unwrap();
        s.write_u16(768).await.unwrap();
        s.write_all(&[0u8; 16]).await.unwrap();
        s.write_u32(5).await.unwrap();
        s.write_all(b"tart!").await.unwrap();
    }

    #[test]
    fn version_parsing_and_negotiation() {
        let v = ProtocolVersion::parse(b"RFB 003.008\n").unwrap();
        assert_eq!(v, ProtocolVersion::V3_8);
        assert!(ProtocolVersion::parse(b"HTTP/1.1 200").is_none());
        assert!(ProtocolVersion::parse(b"RFB 3.8     ").is_none());

        let apple = ProtocolVersion::parse(b"RFB 003.889\n").unwrap();
        assert_eq!(ProtocolVersion::negotiate(apple), ProtocolVersion::V3_8);
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion::V3_7),
            ProtocolVersion::V3_7
        );
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion { major: 3, minor: 5 }),
            ProtocolVersion::V3_3
        );
        assert_eq!(ProtocolVersion::V3_3.greeting(), "RFB 003.003\n");
    }

    #[tokio::test]
    async fn handshake_and_input_messages() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move { serve_v38(server_end, "s3cr3t").await.unwrap() });

        let mut client = VncClient::handshake(client_end, "fake:5900", "s3cr3t")
            .await
            .unwrap();
        assert_eq!(client.version(), ProtocolVersion::V3_8);
        assert_eq!(
            client.server(),
            &ServerInit {
                width: 1024,
                height: 768,
                name: "tart!".into()
            }
        );

        client.key_event(0x61, true).await.unwrap();
        client.key_event(0x61, false).await.unwrap();
        client.pointer_event(1, 10, 300).await.unwrap();
        client.close().await.unwrap();

        let sent = server.await.unwrap();
        assert_eq!(
            sent,
            vec![
                4, 1, 0, 0, 0, 0, 0, 0x61, //
                4, 0, 0, 0, 0, 0, 0, 0x61, //
                5, 1, 0, 10, 0x01, 0x2C,
            ]
        );
    }

    #[tokio::test]
    async fn wrong_password_is_an_auth_error() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move { serve_v38(server_end, "s3cr3t").await.unwrap() });

        let err = VncClient::handshake(client_end, "fake:5900", "guess")
            .await
            .err()
            .unwrap();
        match err {
            TartbootError::VncAuth { message } => assert_eq!(message, "Authentication failed"),
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn v33_server_without_auth() {
        let (client_end, mut s) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            s.write_all(b"RFB 003.003\n").await.unwrap();
            expect_greeting(&mut s, b"RFB 003.003\n").await;
            s.write_u32(u32::from(SECURITY_NONE)).await.unwrap();
            send_server_init(&mut s).await;
        });

        let client = VncClient::handshake(client_end, "fake:5900", "").await.unwrap();
        assert_eq!(client.version(), ProtocolVersion::V3_3);
        assert_eq!(client.server().width, 1024);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_security_list_carries_reason() {
        let (client_end, mut s) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            s.write_all(b"RFB 003.007\n").await.unwrap();
            expect_greeting(&mut s, b"RFB 003.007\n").await;
            let reason = b"too many connections";
            s.write_u8(0).await.unwrap();
            s.write_u32(reason.len() as u32).await.unwrap();
            s.write_all(reason).await.unwrap();
        });

        let err = VncClient::handshake(client_end, "fake:5900", "pw")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TartbootError::VncConnect { .. }));
        assert!(err.to_string().contains("too many connections"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_security_types_are_rejected() {
        let (client_end, mut s) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            s.write_all(b"RFB 003.008\n").await.unwrap();
            expect_greeting(&mut s, b"RFB 003.008\n").await;
            // Apple Remote Desktop and TLS only
            s.write_all(&[2, 30, 18]).await.unwrap();
        });

        let err = VncClient::handshake(client_end, "fake:5900", "pw")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TartbootError::VncAuth { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn non_rfb_peer_is_a_connect_error() {
        let (client_end, mut s) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = s.write_all(b"SSH-2.0-Open").await;
        });

        let err = VncClient::handshake(client_end, "fake:22", "pw")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TartbootError::VncConnect { addr, .. } if addr == "fake:22"));
    }

    #[tokio::test]
    async fn connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = VncEndpoint {
            host: "127.0.0.1".into(),
            port,
            password: "pw".into(),
        };
        let err = VncClient::connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, TartbootError::VncConnect { .. }));
    }
}
