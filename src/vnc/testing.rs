//! In-process RFB server for tests.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::auth::{self, CHALLENGE_LEN};

pub const CHALLENGE: [u8; CHALLENGE_LEN] = *b"0123456789abcdef";

/// Serve one RFB 3.8 session with VNC auth. Returns every byte the client
/// sent after initialisation, or nothing when the password was wrong.
pub async fn serve_v38<S>(mut s: S, password: &str) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    s.write_all(b"RFB 003.008\n").await?;
    let mut client_version = [0u8; 12];
    s.read_exact(&mut client_version).await?;
    assert_eq!(&client_version, b"RFB 003.008\n", "client version");

    // None and VNC auth offered
    s.write_all(&[2, 1, 2]).await?;
    assert_eq!(s.read_u8().await?, 2, "client must pick VNC auth");

    s.write_all(&CHALLENGE).await?;
    let mut response = [0u8; CHALLENGE_LEN];
    s.read_exact(&mut response).await?;
    if response != auth::encrypt_challenge(password, &CHALLENGE) {
        let reason = b"Authentication failed";
        s.write_u32(1).await?;
        s.write_u32(reason.len() as u32).await?;
        s.write_all(reason).await?;
        return Ok(Vec::new());
    }
    s.write_u32(0).await?;

    assert_eq!(s.read_u8().await?, 1, "shared flag");
    s.write_u16(1024).await?;
    s.write_u16(768).await?;
    s.write_all(&[0u8; 16]).await?;
    s.write_u32(5).await?;
    s.write_all(b"tart!").await?;

    let mut rest = Vec::new();
    s.read_to_end(&mut rest).await?;
    Ok(rest)
}

/// Listen on an ephemeral localhost port and serve a single session.
pub async fn spawn_tcp_server(password: &'static str) -> (u16, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_v38(stream, password).await.unwrap()
    });
    (port, handle)
}

/// Split the bytes a client sent into `(keysym, down)` key events.
pub fn key_events(bytes: &[u8]) -> Vec<(u32, bool)> {
    bytes
        .chunks(8)
        .filter(|msg| msg.len() == 8 && msg[0] == 4)
        .map(|msg| {
            let sym = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
            (sym, msg[1] == 1)
        })
        .collect()
}
