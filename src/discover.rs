//! VNC endpoint discovery.
//!
//! Tart prints a `vnc://:<password>@<host>:<port>` URL once its VNC server
//! is up; there is no other signal. Scraping lives behind
//! [`EndpointDiscoverer`] so a structured source can replace it.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::TartbootError;
use crate::process::OutputBuffer;
use crate::wait::{self, WaitError};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

// Optional `user:` before the password, as in Tart's `vnc://:pw@host:port`.
// The password runs up to the last `@` before the host.
static DESCRIPTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"vnc://(?:[^:@\s/]*:)?(\S*)@([^:@\s/]+):([0-9]{1,5})\b")
        .expect("valid descriptor regex")
});

// Anything that looks like credentials, valid port or not.
static CREDENTIALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"vnc://(?:[^:@\s/]*:)?(\S*)@").expect("valid credentials regex")
});

/// Where to reach the guest's VNC server and how to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct VncEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl VncEndpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for VncEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VncEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// First VNC descriptor anywhere in `text`.
pub fn parse_descriptor(text: &str) -> Option<VncEndpoint> {
    DESCRIPTOR_RE.captures_iter(text).find_map(|caps| {
        let port = caps[3].parse().ok()?;
        Some(VncEndpoint {
            password: caps[1].to_string(),
            host: caps[2].to_string(),
            port,
        })
    })
}

/// `text` with the password of every VNC URL replaced by `<redacted>`.
pub fn redact(text: &str) -> Cow<'_, str> {
    let mut out = String::new();
    let mut last = 0;
    for caps in CREDENTIALS_RE.captures_iter(text) {
        let Some(password) = caps.get(1).filter(|m| !m.is_empty()) else {
            continue;
        };
        out.push_str(&text[last..password.start()]);
        out.push_str("<redacted>");
        last = password.end();
    }
    if last == 0 {
        return Cow::Borrowed(text);
    }
    out.push_str(&text[last..]);
    Cow::Owned(out)
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait EndpointDiscoverer {
    async fn discover(&self, cancel: &CancellationToken) -> Result<VncEndpoint, TartbootError>;
}

/// Polls the captured process output for a descriptor.
pub struct OutputScanner {
    output: OutputBuffer,
    timeout: Duration,
    interval: Duration,
}

impl OutputScanner {
    pub fn new(output: OutputBuffer, timeout: Duration) -> Self {
        Self {
            output,
            timeout,
            interval: POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl EndpointDiscoverer for OutputScanner {
    async fn discover(&self, cancel: &CancellationToken) -> Result<VncEndpoint, TartbootError> {
        let result = wait::poll_until(self.timeout, self.interval, cancel, || async {
            parse_descriptor(&self.output.snapshot())
        })
        .await;

        match result {
            Ok(endpoint) => {
                tracing::info!(host = %endpoint.host, port = endpoint.port, "VNC credentials found");
                Ok(endpoint)
            }
            Err(WaitError::Timeout) => Err(TartbootError::CredentialTimeout {
                seconds: self.timeout.as_secs(),
            }),
            Err(WaitError::Cancelled) => Err(TartbootError::Cancelled {
                phase: "waiting for VNC credentials".into(),
            }),
        }
    }
}
