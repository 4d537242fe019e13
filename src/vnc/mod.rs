//! Minimal RFB (VNC) client used to type into the guest.

pub mod auth;
pub mod client;
pub mod keysym;
#[cfg(test)]
pub mod testing;

pub use client::{ProtocolVersion, ServerInit, VncClient};

/// Left mouse button in a pointer event mask.
pub const BUTTON_LEFT: u8 = 1;

/// Anything that accepts RFB-style input events.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait InputSink {
    async fn key_event(&mut self, keysym: u32, down: bool) -> std::io::Result<()>;
    async fn pointer_event(&mut self, buttons: u8, x: u16, y: u16) -> std::io::Result<()>;
}
