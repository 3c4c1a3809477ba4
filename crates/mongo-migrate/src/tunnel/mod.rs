//! The tunnel to the source host.
//!

use core::fmt;
use std::io;

use thiserror::Error;

mod process_finder;
mod ssh;

pub use process_finder::{ProcTable, ProcessFinder, TerminateError};
pub use ssh::SshTunnel;

/// A live tunnel process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    /// The tunnel process.
    pub pid: u32,

    /// The local port the tunnel is bound to.
    pub local_port: u16,

    /// The host the tunnel forwards to.
    pub host: String,

    /// The port on the host the tunnel forwards to.
    pub remote_port: u16,
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "localhost:{} -> {}:{} (pid {})",
            self.local_port, self.host, self.remote_port, self.pid
        )
    }
}

/// Controls the lifecycle of a tunnel to one host.
pub trait TunnelControl {
    /// If the host accepts a connection within the configured timeout.
    fn check_connectivity(&mut self) -> bool;

    /// Start the tunnel and verify it forwards.
    fn establish(&mut self) -> Result<TunnelHandle, EstablishError>;

    /// Stop `handle` and any other tunnel process for the host.
    ///
    /// Must be a no-op when there is nothing to stop.
    fn teardown(&mut self, handle: Option<TunnelHandle>);
}

/// Owns an established tunnel and tears it down when dropped.
pub struct TunnelGuard<'a, T: TunnelControl> {
    tunnel: &'a mut T,
    handle: Option<TunnelHandle>,
}

impl<'a, T: TunnelControl> TunnelGuard<'a, T> {
    /// Guard an established tunnel.
    pub fn new(tunnel: &'a mut T, handle: TunnelHandle) -> Self {
        Self {
            tunnel,
            handle: Some(handle),
        }
    }
}

impl<T: TunnelControl> Drop for TunnelGuard<'_, T> {
    fn drop(&mut self) {
        self.tunnel.teardown(self.handle.take());
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EstablishError {
    #[error("Failed to start the tunnel process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to check the tunnel process: {0}")]
    Wait(#[source] io::Error),

    #[error("The tunnel process exited with code {0:?} before forwarding")]
    Exited(Option<i32>),

    #[error("The tunnel port {0} is not reachable: {1}")]
    Unreachable(u16, #[source] io::Error),
}
