//! Resolved attach endpoint.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Concrete endpoint a debugger session connects to
///
/// Produced by [`Discovery::resolve_attach_info`](crate::discovery::Discovery::resolve_attach_info)
/// or by a [`Connector`](crate::registry::Connector) when it sets up its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachInfo
{
    /// Application name, when the target announced one
    pub app_name: Option<String>,
    /// Address the debugger agent listens on
    pub address: IpAddr,
    /// Port the debugger agent listens on
    pub port: u16,
}

impl AttachInfo
{
    /// Create attach info for an arbitrary endpoint.
    #[must_use]
    pub fn new(app_name: Option<String>, address: IpAddr, port: u16) -> Self
    {
        Self { app_name, address, port }
    }

    /// Attach info for an agent on this machine.
    #[must_use]
    pub fn loopback(port: u16) -> Self
    {
        Self::new(None, IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// Endpoint as a socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr
    {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for AttachInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.app_name {
            Some(name) => write!(f, "{name} @ {}", self.socket_addr()),
            None => write!(f, "{}", self.socket_addr()),
        }
    }
}
