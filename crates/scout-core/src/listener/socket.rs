//! Multicast socket setup and non-blocking receive.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

/// Largest announcement read from a single datagram. Longer datagrams are truncated.
pub const MAX_ANNOUNCEMENT_LEN: usize = 1024;

/// Upper bound on datagrams drained from one socket in a single poll, so a
/// flooding sender cannot keep a poll running.
pub const MAX_DATAGRAMS_PER_POLL: usize = 256;

/// IPv4 interface a multicast membership is joined on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface
{
    /// Interface name as reported by the OS
    pub name: String,
    /// IPv4 address identifying the interface for `IP_ADD_MEMBERSHIP`
    pub address: Ipv4Addr,
}

/// One non-blocking UDP socket receiving announcements for one
/// (interface, port) pair.
#[derive(Debug)]
pub struct MulticastSocket
{
    socket: UdpSocket,
    interface: Ipv4Addr,
    port: u16,
}

impl MulticastSocket
{
    /// Bind to `0.0.0.0:port` with address reuse and join `group` on `interface`.
    ///
    /// Address reuse is best-effort: some platforms refuse it, in which case
    /// only the first socket on a port will bind.
    ///
    /// ## Errors
    ///
    /// Any failure to create, bind, join or switch the socket to
    /// non-blocking mode.
    pub fn join(group: Ipv4Addr, interface: Ipv4Addr, port: u16) -> io::Result<Self>
    {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(e) = socket.set_reuse_address(true) {
            debug!(port, error = %e, "address reuse not supported");
        }
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
        socket.join_multicast_v4(&group, &interface)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: socket.into(),
            interface,
            port,
        })
    }

    /// Wrap an already bound socket, switching it to non-blocking mode.
    ///
    /// Useful for unicast receivers (e.g. on loopback) that do not join a group.
    ///
    /// ## Errors
    ///
    /// Fails if the local address cannot be read or the socket cannot be made
    /// non-blocking.
    pub fn from_udp(socket: UdpSocket) -> io::Result<Self>
    {
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;
        let interface = match local.ip() {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        Ok(Self {
            socket,
            interface,
            port: local.port(),
        })
    }

    /// Local port this socket receives on.
    #[must_use]
    pub fn port(&self) -> u16
    {
        self.port
    }

    /// Interface address the membership was joined on.
    #[must_use]
    pub fn interface(&self) -> Ipv4Addr
    {
        self.interface
    }

    /// Read every datagram already queued on the socket without blocking.
    ///
    /// Each payload is decoded as ASCII and handed to `sink`. Returns the
    /// number of datagrams read.
    pub fn drain(&self, buffer: &mut [u8], mut sink: impl FnMut(String)) -> usize
    {
        let mut received = 0;
        while received < MAX_DATAGRAMS_PER_POLL {
            match self.socket.recv_from(buffer) {
                Ok((len, from)) => {
                    received += 1;
                    trace!(%from, port = self.port, len, "announcement datagram");
                    sink(decode_ascii(&buffer[..len]));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(port = self.port, interface = %self.interface, error = %e, "receive failed");
                    break;
                }
            }
        }
        received
    }
}

/// Decode a datagram as ASCII. Bytes outside the ASCII range become `?`.
#[must_use]
pub fn decode_ascii(bytes: &[u8]) -> String
{
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
        .collect()
}

/// List the IPv4 interfaces of this machine, one entry per interface.
///
/// If interfaces cannot be listed, a single wildcard entry is returned so the
/// OS picks the default multicast interface.
#[must_use]
pub fn ipv4_interfaces() -> Vec<Interface>
{
    let netifs = match local_ip_address::list_afinet_netifas() {
        Ok(netifs) => netifs,
        Err(e) => {
            warn!(error = %e, "failed to list network interfaces, joining on the default interface");
            return vec![Interface {
                name: "default".to_string(),
                address: Ipv4Addr::UNSPECIFIED,
            }];
        }
    };

    let interfaces = unique_ipv4(netifs);
    debug!(count = interfaces.len(), "discovered IPv4 interfaces");
    interfaces
}

/// Keep the first IPv4 address of each interface name.
fn unique_ipv4(netifs: impl IntoIterator<Item = (String, IpAddr)>) -> Vec<Interface>
{
    let mut interfaces: Vec<Interface> = Vec::new();
    for (name, ip) in netifs {
        let IpAddr::V4(address) = ip else { continue };
        if interfaces.iter().any(|i| i.name == name || i.address == address) {
            trace!(%name, %address, "skipping additional interface address");
            continue;
        }
        interfaces.push(Interface { name, address });
    }
    interfaces
}
