//! # Player Connection
//!
//! Listens for player announcements on the multicast group and keeps the
//! [`PresenceCache`] up to date.
//!
//! ## Sockets
//!
//! One socket is opened for every (IPv4 interface, announcement port) pair,
//! each bound to the wildcard address and joined to the group on its
//! interface. A socket that fails to set up is logged and skipped; if none
//! can be opened the connection still works but never receives anything,
//! and discovery is left with local processes and devices only.
//!
//! ## Polling
//!
//! [`PlayerConnection::poll`] never blocks. It first ages the cache and only
//! then drains queued datagrams, so an announcement received in a cycle is
//! never aged out in that same cycle.

pub mod presence;
pub mod socket;

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

pub use presence::PresenceCache;
pub use socket::{Interface, MulticastSocket};

use crate::config::DiscoveryConfig;
use socket::MAX_ANNOUNCEMENT_LEN;

/// Receiver of player announcements
///
/// Not thread-safe; the discovery engine wraps it in a mutex shared between
/// the background poll loop and player queries.
#[derive(Debug)]
pub struct PlayerConnection
{
    sockets: Vec<MulticastSocket>,
    presence: PresenceCache,
    buffer: Vec<u8>,
}

impl PlayerConnection
{
    /// Open one socket per IPv4 interface and configured port.
    ///
    /// Never fails: sockets that cannot be set up are left out.
    #[must_use]
    pub fn open(config: &DiscoveryConfig) -> Self
    {
        Self::open_on(config, &socket::ipv4_interfaces())
    }

    /// Open sockets on an explicit set of interfaces.
    #[must_use]
    pub fn open_on(config: &DiscoveryConfig, interfaces: &[Interface]) -> Self
    {
        let mut sockets = Vec::with_capacity(interfaces.len() * config.ports.len());

        for interface in interfaces {
            for &port in &config.ports {
                match MulticastSocket::join(config.multicast_group, interface.address, port) {
                    Ok(socket) => {
                        debug!(
                            group = %config.multicast_group,
                            port,
                            interface = %interface.name,
                            address = %interface.address,
                            "joined player multicast group"
                        );
                        sockets.push(socket);
                    }
                    Err(e) => {
                        warn!(
                            group = %config.multicast_group,
                            port,
                            interface = %interface.name,
                            error = %e,
                            "failed to set up multicast socket"
                        );
                    }
                }
            }
        }

        info!(sockets = sockets.len(), interfaces = interfaces.len(), "player connection ready");
        Self::from_sockets(sockets, config)
    }

    /// Build a connection around already prepared sockets.
    #[must_use]
    pub fn from_sockets(sockets: Vec<MulticastSocket>, config: &DiscoveryConfig) -> Self
    {
        Self {
            sockets,
            presence: PresenceCache::new(config.player_ttl, config.cache_capacity),
            buffer: vec![0; MAX_ANNOUNCEMENT_LEN],
        }
    }

    /// A connection without sockets. Announcements only enter it through
    /// [`register_player`](Self::register_player).
    #[must_use]
    pub fn detached(config: &DiscoveryConfig) -> Self
    {
        Self::from_sockets(Vec::new(), config)
    }

    /// Number of sockets that were set up successfully.
    #[must_use]
    pub fn socket_count(&self) -> usize
    {
        self.sockets.len()
    }

    /// Whether the connection can receive anything at all.
    #[must_use]
    pub fn is_listening(&self) -> bool
    {
        !self.sockets.is_empty()
    }

    /// Ports and interfaces of the open sockets.
    pub fn endpoints(&self) -> impl Iterator<Item = (Ipv4Addr, u16)> + '_
    {
        self.sockets.iter().map(|s| (s.interface(), s.port()))
    }

    /// Run one poll cycle: age every cached announcement, then drain all
    /// sockets into the cache.
    ///
    /// Returns the number of datagrams received.
    pub fn poll(&mut self) -> usize
    {
        let purged = self.presence.age();
        if purged > 0 {
            debug!(purged, "purged expired announcements");
        }

        let mut received = 0;
        for socket in &self.sockets {
            received += socket.drain(&mut self.buffer, |announcement| self.presence.register(announcement));
        }
        received
    }

    /// Record an announcement as if it had just been received.
    pub fn register_player(&mut self, announcement: impl Into<String>)
    {
        self.presence.register(announcement.into());
    }

    /// Raw announcements that are currently available.
    ///
    /// Recomputed on every call; holding the iterator borrows the connection.
    pub fn available_players(&self) -> impl Iterator<Item = &str> + '_
    {
        self.presence.available()
    }

    /// Whether any announcement is currently available.
    #[must_use]
    pub fn has_available_players(&self) -> bool
    {
        self.presence.has_available()
    }

    /// Read access to the presence cache.
    #[must_use]
    pub fn presence(&self) -> &PresenceCache
    {
        &self.presence
    }
}
