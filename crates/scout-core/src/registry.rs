//! # Connector Registry
//!
//! Attach front ends speak in numeric ids, but some targets are only known by
//! an opaque string (a USB device serial, a tunnel name, ...). The registry
//! gives every such identity a stable virtual id in the same numeric space as
//! OS process ids, and stores the [`Connector`] that knows how to reach it.
//!
//! ## Id allocation
//!
//! Virtual ids start at [`VIRTUAL_ID_BASE`] and grow by one for every new
//! identity. An identity keeps its id for the lifetime of the registry, even
//! after its connector is removed.
//!
//! ## Example
//!
//! ```rust
//! use scout_core::registry::ConnectorRegistry;
//! use scout_core::types::TargetId;
//!
//! let registry = ConnectorRegistry::new();
//! assert_eq!(registry.get_or_assign_virtual_id("usb-0001"), TargetId(1_000_000));
//! assert_eq!(registry.get_or_assign_virtual_id("usb-0002"), TargetId(1_000_001));
//! assert_eq!(registry.get_or_assign_virtual_id("usb-0001"), TargetId(1_000_000));
//! assert_eq!(registry.reverse_lookup(TargetId(1_000_001)).as_deref(), Some("usb-0002"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::error::ConnectorError;
use crate::types::{AttachInfo, TargetId};

/// First virtual id handed out, chosen above realistic pids and guids.
pub const VIRTUAL_ID_BASE: u32 = 1_000_000;

/// Transport that must be set up before a debugger can attach
///
/// Implemented outside this crate, e.g. to open a TCP tunnel over USB to a
/// device. The registry only stores connectors; it never looks inside them.
pub trait Connector: Send + Sync
{
    /// Establish the transport and return where the debugger should connect.
    ///
    /// ## Errors
    ///
    /// Any [`ConnectorError`] is reported to the caller of
    /// `resolve_attach_info` as a connector setup failure.
    fn setup_connection(&self) -> Result<AttachInfo, ConnectorError>;

    /// Tear the transport down once the debugger session has ended.
    fn on_disconnect(&self);
}

#[derive(Debug)]
struct IdTable
{
    next_id: u32,
    by_external: HashMap<String, TargetId>,
    by_virtual: HashMap<TargetId, String>,
}

/// Bidirectional map between external identities and virtual ids, plus the
/// connectors registered for them
///
/// All methods take `&self`; the registry is shared between the discovery
/// engine and the device sources that register connectors.
pub struct ConnectorRegistry
{
    ids: Mutex<IdTable>,
    connectors: RwLock<HashMap<TargetId, Arc<dyn Connector>>>,
}

impl fmt::Debug for ConnectorRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let ids = self.ids();
        f.debug_struct("ConnectorRegistry")
            .field("next_id", &ids.next_id)
            .field("identities", &ids.by_external.len())
            .field("connectors", &self.connector_ids().len())
            .finish()
    }
}

impl Default for ConnectorRegistry
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ConnectorRegistry
{
    /// Create an empty registry whose first virtual id is [`VIRTUAL_ID_BASE`].
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            ids: Mutex::new(IdTable {
                next_id: VIRTUAL_ID_BASE,
                by_external: HashMap::new(),
                by_virtual: HashMap::new(),
            }),
            connectors: RwLock::new(HashMap::new()),
        }
    }

    /// Return the virtual id bound to `external_id`, allocating the next one
    /// if the identity has not been seen before.
    ///
    /// Lookup and allocation happen under one lock, so concurrent callers
    /// with the same identity always agree on the id.
    pub fn get_or_assign_virtual_id(&self, external_id: &str) -> TargetId
    {
        let mut ids = self.ids();
        if let Some(id) = ids.by_external.get(external_id) {
            return *id;
        }

        let id = TargetId(ids.next_id);
        ids.next_id = ids.next_id.saturating_add(1);
        ids.by_external.insert(external_id.to_string(), id);
        ids.by_virtual.insert(id, external_id.to_string());
        debug!(external_id, %id, "assigned virtual id");
        id
    }

    /// External identity bound to a virtual id, or `None` if the id was never assigned.
    #[must_use]
    pub fn reverse_lookup(&self, id: TargetId) -> Option<String>
    {
        self.ids().by_virtual.get(&id).cloned()
    }

    /// Bind `connector` to `external_id`, assigning a virtual id if needed.
    ///
    /// A connector already registered for the same identity is replaced.
    pub fn register_connector(&self, external_id: &str, connector: Arc<dyn Connector>) -> TargetId
    {
        let id = self.get_or_assign_virtual_id(external_id);
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, connector);
        id
    }

    /// Connector registered for a virtual id.
    #[must_use]
    pub fn connector(&self, id: TargetId) -> Option<Arc<dyn Connector>>
    {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Remove the connector bound to `id`. The id mapping itself is kept.
    pub fn remove_connector(&self, id: TargetId) -> Option<Arc<dyn Connector>>
    {
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Ids that currently have a connector.
    #[must_use]
    pub fn connector_ids(&self) -> Vec<TargetId>
    {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn ids(&self) -> MutexGuard<'_, IdTable>
    {
        // The table is consistent after every statement, so a poisoned lock is still usable
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
