//! # scout-core
//!
//! Attach-target discovery for debugger front ends.
//!
//! This crate finds the runtimes a debugger can attach to and turns a chosen
//! target into a concrete endpoint:
//! - Network players announcing themselves on a UDP multicast group
//! - Editor processes running on this machine
//! - Devices reached through pluggable connectors (e.g. a TCP tunnel over USB)
//!
//! ## Layers
//!
//! - [`wire`]: parser for the `[KEY]value` announcement format
//! - [`listener`]: multicast sockets and the presence cache with TTL decay
//! - [`process`]: editor process enumeration
//! - [`registry`]: virtual ids and connectors for non-network targets
//! - [`discovery`]: the [`Discovery`] context merging all of the above
//!
//! The debugger protocol itself is out of scope: discovery ends once an id
//! has been resolved into an [`AttachInfo`].
//!
//! ## Logging
//!
//! Everything is reported through `tracing`. Install a subscriber (for
//! example with `scout-utils`) to see it.

pub mod config;
pub mod discovery;
pub mod error;
pub mod listener;
pub mod process;
pub mod registry;
pub mod types;
pub mod wire;

pub use config::DiscoveryConfig;
pub use discovery::{select_by_name, DeviceSource, Discovery, DiscoveryBuilder};
// Re-export commonly used types
pub use error::{ConnectorError, DiscoveryError, Result};
pub use registry::{Connector, ConnectorRegistry};
pub use types::{AttachInfo, AttachTarget, Selection, TargetId, TargetKind};
pub use wire::{parse_announcement, ParseError, PlayerRecord};
