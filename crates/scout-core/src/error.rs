//! # Error Types
//!
//! Error handling for discovery and attach resolution.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Most failures inside the discovery engine are *not* errors from the
//! caller's point of view: a malformed announcement is logged and skipped, a
//! socket that fails to bind is logged and left out, and an unknown id
//! resolves to the loopback default. The variants below are the cases that
//! do reach a caller.

use thiserror::Error;

use crate::types::TargetId;

/// Main error type for discovery operations
///
/// ## Error Categories
///
/// 1. **Connector errors**: ConnectorSetup (the only error `resolve_attach_info` returns)
/// 2. **Selection errors**: TargetNotFound, AmbiguousTarget
/// 3. **Setup errors**: NoRuntime, Config
#[derive(Error, Debug)]
pub enum DiscoveryError
{
    /// A connector owns the id but failed to set up its transport
    ///
    /// Once a connector has claimed an id there is no safe fallback, so the
    /// failure is surfaced instead of resolving to loopback.
    #[error("Connector '{external_id}' failed to set up target {id}: {source}")]
    ConnectorSetup
    {
        /// Virtual id that was being resolved
        id: TargetId,
        /// External identity the connector was registered under
        external_id: String,
        /// Failure reported by the connector
        #[source]
        source: ConnectorError,
    },

    /// No attachable target matches the requested name
    #[error("No attach target matches '{0}'")]
    TargetNotFound(String),

    /// More than one attachable target matches the requested name
    ///
    /// The caller is expected to let the user pick one of `candidates`.
    #[error("{} attach targets match '{name}'", candidates.len())]
    AmbiguousTarget
    {
        /// Requested name fragment
        name: String,
        /// Every matching target
        candidates: Vec<crate::types::AttachTarget>,
    },

    /// Discovery was started outside a Tokio runtime
    #[error("Discovery must be started from within a Tokio runtime")]
    NoRuntime,

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Failure reported by a [`Connector`](crate::registry::Connector) or a
/// [`DeviceSource`](crate::discovery::DeviceSource)
#[derive(Error, Debug)]
pub enum ConnectorError
{
    /// The transport is not available on this platform
    #[error("Not supported on this platform: {0}")]
    NotSupported(String),

    /// The transport exists but setting it up failed
    #[error("Connection setup failed: {0}")]
    SetupFailed(String),

    /// I/O error while talking to the transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DiscoveryError>`
///
/// ```rust
/// use scout_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DiscoveryError>;
