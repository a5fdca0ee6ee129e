//! # Discovery Configuration
//!
//! Every tunable of the discovery engine lives in [`DiscoveryConfig`]. The
//! defaults match what players on the network expect, so most hosts never
//! need a configuration file.
//!
//! ## Loading order
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit path if one is given, otherwise
//!    `$HOME/.config/scout/config.toml` when it exists
//! 3. Environment overrides:
//!    - `SCOUT_POLL_INTERVAL_MS`
//!    - `SCOUT_PLAYER_TTL`
//!    - `SCOUT_WAIT_ATTEMPTS`
//!    - `SCOUT_MULTICAST_GROUP`
//!
//! ## Example file
//!
//! ```toml
//! poll_interval_ms = 500
//! player_ttl = 4
//! editor_process_names = ["Unity", "Unity.exe"]
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Multicast group players announce on.
pub const PLAYER_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 0, 0, 222);

/// Ports players announce on. One socket is opened per port and interface.
pub const PLAYER_MULTICAST_PORTS: [u16; 4] = [54997, 34997, 57997, 58997];

/// Poll cycles an announcement stays available without being received again.
pub const DEFAULT_PLAYER_TTL: u32 = 3;

/// Error loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError
{
    /// The configuration file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read
    {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`DiscoveryConfig`]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Discovery engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig
{
    /// Multicast group players announce on
    pub multicast_group: Ipv4Addr,
    /// Announcement ports, joined on every interface
    pub ports: Vec<u16>,
    /// Poll cycles an announcement stays available (must be at least 1)
    pub player_ttl: u32,
    /// Maximum number of distinct announcements kept in the presence cache
    pub cache_capacity: usize,
    /// Interval of the background poll loop, in milliseconds
    pub poll_interval_ms: u64,
    /// Sleep between polls while waiting for a first player, in milliseconds
    pub wait_step_ms: u64,
    /// Number of polls made while waiting for a first player
    pub wait_attempts: u32,
    /// Base of the debugger port assumed when a target announces none
    pub fallback_port_base: u16,
    /// Process names recognised as editors (case-insensitive exact match)
    pub editor_process_names: Vec<String>,
}

impl Default for DiscoveryConfig
{
    fn default() -> Self
    {
        Self {
            multicast_group: PLAYER_MULTICAST_GROUP,
            ports: PLAYER_MULTICAST_PORTS.to_vec(),
            player_ttl: DEFAULT_PLAYER_TTL,
            cache_capacity: 256,
            poll_interval_ms: 1000,
            wait_step_ms: 250,
            wait_attempts: 12,
            fallback_port_base: crate::types::target::FALLBACK_DEBUGGER_PORT_BASE,
            editor_process_names: vec!["Unity".to_string(), "Unity.exe".to_string(), "Unity Editor".to_string()],
        }
    }
}

impl DiscoveryConfig
{
    /// Load the configuration: defaults, then a file, then the environment.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used only if present.
    ///
    /// ## Errors
    ///
    /// - `Read`: the file exists (or was requested) but cannot be read
    /// - `Parse`: the file is not valid TOML or contains unknown keys
    /// - `Invalid`: a value fails validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError>
    {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        let mut config = match file {
            Some(path) => {
                debug!(path = %path.display(), "loading discovery configuration");
                let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// ## Errors
    ///
    /// Returns `Parse` for malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError>
    {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SCOUT_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>)
    {
        override_with(&lookup, "SCOUT_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        override_with(&lookup, "SCOUT_PLAYER_TTL", &mut self.player_ttl);
        override_with(&lookup, "SCOUT_WAIT_ATTEMPTS", &mut self.wait_attempts);
        override_with(&lookup, "SCOUT_MULTICAST_GROUP", &mut self.multicast_group);
    }

    /// Check that every value is usable.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` describing the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        if self.ports.is_empty() {
            return Err(ConfigError::Invalid("at least one announcement port is required".to_string()));
        }
        if self.player_ttl == 0 || i32::try_from(self.player_ttl).is_err() {
            return Err(ConfigError::Invalid(format!("player_ttl {} is out of range", self.player_ttl)));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Interval of the background poll loop.
    #[must_use]
    pub fn poll_interval(&self) -> Duration
    {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Sleep between polls while waiting for a first player.
    #[must_use]
    pub fn wait_step(&self) -> Duration
    {
        Duration::from_millis(self.wait_step_ms)
    }
}

fn default_config_path() -> Option<PathBuf>
{
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/scout/config.toml"))
}

fn override_with<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}
