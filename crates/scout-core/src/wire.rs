//! # Announcement Wire Format
//!
//! Players announce themselves with a short ASCII string of bracketed keys
//! followed by their values, optionally terminated by a single NUL byte:
//!
//! ```text
//! [IP]10.0.0.5[PORT]56000[FLAGS]0[GUID]123[EDITORID]456[VERSION]1[ID]MyGame[DEBUG]1[DEBUGGERPORT]56001[PROJECTNAME]Foo
//! ```
//!
//! ## Tokenizing
//!
//! `[` and `]` are both plain delimiters. Every non-empty run of characters
//! between two delimiters (or before the first / after the last one) is a
//! token. Tokens are then consumed as `(key, value)` pairs; keys are trimmed
//! and lower-cased, values are trimmed. A trailing unpaired token is ignored
//! and a repeated key keeps its last value.
//!
//! ## Keys
//!
//! | key            | required | type      |
//! |----------------|----------|-----------|
//! | `ip`           | yes      | IP address|
//! | `port`         | yes      | `u16`     |
//! | `flags`        | yes      | `u32`     |
//! | `guid`         | yes      | `u32`     |
//! | `editorid`     | yes      | `u32`     |
//! | `version`      | yes      | `i32`     |
//! | `id`           | yes      | string    |
//! | `debug`        | yes      | `i32`, `0` means debugging is disallowed |
//! | `debuggerport` | no       | `u16`     |
//! | `projectname`  | no       | string    |

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use smallvec::SmallVec;
use thiserror::Error;

/// Error parsing a player announcement
///
/// A failed parse never yields a partially filled record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError
{
    /// A required key is absent
    #[error("Missing required key '{0}'")]
    MissingKey(&'static str),

    /// The `ip` value is not an IP address
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// An integer field could not be parsed
    #[error("Invalid integer for '{key}': '{value}'")]
    InvalidInteger
    {
        /// Key whose value was rejected
        key: &'static str,
        /// Raw value as received
        value: String,
    },
}

/// One announced network player
///
/// This is a snapshot: it stays meaningful only while the announcement it was
/// parsed from is still available in the presence cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord
{
    /// Address and port the player announced
    pub endpoint: SocketAddr,
    /// Player capability flags, passed through untouched
    pub flags: u32,
    /// Instance guid, unique among live players
    pub guid: u32,
    /// Guid of the editor session that built the player
    pub editor_guid: u32,
    /// Announcement protocol version
    pub version: i32,
    /// Player identity, used as its display name
    pub id: String,
    /// Project the player was built from
    pub project_name: Option<String>,
    /// Whether the player accepts debugger connections
    pub allow_debugging: bool,
    /// Debugger port the player announced, `0` when it announced none
    pub debugger_port: u16,
}

impl PlayerRecord
{
    /// The announced debugger port, if the player sent a nonzero one.
    #[must_use]
    pub fn explicit_debugger_port(&self) -> Option<u16>
    {
        (self.debugger_port != 0).then_some(self.debugger_port)
    }

    /// Render the record in announcement form.
    ///
    /// Values containing `[` or `]`, or surrounded by whitespace, do not
    /// survive a round trip through [`parse_announcement`].
    #[must_use]
    pub fn to_announcement(&self) -> String
    {
        let mut out = format!(
            "[IP]{}[PORT]{}[FLAGS]{}[GUID]{}[EDITORID]{}[VERSION]{}[ID]{}[DEBUG]{}",
            self.endpoint.ip(),
            self.endpoint.port(),
            self.flags,
            self.guid,
            self.editor_guid,
            self.version,
            self.id,
            i32::from(self.allow_debugging),
        );
        if self.debugger_port != 0 {
            out.push_str(&format!("[DEBUGGERPORT]{}", self.debugger_port));
        }
        if let Some(project) = &self.project_name {
            out.push_str(&format!("[PROJECTNAME]{project}"));
        }
        out
    }
}

impl fmt::Display for PlayerRecord
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "PlayerInfo {} {} {} {} {} {} {}:{} {}",
            self.endpoint.ip(),
            self.endpoint.port(),
            self.flags,
            self.guid,
            self.editor_guid,
            self.version,
            self.id,
            self.debugger_port,
            i32::from(self.allow_debugging)
        )
    }
}

impl FromStr for PlayerRecord
{
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        parse_announcement(s)
    }
}

/// Split an announcement into its bracket-delimited tokens.
///
/// Empty runs are skipped, so `[a][b]` and `[a]b` both yield two tokens.
pub fn tokenize(announcement: &str) -> SmallVec<[&str; 24]>
{
    announcement
        .split(|c: char| c == '[' || c == ']')
        .filter(|part| !part.is_empty())
        .collect()
}

/// Group tokens into `(lower-cased key, value)` pairs.
///
/// Later occurrences of a key replace earlier ones.
pub fn key_values(announcement: &str) -> HashMap<String, &str>
{
    let tokens = tokenize(announcement);
    tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].trim().to_lowercase(), pair[1].trim()))
        .collect()
}

/// Parse a player announcement.
///
/// A single trailing NUL terminator is ignored.
///
/// ## Errors
///
/// - `MissingKey`: a required key is absent
/// - `InvalidAddress`: the `ip` value is not an IP address
/// - `InvalidInteger`: an integer field is not a base-10 number in range
///
/// ## Example
///
/// ```rust
/// use scout_core::wire::parse_announcement;
///
/// let record = parse_announcement(
///     "[IP]127.0.0.1[PORT]56000[FLAGS]0[GUID]42[EDITORID]7[VERSION]1[ID]Demo[DEBUG]1",
/// )?;
/// assert_eq!(record.guid, 42);
/// assert!(record.allow_debugging);
/// # Ok::<(), scout_core::wire::ParseError>(())
/// ```
pub fn parse_announcement(announcement: &str) -> Result<PlayerRecord, ParseError>
{
    let announcement = announcement.strip_suffix('\0').unwrap_or(announcement);
    let fields = key_values(announcement);

    let required = |key: &'static str| fields.get(key).copied().ok_or(ParseError::MissingKey(key));

    let ip = required("ip")?;
    let address = IpAddr::from_str(ip).map_err(|_| ParseError::InvalidAddress(ip.to_string()))?;
    let port: u16 = parse_int("port", required("port")?)?;
    let flags: u32 = parse_int("flags", required("flags")?)?;
    let guid: u32 = parse_int("guid", required("guid")?)?;
    let editor_guid: u32 = parse_int("editorid", required("editorid")?)?;
    let version: i32 = parse_int("version", required("version")?)?;
    let id = required("id")?.to_string();
    let debug: i32 = parse_int("debug", required("debug")?)?;

    let debugger_port: u16 = match fields.get("debuggerport") {
        Some(value) => parse_int("debuggerport", value)?,
        None => 0,
    };
    let project_name = fields.get("projectname").map(|value| (*value).to_string());

    Ok(PlayerRecord {
        endpoint: SocketAddr::new(address, port),
        flags,
        guid,
        editor_guid,
        version,
        id,
        project_name,
        allow_debugging: debug != 0,
        debugger_port,
    })
}

fn parse_int<T: FromStr>(key: &'static str, value: &str) -> Result<T, ParseError>
{
    value.parse().map_err(|_| ParseError::InvalidInteger {
        key,
        value: value.to_string(),
    })
}
