//! Attach target identifiers and discovery results.

use std::fmt;

/// Base of the deterministic debugger port used when a target does not
/// announce one.
pub const FALLBACK_DEBUGGER_PORT_BASE: u16 = 56000;

/// Numeric identifier of an attach target
///
/// Three id spaces share this one number:
///
/// - **OS process ids** for editor processes found on this machine
/// - **Instance guids** announced by network players
/// - **Virtual ids** handed out by the [`ConnectorRegistry`](crate::registry::ConnectorRegistry),
///   starting at [`VIRTUAL_ID_BASE`](crate::registry::VIRTUAL_ID_BASE)
///
/// The spaces are not checked against each other; the virtual base is chosen
/// high enough that realistic pids and guids do not reach it.
///
/// ## Example
///
/// ```rust
/// use scout_core::types::TargetId;
///
/// let id = TargetId::from(1234);
/// assert_eq!(id.fallback_debugger_port(56000), 56234);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u32);

impl TargetId
{
    /// Get the raw `u32` value.
    #[must_use]
    pub fn raw(&self) -> u32
    {
        self.0
    }

    /// Debugger port assumed for a target that did not announce one:
    /// `base + (id mod 1000)`.
    ///
    /// Ids that differ by a multiple of 1000 map to the same port.
    #[must_use]
    pub fn fallback_debugger_port(&self, base: u16) -> u16
    {
        // id % 1000 < 1000, so the cast is lossless
        base.saturating_add((self.0 % 1000) as u16)
    }
}

impl From<u32> for TargetId
{
    fn from(id: u32) -> Self
    {
        TargetId(id)
    }
}

impl From<TargetId> for u32
{
    fn from(id: TargetId) -> Self
    {
        id.0
    }
}

impl fmt::Display for TargetId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which source produced an [`AttachTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind
{
    /// Editor process running on this machine (id is an OS pid)
    Editor,
    /// Player announcing itself over multicast (id is its instance guid)
    Player,
    /// Device reachable through a registered connector (id is a virtual id)
    Device,
}

impl fmt::Display for TargetKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Self::Editor => "editor",
            Self::Player => "player",
            Self::Device => "device",
        };
        f.pad(name)
    }
}

/// A discovered target a debugger can attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget
{
    /// Identifier used to resolve the target later
    pub id: TargetId,
    /// Human-readable name shown to the user
    pub name: String,
    /// Project the target was built from, if it announced one
    pub project_name: Option<String>,
    /// Source the target came from
    pub kind: TargetKind,
}

impl AttachTarget
{
    /// Create a new attach target.
    #[must_use]
    pub fn new(id: impl Into<TargetId>, name: impl Into<String>, kind: TargetKind) -> Self
    {
        Self {
            id: id.into(),
            name: name.into(),
            project_name: None,
            kind,
        }
    }

    /// Attach a project name to the target.
    #[must_use]
    pub fn with_project_name(mut self, project_name: Option<String>) -> Self
    {
        self.project_name = project_name;
        self
    }
}

/// Source categories included in a target query
///
/// Device targets count as players: they are player builds reached over a
/// non-network transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection
{
    /// Only editor processes on this machine
    EditorsOnly,
    /// Only network players and connector-backed devices
    PlayersOnly,
    /// Everything
    #[default]
    All,
}

impl Selection
{
    /// Whether editor processes are part of the selection.
    #[must_use]
    pub fn includes_editors(self) -> bool
    {
        matches!(self, Self::EditorsOnly | Self::All)
    }

    /// Whether players and devices are part of the selection.
    #[must_use]
    pub fn includes_players(self) -> bool
    {
        matches!(self, Self::PlayersOnly | Self::All)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_fallback_port_wraps_every_thousand_ids()
    {
        assert_eq!(TargetId(0).fallback_debugger_port(FALLBACK_DEBUGGER_PORT_BASE), 56000);
        assert_eq!(TargetId(999).fallback_debugger_port(FALLBACK_DEBUGGER_PORT_BASE), 56999);
        assert_eq!(TargetId(1000).fallback_debugger_port(FALLBACK_DEBUGGER_PORT_BASE), 56000);
        assert_eq!(TargetId(1_000_042).fallback_debugger_port(FALLBACK_DEBUGGER_PORT_BASE), 56042);
    }

    #[test]
    fn test_selection_flags()
    {
        assert!(Selection::All.includes_editors());
        assert!(Selection::All.includes_players());
        assert!(Selection::EditorsOnly.includes_editors());
        assert!(!Selection::EditorsOnly.includes_players());
        assert!(!Selection::PlayersOnly.includes_editors());
        assert!(Selection::PlayersOnly.includes_players());
    }
}
