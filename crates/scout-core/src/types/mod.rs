//! # Types
//!
//! Source-agnostic types shared by every discovery source.
//!
//! Editor processes, network players and connector-backed devices all end up
//! as an [`AttachTarget`] with a numeric [`TargetId`], so the rest of the
//! crate (and the front end) can treat them uniformly until the moment an id
//! is resolved into an [`AttachInfo`].

pub mod attach;
pub mod target;

// Re-export all public types
pub use attach::AttachInfo;
pub use target::{AttachTarget, Selection, TargetId, TargetKind};
