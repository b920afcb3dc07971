//! Shared types and constants for the Cove platform.
//!
//! This crate provides the foundational types used across all Cove crates.
//! No crate in the workspace depends on anything *except* `cove-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

/// Kinds of channel supported by the platform.
///
/// The kind determines both visibility and how strictly the moderation
/// pipeline gates content: public channels use a tighter block threshold,
/// while direct/private channels are never blocked or filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Open channel, discoverable by everyone on the server.
    Public,
    /// Invite-only channel.
    Private,
    /// Direct conversation between two users.
    Dm,
}

impl ChannelKind {
    /// Returns the string label for this kind, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Dm => "dm",
        }
    }

    /// Attempts to parse a stored label back into a `ChannelKind`.
    ///
    /// Returns `None` for unrecognized labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            "dm" => Some(Self::Dm),
            _ => None,
        }
    }
}

/// Default reputation score assigned to new users (midpoint of 0..=100).
pub const DEFAULT_REPUTATION: u8 = 50;

/// Maximum allowed length for message content, in bytes (64 KiB).
pub const MAX_MESSAGE_CONTENT_LEN: usize = 65_536;
