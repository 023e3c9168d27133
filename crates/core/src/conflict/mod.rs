//! Inbound conflict detection and resolution choices.
//!
//! 1. **Detection** -- matching repository files to sync records and
//!    classifying each unit ([`InboundDetector`]).
//! 2. **Resolution** -- the user's choice for a persisted conflict
//!    ([`Resolution`]), applied by [`crate::git_sync::GitSync::resolve_pending`].

pub mod detector;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use detector::{
    classify_removal, classify_update, InboundAction, InboundDetector, InboundPlan, IncomingFile,
    PlannedChange,
};

/// Named resolution strategies for a pending conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Take the repository version (or its deletion).
    AcceptIncoming,
    /// Keep the local version; it stays pending and is pushed on next commit.
    KeepLocal,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcceptIncoming => write!(f, "accept_incoming"),
            Self::KeepLocal => write!(f, "keep_local"),
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept_incoming" | "incoming" | "theirs" => Ok(Self::AcceptIncoming),
            "keep_local" | "local" | "ours" => Ok(Self::KeepLocal),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}
