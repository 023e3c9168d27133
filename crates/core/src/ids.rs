//! Strongly-typed identifiers.
//!
//! Every entity is keyed by its own UUID newtype so a content piece id can
//! never be passed where a workspace or variant id is expected.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

typed_id!(
    /// A workspace owning content and at most one Git sync configuration.
    WorkspaceId
);
typed_id!(
    /// A content piece (document).
    ContentPieceId
);
typed_id!(
    /// A content variant (alternate body of a piece, e.g. a translation).
    VariantId
);
typed_id!(
    /// A content group (folder-like container of pieces).
    ContentGroupId
);
typed_id!(
    /// An immutable document snapshot.
    SnapshotId
);
typed_id!(
    /// A persisted sync conflict.
    ConflictId
);

/// An addressable document: a content piece, optionally narrowed to a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentUnit {
    pub piece: ContentPieceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantId>,
}

impl ContentUnit {
    pub fn new(piece: ContentPieceId, variant: Option<VariantId>) -> Self {
        Self { piece, variant }
    }

    /// The base (non-variant) unit of a piece.
    pub fn piece(piece: ContentPieceId) -> Self {
        Self {
            piece,
            variant: None,
        }
    }

    /// Column value used for the variant part of composite keys.
    ///
    /// SQLite treats NULLs as distinct in primary keys, so the base unit is
    /// stored with an empty string instead.
    pub fn variant_key(&self) -> String {
        self.variant.map(|v| v.to_string()).unwrap_or_default()
    }

    /// Inverse of [`variant_key`](Self::variant_key).
    pub fn from_keys(piece: ContentPieceId, variant_key: &str) -> Result<Self, uuid::Error> {
        let variant = if variant_key.is_empty() {
            None
        } else {
            Some(variant_key.parse()?)
        };
        Ok(Self { piece, variant })
    }
}

impl fmt::Display for ContentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Some(variant) => write!(f, "{}:{}", self.piece, variant),
            None => write!(f, "{}", self.piece),
        }
    }
}

impl FromStr for ContentUnit {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((piece, variant)) => Self::from_keys(piece.parse()?, variant),
            None => Ok(Self::piece(s.parse()?)),
        }
    }
}
