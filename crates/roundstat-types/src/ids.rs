//! Type-safe identifier wrappers.
//!
//! Participants are identified by the stable numeric id handed out by the
//! game server (a Steam-style 64-bit account id). Snapshots and batches use
//! UUID v7 (time-ordered) so rows written by the pipeline sort by creation
//! time in `PostgreSQL`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable numeric identity of a tracked participant.
///
/// The value `0` is reserved by the game server for bots without an account
/// and for "no player", so it is never a valid participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Return the raw numeric id.
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// Whether this id may be registered in a session store.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The id as a signed 64-bit integer for `BIGINT` columns.
    ///
    /// Account ids above `i64::MAX` are stored bit-for-bit (two's
    /// complement) so the mapping stays lossless and unique.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_db_key(self) -> i64 {
        self.0 as i64
    }
}

impl core::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Unique identifier of a captured snapshot.
    SnapshotId
}

define_id! {
    /// Unique identifier of a write batch, used to correlate worker logs.
    BatchId
}
