//! Domain newtypes
//!
//! Strongly-typed wrappers for the integer identifiers used by the remote
//! service and for request correlation ids.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

// ============================================================================
// Integer identifiers
// ============================================================================

macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier as reported by the server
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

remote_id!(
    /// Identifier of a remote file
    FileId
);
remote_id!(
    /// Identifier of a remote folder. `-1` marks a listing without an id
    PathId
);
remote_id!(
    /// Identifier of a single stored version of a remote file
    VersionId
);
remote_id!(
    /// Identifier of a user account
    UserId
);

// ============================================================================
// ActionId
// ============================================================================

/// Correlation token pairing a request with its reply event
///
/// Sent as the `action_id` form field and echoed back by the server in the
/// reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Creates an action id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ActionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ActionId {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}
