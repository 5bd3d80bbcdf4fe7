//! Identifiers minted by the host.
//!
//! Each id is a ULID rendered behind a short type prefix (`skc_...`). Ids
//! received from channels are arbitrary strings and are not modelled here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string is not an id of the expected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The id type that was expected.
    pub id_type: &'static str,
    /// Why the string was rejected.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let error = |reason: String| ParseIdError {
                    id_type: stringify!($name),
                    reason,
                };
                let body = s
                    .strip_prefix(concat!($prefix, "_"))
                    .ok_or_else(|| error(format!("missing `{}_` prefix", $prefix)))?;
                Ulid::from_str(body)
                    .map(Self)
                    .map_err(|e| error(e.to_string()))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

define_id!(
    /// Opaque identifier a skill uses to address a host conversation.
    ///
    /// Minted on first delegation of a host conversation to a skill and
    /// resolved back to the host's conversation reference on callback.
    SkillConversationId,
    "skc"
);

define_id!(
    /// Identifier minted by the host for activities it sends or acknowledges.
    ActivityId,
    "act"
);
