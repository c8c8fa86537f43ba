//! Newtype identifiers threaded through the request envelope (`spec.md` §6).
//!
//! Kept as thin wrappers over `String`/`u64` rather than raw primitives so the
//! compiler catches a `ConnHash` passed where a `SessionUuid` was expected —
//! the kind of mixup that is easy to make once both are "just strings" on the
//! wire.

use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(SessionUuid);
string_id!(ClientUuid);
string_id!(ConnHash);

impl SessionUuid {
    /// Generates a fresh random session identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
