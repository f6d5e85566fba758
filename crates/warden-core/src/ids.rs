//! Branded ID newtypes.
//!
//! IDs are UUID v7 (time-ordered) wrapped in a `String` newtype so a run ID
//! can never be passed where another identifier is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// Identifier of one execution of a session (a session key may host
    /// several runs over its lifetime).
    RunId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_new_is_uuid_v7() {
        let id = RunId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn run_id_serializes_transparently() {
        let id = RunId::from("run-1");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("run-1"));
        let back: RunId = serde_json::from_str("\"run-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn run_id_derefs_to_str() {
        let id = RunId::from("abc");
        assert_eq!(&*id, "abc");
        assert_eq!(id.to_string(), "abc");
    }
}
