//! Identifier types for the opsloom chat client.
//!
//! All identifiers are assigned by the remote service and are treated as
//! opaque strings. The only local validation is that they are non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wrap a server-assigned identifier.
            ///
            /// # Errors
            ///
            /// Returns `IdError::Empty` if the identifier is empty or whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdError::Empty);
                }
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Identifier of a chat session (one conversation).
    ///
    /// Absent until the service creates the session on the first message.
    SessionId
);

opaque_id!(
    /// Identifier of an assistant configured on the service.
    AssistantId
);

opaque_id!(
    /// Identifier of a stored message pair, used for feedback.
    MessageId
);

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty.
    #[error("identifier must not be empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrip() {
        let id = SessionId::new("s1").unwrap();
        let parsed = SessionId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.as_str(), "s1");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert_eq!(SessionId::new(""), Err(IdError::Empty));
        assert_eq!(AssistantId::from_str("   "), Err(IdError::Empty));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = MessageId::new("3f2a9c1e-0000-4000-8000-000000000001").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"3f2a9c1e-0000-4000-8000-000000000001\"");

        let parsed: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn empty_id_fails_deserialization() {
        let result = serde_json::from_str::<AssistantId>("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn debug_includes_type_name() {
        let id = AssistantId::new("a1").unwrap();
        assert_eq!(format!("{id:?}"), "AssistantId(a1)");
    }
}
