//! Typed identifiers for records owned by the marking service

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(value: &str) -> Option<Self> {
                Uuid::parse_str(value).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

record_id!(StudentId);
record_id!(AssessmentId);
record_id!(QuestionId);
record_id!(QueryId);
record_id!(
    /// Stored answer-sheet PDF
    FileId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_uuid() {
        let id = StudentId::parse("7f1c1f3e-8d0a-4c5e-9a44-2b6f0c1d2e3f").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"7f1c1f3e-8d0a-4c5e-9a44-2b6f0c1d2e3f\"");
        assert_eq!(id.to_string(), "7f1c1f3e-8d0a-4c5e-9a44-2b6f0c1d2e3f");
        assert!(QuestionId::parse("not-a-uuid").is_none());
    }
}
