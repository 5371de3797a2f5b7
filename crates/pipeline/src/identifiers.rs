//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct
//! newtype so that, for example, a [`RunId`] can never be confused with a
//! free-form task string even though both are `String` under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or only whitespace.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Identifies one pipeline run.
    ///
    /// The run id is the key under which checkpoints are stored, so passing
    /// the same id to a second invocation resumes the earlier run.
    RunId
}

impl RunId {
    /// Generates a fresh run identifier of the form `run_<8 hex chars>`.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("run_{}", &simple[..8]))
    }

    /// Returns `true` if the identifier is safe to use as a file stem
    /// (ASCII alphanumerics, `-` and `_` only).
    pub fn is_path_safe(&self) -> bool {
        self.0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_run_ids() {
        assert!(RunId::new("").is_none());
        assert!(RunId::new("   ").is_none());
        assert_eq!(RunId::new("run_1").unwrap().as_str(), "run_1");
    }

    #[test]
    fn generated_ids_are_prefixed_and_path_safe() {
        let id = RunId::generate();
        assert!(id.as_str().starts_with("run_"));
        assert_eq!(id.as_str().len(), 12);
        assert!(id.is_path_safe());
        assert_ne!(id, RunId::generate());
    }

    #[test]
    fn path_safety_rejects_separators() {
        assert!(!RunId::new("../etc").unwrap().is_path_safe());
        assert!(!RunId::new("a/b").unwrap().is_path_safe());
    }
}
