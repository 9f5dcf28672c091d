use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(Arc::from(id.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Opaque token identifying one run of the pipeline.
    OperationId
);

string_id!(
    /// Deterministic checkpoint scope shared by every run over the same plan.
    RunKey
);

string_id!(ChunkId);
string_id!(SchoolId);
string_id!(StudentId);

impl OperationId {
    pub fn generate() -> Self {
        Self::new(format!("op-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_operation_ids_are_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("op-"));
    }

    #[test]
    fn ids_display_their_inner_value() {
        let id = SchoolId::from("SCH-001");
        assert_eq!(id.to_string(), "SCH-001");
        assert_eq!(id.as_str(), "SCH-001");
    }
}
