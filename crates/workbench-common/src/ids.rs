//! Identifier newtypes
//!
//! Strongly-typed wrappers for the identifiers flowing through the engine, so
//! an environment id can never be passed where a backend instance id is
//! expected.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            derive_more::Display,
            derive_more::Deref,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type! {
    /// Identity of an environment record, assigned by this system.
    EnvironmentId
}

id_type! {
    /// Owning project reference.
    ProjectId
}

id_type! {
    /// Environment type reference, used to select a backend implementation.
    EnvTypeId
}

id_type! {
    /// A delegated hosting account in which environment resources run.
    AccountId
}

id_type! {
    /// Backend-assigned instance identifier, the key inbound events carry.
    InstanceId
}
