use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Privilege levels. Stored on the user record and claimed by tokens.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    User = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::User => "user",
                Self::Admin => "admin",
            }
        )
    }
}

impl From<Rights> for mongodb::bson::Bson {
    fn from(rights: Rights) -> Self {
        Self::Int32(rights as i32)
    }
}
