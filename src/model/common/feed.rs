use rocket::form::FromFormField;
use serde::{Deserialize, Serialize};

/// Which feed to compose.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Questions from followed authors and hashtags, eligibility-filtered.
    Default,
    /// The viewer's own activity: authored and answered questions.
    Own,
    /// Questions authored by a specific other user.
    Other,
}

/// Role filter for the own feed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum FeedRole {
    All,
    Author,
    Respondent,
}

/// Whitelisted sort fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    CreatedAt,
}

impl SortBy {
    /// The document field to sort on.
    pub fn field(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
        }
    }
}

/// Sort direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// The mongodb sort direction value.
    pub fn direction(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}
