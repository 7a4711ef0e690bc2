use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{
    auth::Rights,
    common::{
        demographic::{Gender, Profile},
        visibility::ResultVisibility,
    },
    mongodb::Id,
};

/// How a user's name is shown to other users.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShowNameOption {
    Name,
    Username,
}

/// Per-user preferences relevant to question display.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub show_name_option: ShowNameOption,
    pub show_question_results: ResultVisibility,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            show_name_option: ShowNameOption::Name,
            show_question_results: ResultVisibility::AllConnections,
        }
    }
}

/// A user from the database.
/// Registration, login and profile editing happen elsewhere; this backend
/// only reads users as respondents, viewers and authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub gender: Gender,
    pub country_id: Id,
    pub birthday: NaiveDate,
    #[serde(default)]
    pub settings: UserSettings,
    pub is_verified: bool,
    pub is_active: bool,
    pub role: Rights,
}

impl User {
    /// The demographic projection used by the eligibility evaluator.
    pub fn profile(&self) -> Profile {
        Profile {
            gender: self.gender,
            country_id: self.country_id,
            birthday: self.birthday,
        }
    }
}

/// Example test data.
#[cfg(test)]
mod examples {
    use super::*;

    impl User {
        pub fn example() -> Self {
            Self {
                id: Id::new(),
                username: "ferris".to_string(),
                name: "Ferris".to_string(),
                surname: "Crabb".to_string(),
                email: "ferris@example.com".to_string(),
                gender: Gender::Male,
                country_id: Id::new(),
                birthday: NaiveDate::from_ymd_opt(1995, 6, 15).unwrap(),
                settings: UserSettings::default(),
                is_verified: true,
                is_active: true,
                role: Rights::User,
            }
        }

        pub fn example2() -> Self {
            Self {
                id: Id::new(),
                username: "corrode".to_string(),
                name: "Cora".to_string(),
                surname: "Rode".to_string(),
                email: "cora@example.com".to_string(),
                gender: Gender::Female,
                country_id: Id::new(),
                birthday: NaiveDate::from_ymd_opt(1988, 1, 30).unwrap(),
                settings: UserSettings::default(),
                is_verified: true,
                is_active: true,
                role: Rights::User,
            }
        }

        pub fn admin_example() -> Self {
            Self {
                username: "admin".to_string(),
                role: Rights::Admin,
                ..Self::example()
            }
        }
    }
}
