use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use mongodb::bson::{doc, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::mongodb::Id;

/// Respondent gender, as stored on the user profile and in question filters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl From<Gender> for Bson {
    fn from(gender: Gender) -> Self {
        to_bson(&gender).expect("Serialisation is infallible")
    }
}

/// An inclusive age range; a missing bound only constrains the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl AgeRange {
    /// Does the given age (in whole years) fall within the range?
    pub fn contains(&self, age: u32) -> bool {
        self.min.map_or(true, |min| age >= min) && self.max.map_or(true, |max| age <= max)
    }
}

/// The demographic audience restriction of a question.
/// Each dimension is optional; a missing dimension is unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DemographicFilter {
    #[serde(default)]
    pub genders: Option<HashSet<Gender>>,
    #[serde(default)]
    pub countries: Option<HashSet<Id>>,
    #[serde(default)]
    pub age_range: Option<AgeRange>,
}

/// The demographic profile of a respondent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub gender: Gender,
    pub country_id: Id,
    pub birthday: NaiveDate,
}

/// The first dimension of a filter that a profile failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Ineligibility {
    #[error("User's gender does not match question's filter")]
    Gender,
    #[error("User's country does not match question's filter")]
    Country,
    #[error("User's age does not match question's filter")]
    Age,
}

/// Age in whole years on the given date, accounting for a birthday
/// not yet reached this year.
pub fn age_on(birthday: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - birthday.year();
    if (today.month(), today.day()) < (birthday.month(), birthday.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

impl DemographicFilter {
    /// Evaluate the profile against every restricted dimension.
    /// Dimensions are reported in gender, country, age priority.
    pub fn check(&self, profile: &Profile, today: NaiveDate) -> Result<(), Ineligibility> {
        if let Some(genders) = &self.genders {
            if !genders.contains(&profile.gender) {
                return Err(Ineligibility::Gender);
            }
        }
        if let Some(countries) = &self.countries {
            if !countries.contains(&profile.country_id) {
                return Err(Ineligibility::Country);
            }
        }
        if let Some(age_range) = &self.age_range {
            if !age_range.contains(age_on(profile.birthday, today)) {
                return Err(Ineligibility::Age);
            }
        }
        Ok(())
    }

    /// Boolean form of [`check`](Self::check).
    pub fn eligible(&self, profile: &Profile, today: NaiveDate) -> bool {
        self.check(profile, today).is_ok()
    }
}

/// BSON clauses equivalent to [`DemographicFilter::check`], for filtering
/// questions by the viewer's profile inside a feed query. One `$or` per
/// dimension: unrestricted, or the profile value is admitted.
pub fn eligibility_clauses(profile: &Profile, today: NaiveDate) -> Vec<Document> {
    let age = age_on(profile.birthday, today);
    vec![
        doc! { "$or": [
            { "genders": Bson::Null },
            { "genders": profile.gender },
        ]},
        doc! { "$or": [
            { "countries": Bson::Null },
            { "countries": profile.country_id },
        ]},
        doc! { "$or": [
            { "age_range": Bson::Null },
            { "$and": [
                { "$or": [{ "age_range.min": Bson::Null }, { "age_range.min": { "$lte": age } }] },
                { "$or": [{ "age_range.max": Bson::Null }, { "age_range.max": { "$gte": age } }] },
            ]},
        ]},
    ]
}
