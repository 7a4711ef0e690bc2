//! Read-only demographic breakdowns over the answer store.
//!
//! This is the statistics collaborator consumed by the own feed and the
//! per-question statistics endpoint: question id in, respondent breakdown
//! out. Similarity/mutuality scoring does not live here.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use mongodb::bson::doc;
use rocket::futures::TryStreamExt;

use crate::error::Result;
use crate::model::{
    api::stats::{
        AgeBucketStats, GenderStats, GeoStats, OptionStatistics, QuestionStatistics, Statistics,
    },
    common::demographic::{age_on, Gender, Profile},
    db::{answer::Answer, user::User},
    mongodb::{Coll, Id},
};

/// Age buckets used for the breakdown; the last one is open-ended.
const AGE_BUCKETS: [(u32, u32); 7] = [
    (0, 17),
    (18, 24),
    (25, 34),
    (35, 44),
    (45, 54),
    (55, 64),
    (65, u32::MAX),
];

fn bucket_label(low: u32, high: u32) -> String {
    if high == u32::MAX {
        format!("{low}+")
    } else {
        format!("{low}-{high}")
    }
}

/// Bucket the given respondent profiles by age, gender and country.
/// Percentages are of the total number of respondents; empty buckets are
/// omitted.
pub fn breakdown(profiles: &[Profile], today: NaiveDate) -> Statistics {
    let total = profiles.len() as u64;
    if total == 0 {
        return Statistics::default();
    }
    let percentage = |count: u64| count as f64 * 100.0 / total as f64;

    let age = AGE_BUCKETS
        .iter()
        .filter_map(|&(low, high)| {
            let count = profiles
                .iter()
                .filter(|profile| {
                    let age = age_on(profile.birthday, today);
                    age >= low && age <= high
                })
                .count() as u64;
            (count > 0).then(|| AgeBucketStats {
                range: bucket_label(low, high),
                count,
                percentage: percentage(count),
            })
        })
        .collect();

    let gender = [Gender::Male, Gender::Female, Gender::Other]
        .into_iter()
        .filter_map(|gender| {
            let count = profiles
                .iter()
                .filter(|profile| profile.gender == gender)
                .count() as u64;
            (count > 0).then(|| GenderStats {
                gender,
                count,
                percentage: percentage(count),
            })
        })
        .collect();

    let mut by_country: HashMap<Id, u64> = HashMap::new();
    for profile in profiles {
        *by_country.entry(profile.country_id).or_default() += 1;
    }
    let mut geo: Vec<GeoStats> = by_country
        .into_iter()
        .map(|(country_id, count)| GeoStats {
            country_id: country_id.into(),
            count,
            percentage: percentage(count),
        })
        .collect();
    geo.sort_by(|a, b| b.count.cmp(&a.count).then(a.country_id.cmp(&b.country_id)));

    Statistics { age, gender, geo }
}

/// The demographic breakdown of one question's respondents.
pub async fn question_statistics(
    question_id: Id,
    answers: &Coll<Answer>,
    users: &Coll<User>,
) -> Result<QuestionStatistics> {
    let map = statistics_for_questions(&[question_id], answers, users).await?;
    let (total_respondents, statistics) = map.into_values().next().unwrap_or_default();
    Ok(QuestionStatistics {
        question_id: question_id.into(),
        total_respondents,
        statistics,
    })
}

/// The demographic breakdown of the respondents who selected one option.
pub async fn option_statistics(
    question_id: Id,
    option_id: Id,
    answers: &Coll<Answer>,
    users: &Coll<User>,
) -> Result<OptionStatistics> {
    let filter = doc! { "question_id": question_id, "option_ids": option_id };
    let selecting: Vec<Answer> = answers.find(filter, None).await?.try_collect().await?;
    let respondent_ids: Vec<Id> = selecting.iter().map(|answer| answer.user_id).collect();
    let profiles: Vec<Profile> = users
        .find(doc! { "_id": { "$in": respondent_ids } }, None)
        .await?
        .map_ok(|user| user.profile())
        .try_collect()
        .await?;
    Ok(OptionStatistics {
        option_id: option_id.into(),
        count: selecting.len() as u64,
        statistics: breakdown(&profiles, Utc::now().date_naive()),
    })
}

/// Breakdowns for several questions at once, fetching every respondent
/// profile in one query. Questions without answers are omitted.
pub async fn statistics_for_questions(
    question_ids: &[Id],
    answers: &Coll<Answer>,
    users: &Coll<User>,
) -> Result<HashMap<Id, (u64, Statistics)>> {
    if question_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let filter = doc! { "question_id": { "$in": question_ids.to_vec() } };
    let question_answers: Vec<Answer> = answers.find(filter, None).await?.try_collect().await?;
    if question_answers.is_empty() {
        return Ok(HashMap::new());
    }

    let respondent_ids: Vec<Id> = question_answers
        .iter()
        .map(|answer| answer.user_id)
        .collect();
    let respondent_filter = doc! { "_id": { "$in": respondent_ids } };
    let profiles: HashMap<Id, Profile> = users
        .find(respondent_filter, None)
        .await?
        .map_ok(|user| (user.id, user.profile()))
        .try_collect()
        .await?;

    let today = Utc::now().date_naive();
    let mut per_question: HashMap<Id, Vec<Profile>> = HashMap::new();
    for answer in &question_answers {
        if let Some(profile) = profiles.get(&answer.user_id) {
            per_question
                .entry(answer.question_id)
                .or_default()
                .push(profile.clone());
        }
    }

    Ok(per_question
        .into_iter()
        .map(|(question_id, profiles)| {
            let total = profiles.len() as u64;
            (question_id, (total, breakdown(&profiles, today)))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(gender: Gender, country_id: Id, birth_year: i32) -> Profile {
        Profile {
            gender,
            country_id,
            birthday: NaiveDate::from_ymd_opt(birth_year, 1, 1).unwrap(),
        }
    }

    #[test]
    fn empty_breakdown() {
        let stats = breakdown(&[], NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert!(stats.age.is_empty());
        assert!(stats.gender.is_empty());
        assert!(stats.geo.is_empty());
    }

    #[test]
    fn buckets_and_percentages() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let home = Id::new();
        let abroad = Id::new();
        let profiles = vec![
            profile(Gender::Female, home, 2006),   // 20 -> 18-24
            profile(Gender::Female, home, 1996),   // 30 -> 25-34
            profile(Gender::Male, abroad, 1956),   // 70 -> 65+
            profile(Gender::Female, home, 2005),   // 21 -> 18-24
        ];
        let stats = breakdown(&profiles, today);

        let young = stats.age.iter().find(|b| b.range == "18-24").unwrap();
        assert_eq!(young.count, 2);
        assert!((young.percentage - 50.0).abs() < 1e-9);
        assert!(stats.age.iter().any(|b| b.range == "65+"));

        let female = stats
            .gender
            .iter()
            .find(|g| g.gender == Gender::Female)
            .unwrap();
        assert_eq!(female.count, 3);
        assert!((female.percentage - 75.0).abs() < 1e-9);
        // No `Other` respondents, so no bucket for them.
        assert_eq!(stats.gender.len(), 2);

        // Countries sorted by descending count.
        assert_eq!(stats.geo[0].count, 3);
        assert_eq!(stats.geo[1].count, 1);
        let total: f64 = stats.geo.iter().map(|g| g.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }
}
