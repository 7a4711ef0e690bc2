use serde::Serialize;

use crate::model::common::demographic::Gender;

use super::ApiId;

/// Respondent count within one age bucket.
#[derive(Debug, Clone, Serialize)]
pub struct AgeBucketStats {
    pub range: String,
    pub count: u64,
    pub percentage: f64,
}

/// Respondent count for one gender.
#[derive(Debug, Clone, Serialize)]
pub struct GenderStats {
    pub gender: Gender,
    pub count: u64,
    pub percentage: f64,
}

/// Respondent count for one country.
#[derive(Debug, Clone, Serialize)]
pub struct GeoStats {
    pub country_id: ApiId,
    pub count: u64,
    pub percentage: f64,
}

/// Demographic breakdown of a question's respondents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub age: Vec<AgeBucketStats>,
    pub gender: Vec<GenderStats>,
    pub geo: Vec<GeoStats>,
}

/// The full statistics payload for one question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionStatistics {
    pub question_id: ApiId,
    pub total_respondents: u64,
    pub statistics: Statistics,
}

/// The statistics payload for one option: the demographic breakdown of
/// the respondents who selected it.
#[derive(Debug, Clone, Serialize)]
pub struct OptionStatistics {
    pub option_id: ApiId,
    pub count: u64,
    pub statistics: Statistics,
}

