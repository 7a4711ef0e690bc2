use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{
    common::demographic::{AgeRange, DemographicFilter, Gender},
    db::question::{Question, QuestionOption},
    db::user::User,
    mongodb::Id,
};

use super::{stats::Statistics, user::AuthorView, ApiId};

/// A question as submitted by its author.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionSpec {
    pub text: String,
    pub max_options: u32,
    pub active_till: DateTime<Utc>,
    #[serde(default)]
    pub allow_user_options: bool,
    #[serde(default)]
    pub genders: Option<HashSet<Gender>>,
    #[serde(default)]
    pub countries: Option<HashSet<Id>>,
    #[serde(default)]
    pub age_range: Option<AgeRange>,
    #[serde(default)]
    pub hashtags: Vec<Id>,
    pub options: Vec<OptionSpec>,
}

/// An option as submitted: position is optional and allocated if missing.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionSpec {
    pub text: String,
    #[serde(default)]
    pub position: Option<u32>,
}

impl QuestionSpec {
    /// Build the stored question, validating the spec's invariants and
    /// allocating option positions.
    pub fn into_question(self, author_id: Id) -> Result<Question, Error> {
        if self.max_options == 0 {
            return Err(Error::BadRequest(
                "max_options must be positive".to_string(),
            ));
        }
        if self.options.is_empty() {
            return Err(Error::BadRequest(
                "A question needs at least one option".to_string(),
            ));
        }

        let mut question = Question {
            id: Id::new(),
            author_id,
            text: self.text,
            max_options: self.max_options,
            active_till: self.active_till,
            allow_user_options: self.allow_user_options,
            filter: DemographicFilter {
                genders: self.genders,
                countries: self.countries,
                age_range: self.age_range,
            },
            hashtags: self.hashtags,
            options: vec![],
            total_answers: 0,
            created_at: Utc::now(),
        };
        for option in self.options {
            question
                .add_option(option.text, author_id, option.position)
                .map_err(|conflict| {
                    Error::BadRequest(format!("Option position {} already taken", conflict.0))
                })?;
        }
        Ok(question)
    }
}

/// A partial update of a question; absent fields stay unchanged. The
/// demographic filter is immutable after creation, since existing answers
/// were validated against it.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionUpdateSpec {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub max_options: Option<u32>,
    #[serde(default)]
    pub active_till: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow_user_options: Option<bool>,
    #[serde(default)]
    pub hashtags: Option<Vec<Id>>,
}

impl QuestionUpdateSpec {
    pub fn apply(self, question: &mut Question) -> Result<(), Error> {
        if let Some(max_options) = self.max_options {
            if max_options == 0 {
                return Err(Error::BadRequest(
                    "max_options must be positive".to_string(),
                ));
            }
            question.max_options = max_options;
        }
        if let Some(text) = self.text {
            question.text = text;
        }
        if let Some(active_till) = self.active_till {
            question.active_till = active_till;
        }
        if let Some(allow_user_options) = self.allow_user_options {
            question.allow_user_options = allow_user_options;
        }
        if let Some(hashtags) = self.hashtags {
            question.hashtags = hashtags;
        }
        Ok(())
    }
}

/// A partial update of an option; absent fields stay unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionUpdateSpec {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// A question as shown to a viewer.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: ApiId,
    pub author: AuthorView,
    pub text: String,
    pub max_options: u32,
    pub active_till: DateTime<Utc>,
    pub allow_user_options: bool,
    pub genders: Option<HashSet<Gender>>,
    pub countries: Option<Vec<ApiId>>,
    pub age_range: Option<AgeRange>,
    pub hashtags: Vec<ApiId>,
    pub options: Vec<OptionView>,
    pub total_answers: u64,
    pub created_at: DateTime<Utc>,
    /// The option IDs the viewer selected, if they answered.
    pub user_selected_options: Option<Vec<ApiId>>,
    /// Only attached for the author's own questions in the own feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

impl QuestionView {
    pub fn new(
        question: Question,
        author: &User,
        viewer: Id,
        selected: Option<Vec<Id>>,
    ) -> Self {
        Self {
            id: question.id.into(),
            author: AuthorView::for_viewer(author, viewer),
            text: question.text,
            max_options: question.max_options,
            active_till: question.active_till,
            allow_user_options: question.allow_user_options,
            genders: question.filter.genders,
            countries: question
                .filter
                .countries
                .map(|countries| countries.into_iter().map(Into::into).collect()),
            age_range: question.filter.age_range,
            hashtags: question.hashtags.into_iter().map(Into::into).collect(),
            options: question.options.into_iter().map(Into::into).collect(),
            total_answers: question.total_answers,
            created_at: question.created_at,
            user_selected_options: selected
                .map(|options| options.into_iter().map(Into::into).collect()),
            statistics: None,
        }
    }
}

/// An option as shown to a viewer, tallies included.
#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: ApiId,
    pub text: String,
    pub position: u32,
    pub author_id: ApiId,
    pub by_question_author: bool,
    pub count: u64,
    pub percentage: f64,
}

impl From<QuestionOption> for OptionView {
    fn from(option: QuestionOption) -> Self {
        Self {
            id: option.id.into(),
            text: option.text,
            position: option.position,
            author_id: option.author_id.into(),
            by_question_author: option.by_question_author,
            count: option.count,
            percentage: option.percentage,
        }
    }
}

/// Outcome of the exposed eligibility evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EligibilityView {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
