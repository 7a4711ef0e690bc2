use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{common::demographic::DemographicFilter, mongodb::Id};

/// A question from the database, with its embedded options.
///
/// Options live inside the question document so that the tally engine can
/// rewrite the whole sibling set as a single document write: concurrent
/// submissions to the same question conflict and serialise, while
/// submissions to different questions stay fully parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: Id,
    pub author_id: Id,
    pub text: String,
    /// Maximum number of options one answer may select. Always positive.
    pub max_options: u32,
    pub active_till: DateTime<Utc>,
    pub allow_user_options: bool,
    /// Demographic audience restriction.
    #[serde(flatten)]
    pub filter: DemographicFilter,
    /// Hashtags attached to this question.
    #[serde(default)]
    pub hashtags: Vec<Id>,
    pub options: Vec<QuestionOption>,
    /// Denormalised count of answers, maintained by the tally engine.
    pub total_answers: u64,
    pub created_at: DateTime<Utc>,
}

/// An option of a question, with its denormalised tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: Id,
    pub text: String,
    /// Display position, unique within the question.
    pub position: u32,
    pub author_id: Id,
    pub by_question_author: bool,
    /// Number of answers that selected this option.
    pub count: u64,
    /// Share of all selections, in percent.
    pub percentage: f64,
}

/// An explicitly requested option position collides with an existing one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PositionConflict(pub u32);

impl Question {
    /// Has the question soft-expired? Derived, never stored.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.active_till
    }

    /// Look up an embedded option by ID.
    pub fn option(&self, id: Id) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == id)
    }

    /// The lowest unused position >= 1. Bounded: at most `options.len() + 1`
    /// probes, since `options.len()` positions can be taken.
    pub fn lowest_free_position(&self) -> u32 {
        let used: HashSet<u32> = self.options.iter().map(|option| option.position).collect();
        let mut position = 1;
        while used.contains(&position) {
            position += 1;
        }
        position
    }

    /// Append a new option, allocating a position if none was requested.
    /// Returns the new option's ID.
    pub fn add_option(
        &mut self,
        text: String,
        author_id: Id,
        position: Option<u32>,
    ) -> Result<Id, PositionConflict> {
        let position = match position {
            Some(position) => {
                if self.options.iter().any(|option| option.position == position) {
                    return Err(PositionConflict(position));
                }
                position
            }
            None => self.lowest_free_position(),
        };

        let id = Id::new();
        self.options.push(QuestionOption {
            id,
            text,
            position,
            author_id,
            by_question_author: author_id == self.author_id,
            count: 0,
            percentage: 0.0,
        });
        Ok(id)
    }

    /// Edit an option's text and/or position. A requested position must
    /// not collide with a sibling's.
    pub fn update_option(
        &mut self,
        id: Id,
        text: Option<String>,
        position: Option<u32>,
    ) -> Result<(), PositionConflict> {
        if let Some(position) = position {
            if self
                .options
                .iter()
                .any(|option| option.position == position && option.id != id)
            {
                return Err(PositionConflict(position));
            }
        }
        if let Some(option) = self.options.iter_mut().find(|option| option.id == id) {
            if let Some(text) = text {
                option.text = text;
            }
            if let Some(position) = position {
                option.position = position;
            }
        }
        Ok(())
    }

    /// Remove an option entirely, folding its votes out of the tallies:
    /// the remaining percentages are renormalised over the shrunken
    /// selection total. Returns whether the option was present.
    pub fn remove_option(&mut self, id: Id) -> bool {
        let before = self.options.len();
        self.options.retain(|option| option.id != id);
        let removed = self.options.len() < before;
        if removed {
            self.recompute_percentages();
        }
        removed
    }

    /// Record one new answer selecting the given options: bump
    /// `total_answers` and fold the selections into every option's
    /// count and percentage.
    pub fn record_answer(&mut self, selected: &HashSet<Id>) {
        self.total_answers += 1;
        self.apply_selections(selected);
    }

    /// Fold extra selections appended to an existing answer into the
    /// tallies, without counting a new answer.
    pub fn record_extra_selections(&mut self, added: &HashSet<Id>) {
        self.apply_selections(added);
    }

    /// Roll a deleted answer's selections back out of the tallies.
    pub fn forget_answer(&mut self, selected: &HashSet<Id>) {
        self.total_answers = self.total_answers.saturating_sub(1);
        for option in &mut self.options {
            if selected.contains(&option.id) {
                option.count = option.count.saturating_sub(1);
            }
        }
        self.recompute_percentages();
    }

    fn apply_selections(&mut self, selected: &HashSet<Id>) {
        for option in &mut self.options {
            if selected.contains(&option.id) {
                option.count += 1;
            }
        }
        self.recompute_percentages();
    }

    /// Recompute every option's percentage from the current counts.
    /// `new_percentage = new_count * 100 / total_selections`, zero when
    /// there are no selections at all.
    fn recompute_percentages(&mut self) {
        let total_selections: u64 = self.options.iter().map(|option| option.count).sum();
        for option in &mut self.options {
            option.percentage = if total_selections > 0 {
                option.count as f64 * 100.0 / total_selections as f64
            } else {
                0.0
            };
        }
    }
}
