use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A user's answer to a question, with the selected option links.
///
/// The option links are created atomically with the answer and only ever
/// deleted with it; the unique `(question_id, user_id)` index makes the
/// answer the idempotency boundary for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(rename = "_id")]
    pub id: Id,
    pub question_id: Id,
    pub user_id: Id,
    pub option_ids: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

impl Answer {
    pub fn new(question_id: Id, user_id: Id, option_ids: Vec<Id>) -> Self {
        Self {
            id: Id::new(),
            question_id,
            user_id,
            option_ids,
            created_at: Utc::now(),
        }
    }
}
