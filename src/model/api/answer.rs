use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::answer::Answer, mongodb::Id};

use super::{question::OptionSpec, ApiId};

/// An answer that a respondent wishes to submit: existing option
/// selections plus any new options (if the question allows them).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerSpec {
    #[serde(default)]
    pub options: Vec<Id>,
    #[serde(default)]
    pub new_options: Vec<OptionSpec>,
}

/// Options to append to an existing answer.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendOptionsSpec {
    pub options: Vec<Id>,
}

/// An answer as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerView {
    pub id: ApiId,
    pub question_id: ApiId,
    pub user_id: ApiId,
    pub option_ids: Vec<ApiId>,
    pub created_at: DateTime<Utc>,
}

impl From<Answer> for AnswerView {
    fn from(answer: Answer) -> Self {
        Self {
            id: answer.id.into(),
            question_id: answer.question_id.into(),
            user_id: answer.user_id.into(),
            option_ids: answer.option_ids.into_iter().map(Into::into).collect(),
            created_at: answer.created_at,
        }
    }
}
