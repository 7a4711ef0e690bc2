use crate::error::{Error, Result};
use crate::model::{
    auth::{AuthToken, Rights},
    db::{question::Question, user::User},
    mongodb::{Coll, Id},
};

/// Resolve a token to its user record.
pub async fn user_by_token(token: &AuthToken, users: &Coll<User>) -> Result<User> {
    users
        .find_one(token.id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("User with ID '{}'", token.id)))
}

/// Fetch a user by ID.
pub async fn user_by_id(user_id: Id, users: &Coll<User>) -> Result<User> {
    users
        .find_one(user_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("User with ID '{user_id}'")))
}

/// Fetch a question by ID.
pub async fn question_by_id(question_id: Id, questions: &Coll<Question>) -> Result<Question> {
    questions
        .find_one(question_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))
}

/// Is this token an admin token?
pub fn is_admin(token: &AuthToken) -> bool {
    token.permits(Rights::Admin)
}
