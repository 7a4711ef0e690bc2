use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mongodb::{
    bson::doc,
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    Client, ClientSession,
};
use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        answer::{AnswerSpec, AnswerView, AppendOptionsSpec},
        pagination::{Paginated, PaginationRequest},
    },
    auth::AuthToken,
    db::{answer::Answer, question::Question, user::User},
    mongodb::{is_duplicate_key_error, Coll, Id},
};

use super::common::{is_admin, question_by_id, user_by_token};

pub fn routes() -> Vec<Route> {
    routes![
        submit_answer,
        get_answer,
        list_answers,
        delete_answer,
        append_options,
    ]
}

/// Concurrent submissions to the same question conflict on the question
/// document; this bounds how often one request retries before giving up.
const MAX_TRANSACTION_RETRIES: u32 = 8;

#[post("/questions/<question_id>/answers", data = "<spec>", format = "json")]
async fn submit_answer(
    token: AuthToken,
    question_id: Id,
    spec: Json<AnswerSpec>,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<Json<AnswerView>> {
    let user = user_by_token(&token, &users).await?;
    let spec = spec.0;

    // Validate against a plain read first for a cheap, clean failure.
    // Everything is re-validated inside the transaction against the
    // session's snapshot before any write becomes visible.
    let question = question_by_id(question_id, &questions).await?;
    let already = answer_exists(&answers, question_id, user.id).await?;
    plan_submission(&question, already, &user, &spec, Utc::now())?;

    let mut session = db_client.start_session(None).await?;
    let mut retries = 0;
    let answer = 'txn: loop {
        session.start_transaction(None).await?;
        let outcome = write_submission(&mut session, &questions, &answers, question_id, &user, &spec)
            .await;
        let answer = match outcome {
            Ok(answer) => answer,
            Err(err) => {
                let _ = session.abort_transaction().await;
                match err {
                    Error::Db(db_err)
                        if db_err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                            && retries < MAX_TRANSACTION_RETRIES =>
                    {
                        // Lost the race for this question's tallies;
                        // retry against the fresh counters.
                        retries += 1;
                        continue 'txn;
                    }
                    Error::Db(db_err) => return Err(Error::Db(db_err)),
                    other => return Err(other),
                }
            }
        };
        loop {
            match session.commit_transaction().await {
                Ok(()) => break 'txn answer,
                Err(err) if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => continue,
                Err(err) if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && retries < MAX_TRANSACTION_RETRIES =>
                {
                    retries += 1;
                    continue 'txn;
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    Ok(Json(answer.into()))
}

#[get("/questions/<question_id>/answers/<answer_id>")]
async fn get_answer(
    token: AuthToken,
    question_id: Id,
    answer_id: Id,
    questions: Coll<Question>,
    answers: Coll<Answer>,
) -> Result<Json<AnswerView>> {
    let answer = answer_by_id(answer_id, question_id, &answers).await?;
    if answer.user_id != token.id && !is_admin(&token) {
        let question = question_by_id(question_id, &questions).await?;
        if question.author_id != token.id {
            return Err(Error::PermissionDenied(
                "Only the respondent, the question author or an admin may see this answer"
                    .to_string(),
            ));
        }
    }
    Ok(Json(answer.into()))
}

#[get("/questions/<question_id>/answers?<pagination..>")]
async fn list_answers(
    token: AuthToken,
    question_id: Id,
    pagination: PaginationRequest,
    questions: Coll<Question>,
    answers: Coll<Answer>,
) -> Result<Json<Paginated<AnswerView>>> {
    let question = question_by_id(question_id, &questions).await?;
    if question.author_id != token.id && !is_admin(&token) {
        return Err(Error::PermissionDenied(
            "Only the question author or an admin may list answers".to_string(),
        ));
    }

    let filter = doc! { "question_id": question_id };
    let options = mongodb::options::FindOptions::builder()
        .skip(pagination.skip())
        .limit(pagination.page_size())
        .build();
    let page: Vec<Answer> = {
        use rocket::futures::TryStreamExt;
        answers.find(filter.clone(), options).await?.try_collect().await?
    };
    let total = answers.count_documents(filter, None).await?;

    let views = page.into_iter().map(Into::into).collect();
    Ok(Json(pagination.to_paginated(total, views)))
}

#[delete("/questions/<question_id>/answers/<answer_id>")]
async fn delete_answer(
    token: AuthToken,
    question_id: Id,
    answer_id: Id,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<()> {
    let answer = answer_by_id(answer_id, question_id, &answers).await?;
    let question = question_by_id(question_id, &questions).await?;
    if answer.user_id != token.id && question.author_id != token.id && !is_admin(&token) {
        return Err(Error::PermissionDenied(
            "Only the respondent, the question author or an admin may delete this answer"
                .to_string(),
        ));
    }

    // Remove the answer (its option links go with it) and roll its
    // selections back out of the tallies in one transaction.
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;
    let deleted = answers
        .delete_one_with_session(answer_id.as_doc(), None, &mut session)
        .await?;
    if deleted.deleted_count == 1 {
        question.forget_answer(&answer.option_ids.iter().copied().collect());
        questions
            .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
            .await?;
    }
    session.commit_transaction().await?;
    Ok(())
}

#[post(
    "/questions/<question_id>/answers/<answer_id>/options",
    data = "<spec>",
    format = "json"
)]
async fn append_options(
    token: AuthToken,
    question_id: Id,
    answer_id: Id,
    spec: Json<AppendOptionsSpec>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<Json<AnswerView>> {
    let answer = answer_by_id(answer_id, question_id, &answers).await?;
    if answer.user_id != token.id && !is_admin(&token) {
        return Err(Error::PermissionDenied(
            "Cannot add options to another user's answer".to_string(),
        ));
    }
    let question = question_by_id(question_id, &questions).await?;

    let existing: HashSet<Id> = answer.option_ids.iter().copied().collect();
    let added = plan_appended_options(&question, &existing, &spec.options)?;
    if added.is_empty() {
        return Ok(Json(answer.into()));
    }

    // The tallies are updated here too: skipping the recompute would
    // break the conservation invariant between option counts and answer
    // links.
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;
    question.record_extra_selections(&added);
    let update = doc! { "$push": { "option_ids": { "$each": added.iter().copied().collect::<Vec<_>>() } } };
    answers
        .update_one_with_session(answer_id.as_doc(), update, None, &mut session)
        .await?;
    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
        .await?;
    session.commit_transaction().await?;

    let answer = answer_by_id(answer_id, question_id, &answers).await?;
    Ok(Json(answer.into()))
}

/// Fetch an answer, checking it belongs to the question in the path.
async fn answer_by_id(answer_id: Id, question_id: Id, answers: &Coll<Answer>) -> Result<Answer> {
    let answer = answers
        .find_one(answer_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Answer with ID '{answer_id}'")))?;
    if answer.question_id != question_id {
        return Err(Error::not_found(format!(
            "Answer with ID '{answer_id}' for question '{question_id}'"
        )));
    }
    Ok(answer)
}

async fn answer_exists(answers: &Coll<Answer>, question_id: Id, user_id: Id) -> Result<bool> {
    let filter = doc! { "question_id": question_id, "user_id": user_id };
    Ok(answers.find_one(filter, None).await?.is_some())
}

/// Steps 1-6 of the submission protocol plus the tally recompute, as a
/// pure function: returns the rewritten question and the full selection
/// set, or the first failure. No storage access, no side effects.
fn plan_submission(
    question: &Question,
    already_answered: bool,
    user: &User,
    spec: &AnswerSpec,
    now: DateTime<Utc>,
) -> Result<(Question, HashSet<Id>)> {
    // 1. Idempotency.
    if already_answered {
        return Err(Error::AlreadyAnswered(
            "Question already answered by user".to_string(),
        ));
    }

    // 2. Liveness.
    if question.is_expired(now) {
        return Err(Error::QuestionExpired(
            "This question has expired and is no longer accepting answers".to_string(),
        ));
    }

    // 3. Eligibility.
    question
        .filter
        .check(&user.profile(), now.date_naive())
        .map_err(|reason| Error::DemographicMismatch(reason.to_string()))?;

    let mut question = question.clone();

    // 4. User-created options.
    let mut new_option_ids = Vec::new();
    if !spec.new_options.is_empty() {
        if !question.allow_user_options {
            return Err(Error::CustomOptionsNotAllowed(
                "Question does not allow user-created options".to_string(),
            ));
        }
        for option in &spec.new_options {
            let id = question
                .add_option(option.text.clone(), user.id, option.position)
                .map_err(|conflict| {
                    Error::TooManyOptions(format!("Position conflict: {}", conflict.0))
                })?;
            new_option_ids.push(id);
        }
    }

    // 5. Selection size.
    let selected: HashSet<Id> = spec
        .options
        .iter()
        .copied()
        .chain(new_option_ids.iter().copied())
        .collect();
    if selected.is_empty() {
        return Err(Error::TooManyOptions(
            "At least one option must be selected".to_string(),
        ));
    }
    if selected.len() > question.max_options as usize {
        return Err(Error::TooManyOptions(format!(
            "Too many options, max = {}",
            question.max_options
        )));
    }

    // 6. Ownership of explicit selections.
    for option_id in &spec.options {
        if question.option(*option_id).is_none() {
            return Err(Error::OptionMismatch(format!("Wrong option: {option_id}")));
        }
    }

    // Tally recompute over the whole sibling option set.
    question.record_answer(&selected);
    Ok((question, selected))
}

/// Validate options appended to an existing answer: they must belong to
/// the question and the combined selection must stay within `max_options`.
/// Already-selected options are ignored. Returns the genuinely new IDs.
fn plan_appended_options(
    question: &Question,
    existing: &HashSet<Id>,
    requested: &[Id],
) -> Result<HashSet<Id>> {
    for option_id in requested {
        if question.option(*option_id).is_none() {
            return Err(Error::OptionMismatch(format!("Wrong option: {option_id}")));
        }
    }
    let added: HashSet<Id> = requested
        .iter()
        .copied()
        .filter(|id| !existing.contains(id))
        .collect();
    if existing.len() + added.len() > question.max_options as usize {
        return Err(Error::TooManyOptions(format!(
            "Too many options, max = {}",
            question.max_options
        )));
    }
    Ok(added)
}

/// The write phase of the submission protocol, inside an open transaction.
/// Re-validates everything against the session's snapshot, inserts the
/// answer, then rewrites the question document (tallies + total_answers).
async fn write_submission(
    session: &mut ClientSession,
    questions: &Coll<Question>,
    answers: &Coll<Answer>,
    question_id: Id,
    user: &User,
    spec: &AnswerSpec,
) -> Result<Answer> {
    let question = questions
        .find_one_with_session(question_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;

    let existing = answers
        .find_one_with_session(
            doc! { "question_id": question_id, "user_id": user.id },
            None,
            session,
        )
        .await?;
    let (question, selected) =
        plan_submission(&question, existing.is_some(), user, spec, Utc::now())?;

    // The unique (question_id, user_id) index backs up the pre-check: a
    // concurrent duplicate loses here and is reported as already-answered.
    let mut option_ids: Vec<Id> = selected.iter().copied().collect();
    option_ids.sort();
    let answer = Answer::new(question_id, user.id, option_ids);
    answers
        .insert_one_with_session(&answer, None, session)
        .await
        .map_err(|err| {
            if is_duplicate_key_error(&err) {
                Error::AlreadyAnswered("Question already answered by user".to_string())
            } else {
                Error::Db(err)
            }
        })?;

    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, session)
        .await?;

    Ok(answer)
}
