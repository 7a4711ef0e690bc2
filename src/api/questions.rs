use chrono::Utc;
use mongodb::{bson::doc, Client};
use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        question::{
            EligibilityView, OptionSpec, OptionUpdateSpec, OptionView, QuestionSpec,
            QuestionUpdateSpec, QuestionView,
        },
        stats::{OptionStatistics, QuestionStatistics},
    },
    auth::AuthToken,
    db::{
        answer::Answer,
        question::Question,
        subscription::{follow_relation, Subscription},
        user::User,
    },
    mongodb::{Coll, Id},
};
use crate::stats;

use super::common::{is_admin, question_by_id, user_by_id, user_by_token};

pub fn routes() -> Vec<Route> {
    routes![
        create_question,
        get_question,
        update_question,
        delete_question,
        get_options,
        create_option,
        get_option,
        update_option,
        delete_option,
        get_statistics,
        get_option_statistics,
        get_eligibility,
    ]
}

#[post("/questions", data = "<spec>", format = "json")]
async fn create_question(
    token: AuthToken,
    spec: Json<QuestionSpec>,
    users: Coll<User>,
    questions: Coll<Question>,
) -> Result<Json<QuestionView>> {
    let author = user_by_token(&token, &users).await?;
    let question = spec.0.into_question(author.id)?;
    questions.insert_one(&question, None).await?;
    let viewer = author.id;
    Ok(Json(QuestionView::new(question, &author, viewer, None)))
}

#[get("/questions/<question_id>")]
async fn get_question(
    token: AuthToken,
    question_id: Id,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<QuestionView>> {
    let question = question_by_id(question_id, &questions).await?;
    let author = user_by_id(question.author_id, &users).await?;

    // Expired questions become results; whether a non-author may still see
    // them is the author's visibility setting's call.
    if question.is_expired(Utc::now()) && question.author_id != token.id && !is_admin(&token) {
        let relation = follow_relation(&subscriptions, token.id, question.author_id).await?;
        if !author.settings.show_question_results.permits(relation) {
            return Err(Error::PermissionDenied(
                "The author does not share this question's results with you".to_string(),
            ));
        }
    }

    let selected = own_selections(&answers, question_id, token.id).await?;
    Ok(Json(QuestionView::new(question, &author, token.id, selected)))
}

#[put("/questions/<question_id>", data = "<spec>", format = "json")]
async fn update_question(
    token: AuthToken,
    question_id: Id,
    spec: Json<QuestionUpdateSpec>,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<Json<QuestionView>> {
    // A read-modify-write of the question document, so it goes through a
    // transaction like the tally writes it races against.
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;

    if question.author_id != token.id && !is_admin(&token) {
        let _ = session.abort_transaction().await;
        return Err(Error::PermissionDenied(
            "Only the question author or an admin may edit a question".to_string(),
        ));
    }
    if let Err(err) = spec.0.apply(&mut question) {
        let _ = session.abort_transaction().await;
        return Err(err);
    }
    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
        .await?;
    session.commit_transaction().await?;

    let author = user_by_id(question.author_id, &users).await?;
    let selected = own_selections(&answers, question_id, token.id).await?;
    Ok(Json(QuestionView::new(question, &author, token.id, selected)))
}

#[delete("/questions/<question_id>")]
async fn delete_question(
    token: AuthToken,
    question_id: Id,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<()> {
    let question = question_by_id(question_id, &questions).await?;
    if question.author_id != token.id && !is_admin(&token) {
        return Err(Error::PermissionDenied(
            "Only the question author or an admin may delete a question".to_string(),
        ));
    }

    // The question's answers cannot outlive it.
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    answers
        .delete_many_with_session(doc! { "question_id": question_id }, None, &mut session)
        .await?;
    questions
        .delete_one_with_session(question_id.as_doc(), None, &mut session)
        .await?;
    session.commit_transaction().await?;
    Ok(())
}

#[get("/questions/<question_id>/options")]
async fn get_options(
    _token: AuthToken,
    question_id: Id,
    questions: Coll<Question>,
) -> Result<Json<Vec<OptionView>>> {
    let mut question = question_by_id(question_id, &questions).await?;
    question.options.sort_by_key(|option| option.position);
    Ok(Json(question.options.into_iter().map(Into::into).collect()))
}

#[post("/questions/<question_id>/options", data = "<spec>", format = "json")]
async fn create_option(
    token: AuthToken,
    question_id: Id,
    spec: Json<OptionSpec>,
    questions: Coll<Question>,
    db_client: &State<Client>,
) -> Result<Json<OptionView>> {
    // Adding an option rewrites the question document, so it goes through
    // a transaction like the tally writes it races against.
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;

    if question.is_expired(Utc::now()) {
        let _ = session.abort_transaction().await;
        return Err(Error::QuestionExpired(
            "Cannot add options to an expired question".to_string(),
        ));
    }
    if question.author_id != token.id && !question.allow_user_options && !is_admin(&token) {
        let _ = session.abort_transaction().await;
        return Err(Error::CustomOptionsNotAllowed(
            "Question does not allow user-created options".to_string(),
        ));
    }

    let spec = spec.0;
    let id = question
        .add_option(spec.text, token.id, spec.position)
        .map_err(|conflict| {
            Error::BadRequest(format!("Option position {} already taken", conflict.0))
        })?;
    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
        .await?;
    session.commit_transaction().await?;

    let option = question
        .option(id)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("Option with ID '{id}'")))?;
    Ok(Json(option.into()))
}

#[get("/questions/<question_id>/options/<option_id>")]
async fn get_option(
    _token: AuthToken,
    question_id: Id,
    option_id: Id,
    questions: Coll<Question>,
) -> Result<Json<OptionView>> {
    let question = question_by_id(question_id, &questions).await?;
    let option = question
        .option(option_id)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("Option with ID '{option_id}'")))?;
    Ok(Json(option.into()))
}

#[put(
    "/questions/<question_id>/options/<option_id>",
    data = "<spec>",
    format = "json"
)]
async fn update_option(
    token: AuthToken,
    question_id: Id,
    option_id: Id,
    spec: Json<OptionUpdateSpec>,
    questions: Coll<Question>,
    db_client: &State<Client>,
) -> Result<Json<OptionView>> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;
    let option_author = question
        .option(option_id)
        .map(|option| option.author_id)
        .ok_or_else(|| Error::not_found(format!("Option with ID '{option_id}'")))?;

    // Options freeze with the results once the question has expired.
    if question.is_expired(Utc::now()) {
        let _ = session.abort_transaction().await;
        return Err(Error::QuestionExpired(
            "Cannot edit options of an expired question".to_string(),
        ));
    }
    if question.author_id != token.id && option_author != token.id && !is_admin(&token) {
        let _ = session.abort_transaction().await;
        return Err(Error::PermissionDenied(
            "Only the question author, the option author or an admin may edit this option"
                .to_string(),
        ));
    }

    let spec = spec.0;
    if let Err(conflict) = question.update_option(option_id, spec.text, spec.position) {
        let _ = session.abort_transaction().await;
        return Err(Error::BadRequest(format!(
            "Option position {} already taken",
            conflict.0
        )));
    }
    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
        .await?;
    session.commit_transaction().await?;

    let option = question
        .option(option_id)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("Option with ID '{option_id}'")))?;
    Ok(Json(option.into()))
}

#[delete("/questions/<question_id>/options/<option_id>")]
async fn delete_option(
    token: AuthToken,
    question_id: Id,
    option_id: Id,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    db_client: &State<Client>,
) -> Result<()> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let mut question = questions
        .find_one_with_session(question_id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Question with ID '{question_id}'")))?;
    let option_author = question
        .option(option_id)
        .map(|option| option.author_id)
        .ok_or_else(|| Error::not_found(format!("Option with ID '{option_id}'")))?;

    if question.is_expired(Utc::now()) {
        let _ = session.abort_transaction().await;
        return Err(Error::QuestionExpired(
            "Cannot delete options of an expired question".to_string(),
        ));
    }
    if question.author_id != token.id && option_author != token.id && !is_admin(&token) {
        let _ = session.abort_transaction().await;
        return Err(Error::PermissionDenied(
            "Only the question author, the option author or an admin may delete this option"
                .to_string(),
        ));
    }
    if question.options.len() == 1 {
        let _ = session.abort_transaction().await;
        return Err(Error::BadRequest(
            "A question must keep at least one option".to_string(),
        ));
    }

    // The answers lose the selection along with the option; the remaining
    // percentages renormalise over the shrunken selection total.
    question.remove_option(option_id);
    answers
        .update_many_with_session(
            doc! { "question_id": question_id },
            doc! { "$pull": { "option_ids": option_id } },
            None,
            &mut session,
        )
        .await?;
    questions
        .replace_one_with_session(question_id.as_doc(), &question, None, &mut session)
        .await?;
    session.commit_transaction().await?;
    Ok(())
}

#[get("/questions/<question_id>/statistics")]
async fn get_statistics(
    token: AuthToken,
    question_id: Id,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<QuestionStatistics>> {
    let question = question_by_id(question_id, &questions).await?;
    ensure_results_visible(&token, &question, &users, &subscriptions).await?;
    let statistics = stats::question_statistics(question_id, &answers, &users).await?;
    Ok(Json(statistics))
}

#[get("/questions/<question_id>/options/<option_id>/statistics")]
async fn get_option_statistics(
    token: AuthToken,
    question_id: Id,
    option_id: Id,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<OptionStatistics>> {
    let question = question_by_id(question_id, &questions).await?;
    if question.option(option_id).is_none() {
        return Err(Error::not_found(format!("Option with ID '{option_id}'")));
    }
    ensure_results_visible(&token, &question, &users, &subscriptions).await?;
    let statistics = stats::option_statistics(question_id, option_id, &answers, &users).await?;
    Ok(Json(statistics))
}

/// Respondent breakdowns are the author's to see. Everyone else only gets
/// them once the question has run its course, and only if the author's
/// visibility setting lets them.
async fn ensure_results_visible(
    token: &AuthToken,
    question: &Question,
    users: &Coll<User>,
    subscriptions: &Coll<Subscription>,
) -> Result<()> {
    if question.author_id == token.id || is_admin(token) {
        return Ok(());
    }
    if !question.is_expired(Utc::now()) {
        return Err(Error::PermissionDenied(
            "Statistics of an active question are only visible to its author".to_string(),
        ));
    }
    let author = user_by_id(question.author_id, users).await?;
    let relation = follow_relation(subscriptions, token.id, question.author_id).await?;
    if !author.settings.show_question_results.permits(relation) {
        return Err(Error::PermissionDenied(
            "The author does not share this question's results with you".to_string(),
        ));
    }
    Ok(())
}

#[get("/questions/<question_id>/eligibility")]
async fn get_eligibility(
    token: AuthToken,
    question_id: Id,
    users: Coll<User>,
    questions: Coll<Question>,
) -> Result<Json<EligibilityView>> {
    let user = user_by_token(&token, &users).await?;
    let question = question_by_id(question_id, &questions).await?;
    let view = match question
        .filter
        .check(&user.profile(), Utc::now().date_naive())
    {
        Ok(()) => EligibilityView {
            eligible: true,
            reason: None,
        },
        Err(reason) => EligibilityView {
            eligible: false,
            reason: Some(reason.to_string()),
        },
    };
    Ok(Json(view))
}

/// The viewer's selected option IDs for a question, if they answered it.
pub async fn own_selections(
    answers: &Coll<Answer>,
    question_id: Id,
    viewer: Id,
) -> Result<Option<Vec<Id>>> {
    let filter = doc! { "question_id": question_id, "user_id": viewer };
    Ok(answers
        .find_one(filter, None)
        .await?
        .map(|answer| answer.option_ids))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, Value},
    };

    use crate::auth_cookie;
    use crate::model::common::demographic::{DemographicFilter, Gender};

    use super::*;

    #[backend_test]
    async fn create_and_fetch_question(client: Client, users: Coll<User>) {
        let author = User::example();
        users.insert_one(&author, None).await.unwrap();

        let body = serde_json::json!({
            "text": "Cats or dogs?",
            "max_options": 2,
            "active_till": (Utc::now() + Duration::days(7)).to_rfc3339(),
            "options": [{ "text": "Cats" }, { "text": "Dogs", "position": 5 }],
        })
        .to_string();
        let response = client
            .post(uri!(create_question))
            .cookie(auth_cookie(&client, &author))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let created: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(created["text"], "Cats or dogs?");
        assert_eq!(created["total_answers"], 0);
        // Explicit position honoured, implicit one allocated from 1.
        assert_eq!(created["options"][0]["position"], 1);
        assert_eq!(created["options"][1]["position"], 5);

        let id: Id = created["id"].as_str().unwrap().parse().unwrap();
        let response = client
            .get(uri!(get_question(id)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let fetched: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(fetched["id"], created["id"]);
        assert_eq!(fetched["author"]["username"], "ferris");
    }

    #[backend_test]
    async fn eligibility_reports_first_failing_dimension(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
    ) {
        let author = User::example();
        // example2 is female, so she passes the filter below.
        let eligible = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&eligible, None).await.unwrap();

        let mut question = Question::example(author.id);
        question.filter = DemographicFilter {
            genders: Some([Gender::Female].into()),
            ..Default::default()
        };
        questions.insert_one(&question, None).await.unwrap();

        let response = client
            .get(uri!(get_eligibility(question.id)))
            .cookie(auth_cookie(&client, &eligible))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let view: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(view["eligible"], true);

        // The author himself is male and fails the gender dimension.
        let response = client
            .get(uri!(get_eligibility(question.id)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let view: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(view["eligible"], false);
        assert_eq!(view["reason"], "User's gender does not match question's filter");
    }

    #[backend_test]
    async fn update_question_edits_only_given_fields(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
    ) {
        let author = User::example();
        let stranger = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&stranger, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();

        let body = serde_json::json!({
            "text": "Cats or dogs or birds?",
            "max_options": 3,
        })
        .to_string();
        let response = client
            .put(uri!(update_question(question.id)))
            .cookie(auth_cookie(&client, &author))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let updated: Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(updated["text"], "Cats or dogs or birds?");
        assert_eq!(updated["max_options"], 3);
        // Absent fields keep their values.
        assert_eq!(updated["allow_user_options"], false);
        assert_eq!(updated["options"].as_array().unwrap().len(), 2);

        // Only the author (or an admin) may edit.
        let response = client
            .put(uri!(update_question(question.id)))
            .cookie(auth_cookie(&client, &stranger))
            .header(ContentType::JSON)
            .body(serde_json::json!({ "text": "hijacked" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn option_updates_are_validated(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
    ) {
        let author = User::example();
        users.insert_one(&author, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();
        let cats = question.options[0].id;

        // Moving onto the sibling's position is rejected.
        let response = client
            .put(uri!(update_option(question.id, cats)))
            .cookie(auth_cookie(&client, &author))
            .header(ContentType::JSON)
            .body(serde_json::json!({ "position": 2 }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let response = client
            .put(uri!(update_option(question.id, cats)))
            .cookie(auth_cookie(&client, &author))
            .header(ContentType::JSON)
            .body(serde_json::json!({ "text": "Kittens", "position": 4 }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(get_option(question.id, cats)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let option: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(option["text"], "Kittens");
        assert_eq!(option["position"], 4);
    }

    #[backend_test]
    async fn delete_option_renormalises_tallies(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        answers: Coll<Answer>,
    ) {
        use std::collections::HashSet;

        let author = User::example();
        let respondent = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&respondent, None).await.unwrap();
        let mut question = Question::example(author.id);
        let cats = question.options[0].id;
        let dogs = question.options[1].id;
        question.record_answer(&HashSet::from([cats, dogs]));
        questions.insert_one(&question, None).await.unwrap();
        let answer = Answer::new(question.id, respondent.id, vec![cats, dogs]);
        answers.insert_one(&answer, None).await.unwrap();

        let response = client
            .delete(uri!(delete_option(question.id, cats)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let stored = questions
            .find_one(question.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.options.len(), 1);
        assert_eq!(stored.option(dogs).unwrap().percentage, 100.0);
        let stored_answer = answers
            .find_one(answer.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored_answer.option_ids, vec![dogs]);

        // The last option cannot go.
        let response = client
            .delete(uri!(delete_option(question.id, dogs)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn option_statistics_break_down_selectors(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        answers: Coll<Answer>,
    ) {
        let author = User::example();
        let respondent = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&respondent, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();
        let cats = question.options[0].id;
        let answer = Answer::new(question.id, respondent.id, vec![cats]);
        answers.insert_one(&answer, None).await.unwrap();

        let response = client
            .get(uri!(get_option_statistics(question.id, cats)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stats: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(stats["count"], 1);
        assert_eq!(stats["statistics"]["gender"].as_array().unwrap().len(), 1);

        // Respondents do not see breakdowns of an active question.
        let response = client
            .get(uri!(get_option_statistics(question.id, cats)))
            .cookie(auth_cookie(&client, &respondent))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn delete_question_cascades_answers(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        answers: Coll<Answer>,
    ) {
        let author = User::example();
        let respondent = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&respondent, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();
        let answer = crate::model::db::answer::Answer::new(
            question.id,
            respondent.id,
            vec![question.options[0].id],
        );
        answers.insert_one(&answer, None).await.unwrap();

        let response = client
            .delete(uri!(delete_question(question.id)))
            .cookie(auth_cookie(&client, &author))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        assert!(questions
            .find_one(question.id.as_doc(), None)
            .await
            .unwrap()
            .is_none());
        assert!(answers
            .find_one(doc! { "question_id": question.id }, None)
            .await
            .unwrap()
            .is_none());
    }
}
