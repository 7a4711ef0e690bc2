use std::collections::{HashMap, HashSet};

use chrono::Utc;
use mongodb::bson::{doc, Document};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    api::{
        pagination::{Paginated, PaginationRequest},
        question::QuestionView,
    },
    auth::AuthToken,
    common::{
        demographic::eligibility_clauses,
        feed::{FeedMode, FeedRole, SortBy, SortOrder},
    },
    db::{
        answer::Answer,
        question::Question,
        subscription::{follow_relation, followed_targets, Subscription, SubscriptionKind},
        user::User,
    },
    mongodb::{Coll, Id},
};
use crate::stats::statistics_for_questions;

use super::common::{user_by_id, user_by_token};

pub fn routes() -> Vec<Route> {
    routes![get_feed, unanswered_count]
}

/// Query parameters of the feed endpoint.
#[derive(Debug, Copy, Clone, FromForm)]
pub struct FeedRequest {
    #[field(default = FeedMode::Default)]
    pub mode: FeedMode,
    /// Whose questions to show in `other` mode.
    pub user_id: Option<Id>,
    /// Role filter, `own` mode only.
    #[field(default = FeedRole::All)]
    pub role: FeedRole,
    pub is_answered: Option<bool>,
    pub is_active: Option<bool>,
    #[field(default = SortBy::CreatedAt)]
    pub sort_by: SortBy,
    #[field(default = SortOrder::Desc)]
    pub sort_order: SortOrder,
    #[field(default = 50)]
    pub limit: u32,
    #[field(default = 0)]
    pub offset: u32,
}

impl FeedRequest {
    fn pagination(&self) -> PaginationRequest {
        PaginationRequest {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[get("/feed?<request..>")]
async fn get_feed(
    token: AuthToken,
    request: FeedRequest,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<Paginated<QuestionView>>> {
    let viewer = user_by_token(&token, &users).await?;
    let answered = answered_question_ids(&answers, viewer.id).await?;

    let mut clauses = match request.mode {
        FeedMode::Default => default_feed_clauses(&viewer, &subscriptions).await?,
        FeedMode::Own => own_feed_clauses(viewer.id, request.role, &answered),
        FeedMode::Other => {
            let target_id = request.user_id.ok_or_else(|| {
                Error::BadRequest("user_id is required for the other-user feed".to_string())
            })?;
            other_feed_clauses(&viewer, target_id, &users, &subscriptions).await?
        }
    };

    if let Some(is_answered) = request.is_answered {
        let ids: Vec<Id> = answered.iter().copied().collect();
        let operator = if is_answered { "$in" } else { "$nin" };
        clauses.push(doc! { "_id": { operator: ids } });
    }
    if let Some(is_active) = request.is_active {
        let operator = if is_active { "$gt" } else { "$lte" };
        clauses.push(doc! { "active_till": { operator: Utc::now() } });
    }

    let pagination = request.pagination();
    let filter = doc! { "$and": clauses };
    let options = mongodb::options::FindOptions::builder()
        .sort(doc! { request.sort_by.field(): request.sort_order.direction() })
        .skip(pagination.skip())
        .limit(pagination.page_size())
        .build();
    let page: Vec<Question> = questions
        .find(filter.clone(), options)
        .await?
        .try_collect()
        .await?;
    let total = questions.count_documents(filter, None).await?;

    let views = compose_views(page, &viewer, request, &users, &answers).await?;
    Ok(Json(pagination.to_paginated(total, views)))
}

/// How many active default-feed questions the viewer has not answered yet.
#[get("/feed/unanswered/count")]
async fn unanswered_count(
    token: AuthToken,
    users: Coll<User>,
    questions: Coll<Question>,
    answers: Coll<Answer>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<UnansweredCount>> {
    let viewer = user_by_token(&token, &users).await?;
    let answered: Vec<Id> = answered_question_ids(&answers, viewer.id)
        .await?
        .into_iter()
        .collect();

    let mut clauses = default_feed_clauses(&viewer, &subscriptions).await?;
    clauses.push(doc! { "_id": { "$nin": answered } });
    clauses.push(doc! { "active_till": { "$gt": Utc::now() } });

    let count = questions
        .count_documents(doc! { "$and": clauses }, None)
        .await?;
    Ok(Json(UnansweredCount { count }))
}

#[derive(Debug, Serialize)]
pub struct UnansweredCount {
    pub count: u64,
}

/// Default feed: questions by followed authors or carrying followed
/// hashtags, not the viewer's own, and matching the viewer's demography.
async fn default_feed_clauses(
    viewer: &User,
    subscriptions: &Coll<Subscription>,
) -> Result<Vec<Document>> {
    let followed_users: Vec<Id> = followed_targets(subscriptions, viewer.id, SubscriptionKind::User)
        .await?
        .into_iter()
        .collect();
    let followed_hashtags: Vec<Id> =
        followed_targets(subscriptions, viewer.id, SubscriptionKind::Hashtag)
            .await?
            .into_iter()
            .collect();

    let mut clauses = vec![
        doc! { "$or": [
            { "author_id": { "$in": followed_users } },
            { "hashtags": { "$in": followed_hashtags } },
        ]},
        doc! { "author_id": { "$ne": viewer.id } },
    ];
    clauses.extend(eligibility_clauses(&viewer.profile(), Utc::now().date_naive()));
    Ok(clauses)
}

/// Own feed: questions the viewer authored, answered, or both.
fn own_feed_clauses(viewer: Id, role: FeedRole, answered: &HashSet<Id>) -> Vec<Document> {
    let answered: Vec<Id> = answered.iter().copied().collect();
    let clause = match role {
        FeedRole::Author => doc! { "author_id": viewer },
        FeedRole::Respondent => doc! { "_id": { "$in": answered } },
        FeedRole::All => doc! { "$or": [
            { "author_id": viewer },
            { "_id": { "$in": answered } },
        ]},
    };
    vec![clause]
}

/// Other-user feed: the target's questions the viewer is eligible for.
/// Expired ones only appear if the target's visibility setting admits
/// this viewer.
async fn other_feed_clauses(
    viewer: &User,
    target_id: Id,
    users: &Coll<User>,
    subscriptions: &Coll<Subscription>,
) -> Result<Vec<Document>> {
    let target = user_by_id(target_id, users).await?;
    let mut clauses = vec![doc! { "author_id": target_id }];
    if viewer.id != target_id {
        clauses.extend(eligibility_clauses(&viewer.profile(), Utc::now().date_naive()));
        let relation = follow_relation(subscriptions, viewer.id, target_id).await?;
        if !target.settings.show_question_results.permits(relation) {
            clauses.push(doc! { "active_till": { "$gt": Utc::now() } });
        }
    }
    Ok(clauses)
}

/// Question IDs the user has answered.
async fn answered_question_ids(answers: &Coll<Answer>, user_id: Id) -> Result<HashSet<Id>> {
    let ids = answers
        .find(doc! { "user_id": user_id }, None)
        .await?
        .map_ok(|answer| answer.question_id)
        .try_collect()
        .await?;
    Ok(ids)
}

/// Project a page of questions into viewer-specific views: author
/// projection, the viewer's own selections, and respondent statistics on
/// the viewer's authored questions in the own feed.
async fn compose_views(
    page: Vec<Question>,
    viewer: &User,
    request: FeedRequest,
    users: &Coll<User>,
    answers: &Coll<Answer>,
) -> Result<Vec<QuestionView>> {
    if page.is_empty() {
        return Ok(vec![]);
    }

    let author_ids: Vec<Id> = page.iter().map(|question| question.author_id).collect();
    let authors: HashMap<Id, User> = users
        .find(doc! { "_id": { "$in": author_ids } }, None)
        .await?
        .map_ok(|user| (user.id, user))
        .try_collect()
        .await?;

    // One query for all of the viewer's answers on this page.
    let question_ids: Vec<Id> = page.iter().map(|question| question.id).collect();
    let selections: HashMap<Id, Vec<Id>> = answers
        .find(
            doc! { "question_id": { "$in": question_ids }, "user_id": viewer.id },
            None,
        )
        .await?
        .map_ok(|answer| (answer.question_id, answer.option_ids))
        .try_collect()
        .await?;

    let mut statistics = if request.mode == FeedMode::Own {
        let authored: Vec<Id> = page
            .iter()
            .filter(|question| question.author_id == viewer.id)
            .map(|question| question.id)
            .collect();
        statistics_for_questions(&authored, answers, users).await?
    } else {
        HashMap::new()
    };

    let mut views = Vec::with_capacity(page.len());
    for question in page {
        let author = authors
            .get(&question.author_id)
            .ok_or_else(|| Error::not_found(format!("User with ID '{}'", question.author_id)))?;
        let question_id = question.id;
        let authored = question.author_id == viewer.id;
        let selected = selections.get(&question_id).cloned();
        let mut view = QuestionView::new(question, author, viewer.id, selected);
        if request.mode == FeedMode::Own && authored {
            let (_, stats) = statistics.remove(&question_id).unwrap_or_default();
            view.statistics = Some(stats);
        }
        views.push(view);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::Status,
        local::asynchronous::Client,
        serde::json::{serde_json, Value},
    };

    use crate::auth_cookie;

    use super::*;

    async fn fetch_feed(client: &Client, viewer: &User, query: &str) -> Value {
        let response = client
            .get(format!("/feed?{query}"))
            .cookie(auth_cookie(client, viewer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test]
    async fn default_feed_follows_the_follow_graph(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        subscriptions: Coll<Subscription>,
    ) {
        let author = User::example();
        let viewer = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&viewer, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();

        // Nothing followed, nothing shown.
        let feed = fetch_feed(&client, &viewer, "mode=default").await;
        assert_eq!(feed["total"], 0);

        let follow = Subscription::new(viewer.id, author.id, SubscriptionKind::User, false);
        subscriptions.insert_one(&follow, None).await.unwrap();

        let feed = fetch_feed(&client, &viewer, "mode=default").await;
        assert_eq!(feed["total"], 1);
        assert_eq!(feed["items"][0]["id"], question.id.to_string());
        assert_eq!(feed["items"][0]["user_selected_options"], Value::Null);

        // The author never sees their own question in the default feed.
        let feed = fetch_feed(&client, &author, "mode=default").await;
        assert_eq!(feed["total"], 0);
    }

    #[backend_test]
    async fn default_feed_excludes_ineligible_questions(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        subscriptions: Coll<Subscription>,
    ) {
        use crate::model::common::demographic::{DemographicFilter, Gender};

        let author = User::example();
        let viewer = User::example2(); // female
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&viewer, None).await.unwrap();
        let follow = Subscription::new(viewer.id, author.id, SubscriptionKind::User, false);
        subscriptions.insert_one(&follow, None).await.unwrap();

        let mut men_only = Question::example(author.id);
        men_only.filter = DemographicFilter {
            genders: Some([Gender::Male].into()),
            ..Default::default()
        };
        questions.insert_one(&men_only, None).await.unwrap();
        let open = Question::example(author.id);
        questions.insert_one(&open, None).await.unwrap();

        let feed = fetch_feed(&client, &viewer, "mode=default").await;
        assert_eq!(feed["total"], 1);
        assert_eq!(feed["items"][0]["id"], open.id.to_string());
    }

    #[backend_test]
    async fn own_feed_covers_both_roles(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        answers: Coll<Answer>,
    ) {
        let viewer = User::example();
        let other = User::example2();
        users.insert_one(&viewer, None).await.unwrap();
        users.insert_one(&other, None).await.unwrap();

        let authored = Question::example(viewer.id);
        questions.insert_one(&authored, None).await.unwrap();
        let answered = Question::example(other.id);
        questions.insert_one(&answered, None).await.unwrap();
        let answer = Answer::new(answered.id, viewer.id, vec![answered.options[0].id]);
        answers.insert_one(&answer, None).await.unwrap();

        let feed = fetch_feed(&client, &viewer, "mode=own&role=author").await;
        assert_eq!(feed["total"], 1);
        assert_eq!(feed["items"][0]["id"], authored.id.to_string());
        // Authored questions in the own feed carry statistics.
        assert!(feed["items"][0]["statistics"].is_object());

        let feed = fetch_feed(&client, &viewer, "mode=own&role=respondent").await;
        assert_eq!(feed["total"], 1);
        assert_eq!(feed["items"][0]["id"], answered.id.to_string());
        assert_eq!(
            feed["items"][0]["user_selected_options"][0],
            answered.options[0].id.to_string()
        );

        let feed = fetch_feed(&client, &viewer, "mode=own&role=all").await;
        assert_eq!(feed["total"], 2);
    }

    #[backend_test]
    async fn other_feed_hides_expired_questions_from_non_connections(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        subscriptions: Coll<Subscription>,
    ) {
        use chrono::Duration;

        use crate::model::common::visibility::ResultVisibility;

        let mut target = User::example();
        target.settings.show_question_results = ResultVisibility::PeopleIFollow;
        let viewer = User::example2();
        users.insert_one(&target, None).await.unwrap();
        users.insert_one(&viewer, None).await.unwrap();
        // The viewer follows the target, but not the other way round, so
        // `PeopleIFollow` does not admit them.
        let follow = Subscription::new(viewer.id, target.id, SubscriptionKind::User, false);
        subscriptions.insert_one(&follow, None).await.unwrap();

        let active = Question::example(target.id);
        questions.insert_one(&active, None).await.unwrap();
        let mut expired = Question::example(target.id);
        expired.active_till = Utc::now() - Duration::days(1);
        questions.insert_one(&expired, None).await.unwrap();

        let query = format!("mode=other&user_id={}", target.id);
        let feed = fetch_feed(&client, &viewer, &query).await;
        assert_eq!(feed["total"], 1);
        assert_eq!(feed["items"][0]["id"], active.id.to_string());

        // The target sees all of their own questions.
        let feed = fetch_feed(&client, &target, &query).await;
        assert_eq!(feed["total"], 2);

        // Once the target follows back, the expired question appears.
        let follow_back = Subscription::new(target.id, viewer.id, SubscriptionKind::User, false);
        subscriptions.insert_one(&follow_back, None).await.unwrap();
        let feed = fetch_feed(&client, &viewer, &query).await;
        assert_eq!(feed["total"], 2);
    }

    #[backend_test]
    async fn unanswered_count_drops_after_answering(
        client: Client,
        users: Coll<User>,
        questions: Coll<Question>,
        answers: Coll<Answer>,
        subscriptions: Coll<Subscription>,
    ) {
        let author = User::example();
        let viewer = User::example2();
        users.insert_one(&author, None).await.unwrap();
        users.insert_one(&viewer, None).await.unwrap();
        let follow = Subscription::new(viewer.id, author.id, SubscriptionKind::User, false);
        subscriptions.insert_one(&follow, None).await.unwrap();
        let question = Question::example(author.id);
        questions.insert_one(&question, None).await.unwrap();

        let response = client
            .get(uri!(unanswered_count))
            .cookie(auth_cookie(&client, &viewer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let count: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(count["count"], 1);

        let answer = Answer::new(question.id, viewer.id, vec![question.options[0].id]);
        answers.insert_one(&answer, None).await.unwrap();

        let response = client
            .get(uri!(unanswered_count))
            .cookie(auth_cookie(&client, &viewer))
            .dispatch()
            .await;
        let count: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(count["count"], 0);
    }
}
