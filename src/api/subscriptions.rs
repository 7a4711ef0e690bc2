use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        pagination::{Paginated, PaginationRequest},
        subscription::{SubscribeSpec, SubscriptionView, VisibilityView},
    },
    auth::AuthToken,
    db::{
        subscription::{
            favourite_hashtag_count, follow_relation, Subscription, SubscriptionKind,
            MAX_FAVOURITE_HASHTAGS,
        },
        user::User,
    },
    mongodb::{is_duplicate_key_error, Coll, Id},
};

use super::common::{is_admin, user_by_id};

pub fn routes() -> Vec<Route> {
    routes![
        subscribe,
        unsubscribe,
        set_favourite,
        list_subscriptions,
        results_visibility,
    ]
}

#[post("/subscriptions", data = "<spec>", format = "json")]
async fn subscribe(
    token: AuthToken,
    spec: Json<SubscribeSpec>,
    users: Coll<User>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<SubscriptionView>> {
    let spec = spec.0;
    if spec.kind == SubscriptionKind::User {
        if spec.target_id == token.id {
            return Err(Error::BadRequest("Cannot follow yourself".to_string()));
        }
        // The target must be a real user; hashtags are free-form.
        user_by_id(spec.target_id, &users).await?;
    }
    if spec.kind == SubscriptionKind::Hashtag && spec.favourite {
        let favourites = favourite_hashtag_count(&subscriptions, token.id).await?;
        if favourites >= MAX_FAVOURITE_HASHTAGS {
            return Err(Error::BadRequest(format!(
                "At most {MAX_FAVOURITE_HASHTAGS} favourite hashtags are allowed"
            )));
        }
    }

    let subscription = Subscription::new(token.id, spec.target_id, spec.kind, spec.favourite);
    // The unique (subscriber, target, kind) index catches re-follows.
    subscriptions
        .insert_one(&subscription, None)
        .await
        .map_err(|err| {
            if is_duplicate_key_error(&err) {
                Error::Conflict("Subscription already exists".to_string())
            } else {
                Error::Db(err)
            }
        })?;
    Ok(Json(subscription.into()))
}

#[delete("/subscriptions/<target_id>?<kind>")]
async fn unsubscribe(
    token: AuthToken,
    target_id: Id,
    kind: SubscriptionKind,
    subscriptions: Coll<Subscription>,
) -> Result<()> {
    let filter = doc! {
        "subscriber_id": token.id,
        "target_id": target_id,
        "kind": kind,
    };
    let deleted = subscriptions.delete_one(filter, None).await?;
    if deleted.deleted_count == 0 {
        return Err(Error::not_found(format!(
            "Subscription to '{target_id}'"
        )));
    }
    Ok(())
}

#[put("/subscriptions/<target_id>/favourite?<kind>&<favourite>")]
async fn set_favourite(
    token: AuthToken,
    target_id: Id,
    kind: SubscriptionKind,
    favourite: bool,
    subscriptions: Coll<Subscription>,
) -> Result<Json<SubscriptionView>> {
    if kind == SubscriptionKind::Hashtag && favourite {
        let favourites = favourite_hashtag_count(&subscriptions, token.id).await?;
        if favourites >= MAX_FAVOURITE_HASHTAGS {
            return Err(Error::BadRequest(format!(
                "At most {MAX_FAVOURITE_HASHTAGS} favourite hashtags are allowed"
            )));
        }
    }

    let filter = doc! {
        "subscriber_id": token.id,
        "target_id": target_id,
        "kind": kind,
    };
    let update = doc! { "$set": { "favourite": favourite } };
    subscriptions.update_one(filter.clone(), update, None).await?;
    let subscription = subscriptions
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Subscription to '{target_id}'")))?;
    Ok(Json(subscription.into()))
}

#[get("/users/<user_id>/subscriptions?<kind>&<pagination..>")]
async fn list_subscriptions(
    token: AuthToken,
    user_id: Id,
    kind: Option<SubscriptionKind>,
    pagination: PaginationRequest,
    subscriptions: Coll<Subscription>,
) -> Result<Json<Paginated<SubscriptionView>>> {
    if user_id != token.id && !is_admin(&token) {
        return Err(Error::PermissionDenied(
            "Cannot list another user's subscriptions".to_string(),
        ));
    }

    let mut filter = doc! { "subscriber_id": user_id };
    if let Some(kind) = kind {
        filter.insert("kind", kind);
    }
    let options = mongodb::options::FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(pagination.skip())
        .limit(pagination.page_size())
        .build();
    let page: Vec<Subscription> = subscriptions
        .find(filter.clone(), options)
        .await?
        .try_collect()
        .await?;
    let total = subscriptions.count_documents(filter, None).await?;

    let views = page.into_iter().map(Into::into).collect();
    Ok(Json(pagination.to_paginated(total, views)))
}

/// Would this viewer see the target's expired-question results?
#[get("/users/<user_id>/results-visibility")]
async fn results_visibility(
    token: AuthToken,
    user_id: Id,
    users: Coll<User>,
    subscriptions: Coll<Subscription>,
) -> Result<Json<VisibilityView>> {
    let target = user_by_id(user_id, &users).await?;
    let visible = if user_id == token.id {
        true
    } else {
        let relation = follow_relation(&subscriptions, token.id, user_id).await?;
        target.settings.show_question_results.permits(relation)
    };
    Ok(Json(VisibilityView { visible }))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, Value},
    };

    use crate::auth_cookie;
    use crate::model::db::user::User;

    use super::*;

    #[backend_test]
    async fn duplicate_subscription_conflicts(client: Client, users: Coll<User>) {
        let follower = User::example();
        let target = User::example2();
        users.insert_one(&follower, None).await.unwrap();
        users.insert_one(&target, None).await.unwrap();

        let body = serde_json::json!({
            "target_id": target.id.to_string(),
            "kind": "user",
        })
        .to_string();
        let response = client
            .post(uri!(subscribe))
            .cookie(auth_cookie(&client, &follower))
            .header(ContentType::JSON)
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .post(uri!(subscribe))
            .cookie(auth_cookie(&client, &follower))
            .header(ContentType::JSON)
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test]
    async fn favourite_hashtags_are_capped(
        client: Client,
        users: Coll<User>,
        subscriptions: Coll<Subscription>,
    ) {
        let follower = User::example();
        users.insert_one(&follower, None).await.unwrap();
        for _ in 0..MAX_FAVOURITE_HASHTAGS {
            let favourite =
                Subscription::new(follower.id, Id::new(), SubscriptionKind::Hashtag, true);
            subscriptions.insert_one(&favourite, None).await.unwrap();
        }

        let body = serde_json::json!({
            "target_id": Id::new().to_string(),
            "kind": "hashtag",
            "favourite": true,
        })
        .to_string();
        let response = client
            .post(uri!(subscribe))
            .cookie(auth_cookie(&client, &follower))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        // A non-favourite hashtag subscription is still fine.
        let body = serde_json::json!({
            "target_id": Id::new().to_string(),
            "kind": "hashtag",
        })
        .to_string();
        let response = client
            .post(uri!(subscribe))
            .cookie(auth_cookie(&client, &follower))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn results_visibility_follows_the_policy(client: Client, users: Coll<User>) {
        let viewer = User::example();
        // Default settings share results with connections only.
        let target = User::example2();
        users.insert_one(&viewer, None).await.unwrap();
        users.insert_one(&target, None).await.unwrap();

        let response = client
            .get(uri!(results_visibility(target.id)))
            .cookie(auth_cookie(&client, &viewer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let view: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(view["visible"], false);

        let body = serde_json::json!({
            "target_id": target.id.to_string(),
            "kind": "user",
        })
        .to_string();
        client
            .post(uri!(subscribe))
            .cookie(auth_cookie(&client, &viewer))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;

        let response = client
            .get(uri!(results_visibility(target.id)))
            .cookie(auth_cookie(&client, &viewer))
            .dispatch()
            .await;
        let view: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(view["visible"], true);
    }
}
