use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson, Bson};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{common::visibility::FollowRelation, mongodb::{Coll, Id}};

/// Favourite hashtag subscriptions are capped per subscriber.
pub const MAX_FAVOURITE_HASHTAGS: u64 = 8;

/// What a subscription points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, rocket::form::FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    User,
    Hashtag,
}

impl From<SubscriptionKind> for Bson {
    fn from(kind: SubscriptionKind) -> Self {
        to_bson(&kind).expect("Serialisation is infallible")
    }
}

/// A follow edge, owned by its subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: Id,
    pub subscriber_id: Id,
    pub target_id: Id,
    pub kind: SubscriptionKind,
    pub favourite: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(subscriber_id: Id, target_id: Id, kind: SubscriptionKind, favourite: bool) -> Self {
        Self {
            id: Id::new(),
            subscriber_id,
            target_id,
            kind,
            favourite,
            created_at: Utc::now(),
        }
    }
}

/// Does `subscriber` follow the user `target`?
pub async fn is_following(
    subscriptions: &Coll<Subscription>,
    subscriber: Id,
    target: Id,
) -> Result<bool> {
    let filter = doc! {
        "subscriber_id": subscriber,
        "target_id": target,
        "kind": SubscriptionKind::User,
    };
    Ok(subscriptions.find_one(filter, None).await?.is_some())
}

/// Both directions of the follow relation between a viewer and an author,
/// as consumed by the visibility policy.
pub async fn follow_relation(
    subscriptions: &Coll<Subscription>,
    viewer: Id,
    author: Id,
) -> Result<FollowRelation> {
    Ok(FollowRelation {
        viewer_follows_author: is_following(subscriptions, viewer, author).await?,
        author_follows_viewer: is_following(subscriptions, author, viewer).await?,
    })
}

/// All targets of the given kind that `subscriber` follows.
pub async fn followed_targets(
    subscriptions: &Coll<Subscription>,
    subscriber: Id,
    kind: SubscriptionKind,
) -> Result<HashSet<Id>> {
    let filter = doc! {
        "subscriber_id": subscriber,
        "kind": kind,
    };
    let targets = subscriptions
        .find(filter, None)
        .await?
        .map_ok(|subscription| subscription.target_id)
        .try_collect()
        .await?;
    Ok(targets)
}

/// How many favourite hashtag subscriptions the subscriber currently has.
pub async fn favourite_hashtag_count(
    subscriptions: &Coll<Subscription>,
    subscriber: Id,
) -> Result<u64> {
    let filter = doc! {
        "subscriber_id": subscriber,
        "kind": SubscriptionKind::Hashtag,
        "favourite": true,
    };
    Ok(subscriptions.count_documents(filter, None).await?)
}
