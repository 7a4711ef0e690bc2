use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{answer::Answer, question::Question, subscription::Subscription, user::User};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}

const QUESTIONS: &str = "questions";
impl MongoCollection for Question {
    const NAME: &'static str = QUESTIONS;
}

const ANSWERS: &str = "answers";
impl MongoCollection for Answer {
    const NAME: &'static str = ANSWERS;
}

const SUBSCRIPTIONS: &str = "subscriptions";
impl MongoCollection for Subscription {
    const NAME: &'static str = SUBSCRIPTIONS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // User collection.
    let user_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<User>::from_db(db).create_index(user_index, None).await?;

    // Answer collection: the idempotency boundary for submissions.
    let answer_index = IndexModel::builder()
        .keys(doc! {"question_id": 1, "user_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Answer>::from_db(db)
        .create_index(answer_index, None)
        .await?;

    // Subscription collection: one edge per (subscriber, target, kind).
    let subscription_index = IndexModel::builder()
        .keys(doc! {"subscriber_id": 1, "target_id": 1, "kind": 1})
        .options(unique)
        .build();
    Coll::<Subscription>::from_db(db)
        .create_index(subscription_index, None)
        .await?;

    // Question collection: feed lookups by author.
    let question_author_index = IndexModel::builder()
        .keys(doc! {"author_id": 1})
        .build();
    Coll::<Question>::from_db(db)
        .create_index(question_author_index, None)
        .await?;

    Ok(())
}
