use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    db::subscription::{Subscription, SubscriptionKind},
    mongodb::Id,
};

use super::ApiId;

/// A follow edge the subscriber wishes to create.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeSpec {
    pub target_id: Id,
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub favourite: bool,
}

/// A follow edge as returned to its subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: ApiId,
    pub target_id: ApiId,
    pub kind: SubscriptionKind,
    pub favourite: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id.into(),
            target_id: subscription.target_id.into(),
            kind: subscription.kind,
            favourite: subscription.favourite,
            created_at: subscription.created_at,
        }
    }
}

/// Outcome of the exposed expired-result visibility check.
#[derive(Debug, Clone, Serialize)]
pub struct VisibilityView {
    pub visible: bool,
}
