use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Who may see the results of an author's expired questions.
/// Active questions are always visible to eligible viewers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultVisibility {
    Nobody,
    #[serde(rename = "People I Follow")]
    PeopleIFollow,
    #[serde(rename = "People Following Me")]
    PeopleFollowingMe,
    #[serde(rename = "All Connections")]
    AllConnections,
    All,
}

impl From<ResultVisibility> for Bson {
    fn from(visibility: ResultVisibility) -> Self {
        to_bson(&visibility).expect("Serialisation is infallible")
    }
}

/// The follow-graph relation between a viewer and an author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FollowRelation {
    pub viewer_follows_author: bool,
    pub author_follows_viewer: bool,
}

impl ResultVisibility {
    /// Does this setting permit a viewer with the given relation to the
    /// author to see expired-question results?
    pub fn permits(self, relation: FollowRelation) -> bool {
        match self {
            Self::All => true,
            Self::Nobody => false,
            Self::PeopleIFollow => relation.author_follows_viewer,
            Self::PeopleFollowingMe => relation.viewer_follows_author,
            Self::AllConnections => {
                relation.viewer_follows_author || relation.author_follows_viewer
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELATIONS: [FollowRelation; 4] = [
        FollowRelation {
            viewer_follows_author: false,
            author_follows_viewer: false,
        },
        FollowRelation {
            viewer_follows_author: true,
            author_follows_viewer: false,
        },
        FollowRelation {
            viewer_follows_author: false,
            author_follows_viewer: true,
        },
        FollowRelation {
            viewer_follows_author: true,
            author_follows_viewer: true,
        },
    ];

    #[test]
    fn full_policy_table() {
        // (setting, expected outcome per relation in RELATIONS order)
        let table = [
            (ResultVisibility::Nobody, [false, false, false, false]),
            (ResultVisibility::PeopleIFollow, [false, false, true, true]),
            (ResultVisibility::PeopleFollowingMe, [false, true, false, true]),
            (ResultVisibility::AllConnections, [false, true, true, true]),
            (ResultVisibility::All, [true, true, true, true]),
        ];
        for (setting, expected) in table {
            for (relation, want) in RELATIONS.iter().zip(expected) {
                assert_eq!(
                    setting.permits(*relation),
                    want,
                    "{setting:?} with {relation:?}"
                );
            }
        }
    }

    #[test]
    fn nobody_never_all_always() {
        for relation in RELATIONS {
            assert!(!ResultVisibility::Nobody.permits(relation));
            assert!(ResultVisibility::All.permits(relation));
        }
    }
}
