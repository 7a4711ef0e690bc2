use serde::Serialize;

use crate::model::{
    common::demographic::Gender,
    db::user::{ShowNameOption, User},
    mongodb::Id,
};

use super::ApiId;

/// The viewer-facing projection of a question's author.
///
/// Authors see themselves in full; for everyone else the display-name
/// preference decides whether the full name is retained, and birthday and
/// email are never included.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorView {
    pub id: ApiId,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    pub gender: Gender,
    pub country_id: ApiId,
}

impl AuthorView {
    pub fn for_viewer(author: &User, viewer: Id) -> Self {
        let show_full_name =
            author.id == viewer || author.settings.show_name_option == ShowNameOption::Name;
        Self {
            id: author.id.into(),
            username: author.username.clone(),
            name: show_full_name.then(|| author.name.clone()),
            surname: show_full_name.then(|| author.surname.clone()),
            gender: author.gender,
            country_id: author.country_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_record_is_unfiltered() {
        let mut author = User::example();
        author.settings.show_name_option = ShowNameOption::Username;
        let view = AuthorView::for_viewer(&author, author.id);
        assert_eq!(view.name.as_deref(), Some("Ferris"));
        assert_eq!(view.surname.as_deref(), Some("Crabb"));
    }

    #[test]
    fn username_preference_hides_full_name() {
        let mut author = User::example();
        author.settings.show_name_option = ShowNameOption::Username;
        let view = AuthorView::for_viewer(&author, Id::new());
        assert_eq!(view.username, "ferris");
        assert!(view.name.is_none());
        assert!(view.surname.is_none());
    }

    #[test]
    fn name_preference_keeps_full_name() {
        let author = User::example();
        let view = AuthorView::for_viewer(&author, Id::new());
        assert_eq!(view.name.as_deref(), Some("Ferris"));
        assert_eq!(view.surname.as_deref(), Some("Crabb"));
    }
}
