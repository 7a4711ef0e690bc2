use rocket::Route;

mod answers;
mod common;
mod feed;
mod questions;
mod subscriptions;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(questions::routes());
    routes.extend(answers::routes());
    routes.extend(feed::routes());
    routes.extend(subscriptions::routes());
    routes
}
