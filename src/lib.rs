#[macro_use]
extern crate log;
#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod stats;

pub use config::Config;

/// Build the server: config, database and logging fairings plus every
/// API route mounted at the root.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(config::DatabaseFairing)
        .attach(logging::LoggerFairing)
}


#[cfg(test)]
pub use test_support::{auth_cookie, database, db_client, rocket_for_db};
