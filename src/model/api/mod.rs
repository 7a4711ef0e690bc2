mod id;

pub mod answer;
pub mod pagination;
pub mod question;
pub mod stats;
pub mod subscription;
pub mod user;

pub use id::ApiId;
