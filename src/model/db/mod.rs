pub mod answer;
pub mod question;
pub mod subscription;
pub mod user;
