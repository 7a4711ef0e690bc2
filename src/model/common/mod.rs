pub mod demographic;
pub mod feed;
pub mod visibility;
