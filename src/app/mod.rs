pub mod auth;
pub mod engagement;
pub mod feed;
pub mod gallery;
pub mod media;
pub mod posts;
pub mod purchases;
pub mod social;
pub mod stories;
pub mod tiers;
pub mod users;
