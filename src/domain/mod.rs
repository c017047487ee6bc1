pub mod engagement;
pub mod feed;
pub mod post;
pub mod social_graph;
pub mod story;
pub mod tier;
pub mod user;
