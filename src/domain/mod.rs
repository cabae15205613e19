pub mod engagement;
pub mod notification;
pub mod post;
pub mod topic;
pub mod user;
