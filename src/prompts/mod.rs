//! Submission builders for the social service's AI comments and replies.

mod social;

pub use social::{comment_on_post, reply_to_comment};
