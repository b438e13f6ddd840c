use serde_json::json;

use crate::job::JobPayload;

const POST_HEADER: &str = "POST DESCRIPTION ::";
const REPLY_TO_HEADER: &str = "COMMENT FOR WHICH YOU NEED TO FORM A REPLY ::";
const CONTEXT_HEADER: &str = "SOME CONTEXT FOR YOUR INFO ::";
const RECENT_HEADER: &str = "- SOME RECENT COMMENTS ::";

/// Asks for a comment on a freshly created post. The result is routed
/// back by `postId`.
pub fn comment_on_post(
    instructions: &str,
    post_description: &str,
    images: &[String],
    post_id: &str,
) -> JobPayload {
    let text = format!(
        "{instructions}\n\n{POST_HEADER}\n{post_description}\n",
        instructions = instructions.trim(),
    );
    JobPayload::new(text, images.to_vec(), json!({ "postId": post_id }))
}

/// Asks for a reply to `comment`, with the post and the latest comments
/// under it as context. The result is routed back by `commentId`.
pub fn reply_to_comment(
    instructions: &str,
    comment: &str,
    post_description: &str,
    recent_comments: &[String],
    images: &[String],
    comment_id: &str,
) -> JobPayload {
    let recent = recent_comments.join("\n\n");
    let text = format!(
        "{instructions}\n\n\
         {REPLY_TO_HEADER}\n{comment}\n\n\
         {CONTEXT_HEADER}\n\n\
         - {POST_HEADER}\n{post_description}\n\n\
         {RECENT_HEADER}\n{recent}\n",
        instructions = instructions.trim(),
    );
    JobPayload::new(text, images.to_vec(), json!({ "commentId": comment_id }))
}
