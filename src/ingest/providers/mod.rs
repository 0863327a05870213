pub mod chat;
pub mod federated;
pub mod social;
pub mod syndication;
pub mod video;

use crate::ingest::types::{MediaAttachment, MediaKind};

/// Title for posts that carry attachments but no text.
pub(crate) fn media_placeholder(media: &[MediaAttachment]) -> &'static str {
    if media.iter().any(|m| m.kind == MediaKind::Video) {
        "[Video]"
    } else if !media.is_empty() && media.iter().all(|m| m.kind == MediaKind::Image) {
        "[Image]"
    } else {
        "[Media attachment]"
    }
}
