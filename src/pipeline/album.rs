//! Album assembler: groups items sharing a correlation id into one post.

use tracing::{debug, warn};

use super::types::{ChannelPair, Post, RawItem};

/// Most media a single grouped send can carry.
pub const MAX_ALBUM_ITEMS: usize = 10;

/// Collect the members of `group_id` from `items`.
pub fn members<'a>(items: &'a [RawItem], group_id: &str) -> Vec<&'a RawItem> {
    items
        .iter()
        .filter(|item| item.group_id.as_deref() == Some(group_id))
        .collect()
}

/// Build an album post from its members.
///
/// Members are ordered by ascending id and capped at [`MAX_ALBUM_ITEMS`].
/// The text comes from the first member only; an album without text
/// yields `None`. A group that turns out to hold a single item is
/// treated as a standalone post.
pub fn assemble(pair: &ChannelPair, mut members: Vec<&RawItem>) -> Option<Post> {
    members.sort_by_key(|item| item.id);
    members.dedup_by_key(|item| item.id);

    if members.len() > MAX_ALBUM_ITEMS {
        warn!(
            source = %pair.source,
            items = members.len(),
            max = MAX_ALBUM_ITEMS,
            "Album too large, truncating"
        );
        members.truncate(MAX_ALBUM_ITEMS);
    }

    let first = *members.first()?;
    let Some(text) = first.body() else {
        debug!(source = %pair.source, id = first.id, "Album skipped: no text");
        return None;
    };

    let mut post = Post::standalone(pair, first, text.to_string());
    if members.len() == 1 {
        return Some(post);
    }

    post.item_ids = members.iter().map(|item| item.id).collect();
    post.media = members
        .iter()
        .filter_map(|item| item.media.clone())
        .collect();
    Some(post)
}
