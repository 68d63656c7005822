//! Moderator-facing text and controls.

use crate::channels::Controls;
use crate::pipeline::types::{ChatId, Post};

use super::model::DecisionAction;

/// Notice for a decision on a post that is no longer pending.
pub const STALE_NOTICE: &str = "❌ Post already processed or expired";

/// Prompt text describing a pending post.
pub fn prompt_text(post: &Post) -> String {
    let text = post.publish_text();
    let header = if post.is_album() {
        format!("📸 New ALBUM for publication ({} media)", post.item_count())
    } else {
        "📝 New post for publication".to_string()
    };

    let mut out = format!(
        "{header}\n\n\
         📢 Pair: {label}\n\
         📥 Source: {source}\n\
         📤 Target: {target}\n\
         🔗 Original: {link}\n\n\
         📝 Text:\n{text}\n\n\
         📏 Length: {len} chars",
        label = post.pair_label,
        source = post.source,
        target = post.target,
        link = post.original_link,
        len = text.chars().count(),
    );

    if post.regeneration_count > 0 {
        out.push_str(&format!("\n🔄 Regenerations: {}", post.regeneration_count));
    }
    out
}

/// Header of the separate control message sent after an album preview.
pub fn album_control_text(post: &Post) -> String {
    format!(
        "📸 Album controls ({} media)\n\n{}",
        post.item_count(),
        prompt_text(post)
    )
}

/// Approve / reject / regenerate buttons for a post token.
pub fn controls(post: &Post, token: &str) -> Controls {
    let (approve, reject, regenerate) = if post.is_album() {
        ("✅ Publish album", "❌ Reject album", "🔄 Regenerate album text")
    } else {
        ("✅ Publish", "❌ Reject", "🔄 Regenerate")
    };

    Controls::default()
        .row(vec![
            (approve.into(), DecisionAction::Approve.callback_data(token)),
            (reject.into(), DecisionAction::Reject.callback_data(token)),
        ])
        .row(vec![(
            regenerate.into(),
            DecisionAction::Regenerate.callback_data(token),
        )])
}

pub fn approved_status(post: &Post, target: &ChatId) -> String {
    if post.is_album() {
        format!(
            "✅ Album approved and sent to {target}\n📸 Media: {}",
            post.item_count()
        )
    } else {
        format!("✅ Post approved and sent to {target}")
    }
}

pub fn degraded_status(post: &Post, target: &ChatId, delivered: usize, skipped: usize) -> String {
    format!(
        "⚠️ {} sent to {target} in reduced form ({delivered} media delivered, {skipped} skipped)",
        if post.is_album() { "Album" } else { "Post" }
    )
}

pub fn rejected_status(post: &Post) -> String {
    if post.is_album() {
        "❌ Album rejected".to_string()
    } else {
        "❌ Post rejected".to_string()
    }
}

pub fn delivery_failed_status(target: &ChatId, reason: &str) -> String {
    format!("⚠️ Approved, but sending to {target} failed: {reason}")
}

pub fn regeneration_limit_notice(max: u32) -> String {
    format!("❌ Regeneration limit reached ({max}/{max})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ChannelPair, RawItem};

    fn post() -> Post {
        let pair = ChannelPair::new("-1001", "@dst").with_name("News");
        Post::standalone(&pair, &RawItem::text(7, "orig"), "orig".into()).with_rewrite("новый текст")
    }

    #[test]
    fn prompt_lists_pair_and_length() {
        let text = prompt_text(&post());
        assert!(text.starts_with("📝 New post for publication"));
        assert!(text.contains("📢 Pair: News"));
        assert!(text.contains("📤 Target: @dst"));
        assert!(text.contains("новый текст"));
        assert!(text.contains("📏 Length: 11 chars"));
        assert!(!text.contains("Regenerations"));
    }

    #[test]
    fn prompt_shows_album_count_and_regenerations() {
        let mut p = post();
        p.item_ids = vec![7, 8, 9];
        p.regeneration_count = 2;
        let text = prompt_text(&p);
        assert!(text.starts_with("📸 New ALBUM for publication (3 media)"));
        assert!(text.ends_with("🔄 Regenerations: 2"));
        assert!(album_control_text(&p).starts_with("📸 Album controls (3 media)"));
    }

    #[test]
    fn controls_carry_token() {
        let c = controls(&post(), "abc");
        assert_eq!(c.rows.len(), 2);
        assert_eq!(c.rows[0][0].data, "a:abc");
        assert_eq!(c.rows[0][1].data, "r:abc");
        assert_eq!(c.rows[1][0].data, "g:abc");
    }
}
