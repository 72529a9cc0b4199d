// src/notify/format.rs
//! Telegram HTML message bodies.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::ingest::categories;
use crate::matcher::Hit;

/// Telegram rejects messages longer than this many characters.
pub const MESSAGE_LIMIT: usize = 4096;

/// One matched item. An overlong title is shortened before it is wrapped in markup,
/// so the message never ends inside a tag.
pub fn notification(hit: &Hit) -> String {
    let item = &hit.item;
    let keywords = hit
        .labels()
        .map(|l| format!("<code>{}</code>", encode_text(l)))
        .collect::<Vec<_>>()
        .join(" ");
    let head = format!("🔔 {keywords}\n<b>");

    let mut rest = String::from("</b>\n");
    let mut meta = Vec::new();
    if !item.category.is_empty() {
        meta.push(encode_text(categories::display_name(&item.category)).into_owned());
    }
    if !item.author.is_empty() {
        meta.push(encode_text(&item.author).into_owned());
    }
    if !meta.is_empty() {
        rest.push_str(&meta.join(" · "));
        rest.push('\n');
    }
    if !item.link.is_empty() {
        rest.push_str(&format!(
            "<a href=\"{}\">Open post</a>",
            encode_double_quoted_attribute(&item.link)
        ));
    }
    let rest = rest.trim_end();

    let budget = MESSAGE_LIMIT.saturating_sub(head.chars().count() + rest.chars().count());
    format!("{head}{}{rest}", escape_within(&item.title, budget))
}

/// HTML-escape `text`, cutting it (with a trailing `…`) so the escaped form stays
/// within `budget` characters. Entities are never split.
fn escape_within(text: &str, budget: usize) -> String {
    let full = encode_text(text);
    if full.chars().count() <= budget {
        return full.into_owned();
    }
    let room = budget.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let escaped = encode_text(c.encode_utf8(&mut buf));
        let n = escaped.chars().count();
        if used + n > room {
            break;
        }
        out.push_str(&escaped);
        used += n;
    }
    out.push('…');
    out
}

/// Digest of the hits above the per-cycle cap. `matched` is the cycle's total hit
/// count and `sent` how many went out individually. Lines that would push the message
/// past [`MESSAGE_LIMIT`] are replaced by an "… and N more" tail.
pub fn summary(overflow: &[Hit], matched: usize, sent: usize) -> String {
    let mut out = format!(
        "📦 <b>{matched} matches this round</b>\n{sent} sent individually, {} more below:\n",
        overflow.len()
    );
    for (i, hit) in overflow.iter().enumerate() {
        let line = summary_line(hit);
        let remaining_after = overflow.len() - i - 1;
        let tail_room = if remaining_after > 0 {
            tail(remaining_after).chars().count()
        } else {
            0
        };
        if out.chars().count() + line.chars().count() + tail_room > MESSAGE_LIMIT {
            out.push_str(&tail(overflow.len() - i));
            return out;
        }
        out.push_str(&line);
    }
    out.trim_end().to_string()
}

fn summary_line(hit: &Hit) -> String {
    let title = encode_text(&hit.item.title);
    let label = hit
        .labels()
        .map(|l| encode_text(l).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    if hit.item.link.is_empty() {
        format!("• {title} [{label}]\n")
    } else {
        format!(
            "• <a href=\"{}\">{title}</a> [{label}]\n",
            encode_double_quoted_attribute(&hit.item.link)
        )
    }
}

fn tail(n: usize) -> String {
    format!("… and {n} more")
}

/// Sent once when the feed has failed `failures` times in a row.
pub fn health_alert(failures: u32, source: &str, last_error: &str) -> String {
    format!(
        "⚠️ <b>Feed unreachable</b>\n{failures} consecutive fetch failures from {}.\nLast error: <code>{}</code>",
        encode_text(source),
        encode_text(&truncate_chars(last_error, 500)),
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
