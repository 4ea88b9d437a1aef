//! Reading-time estimate for a post body.

use crate::domain::{posts::ContentBlock, rich_text};

pub const WORDS_PER_MINUTE: f64 = 200.0;

/// Estimate reading time in whole minutes, never less than one.
///
/// The running total is rounded after every block rather than once at the
/// end, so the same word count split differently across blocks may produce
/// different estimates. Published pages depend on this exact behavior.
pub fn estimate_minutes(content: &[ContentBlock]) -> u32 {
    let total = content.iter().fold(0.0_f64, |total, block| {
        let words = word_count(&rich_text::as_text(&block.body));
        (total + words as f64 / WORDS_PER_MINUTE).round()
    });

    // `total` is a non-negative whole number here.
    (total as u32).max(1)
}

/// Number of maximal runs of non-whitespace characters.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Label shown next to the clock icon on the detail page.
pub fn minutes_label(minutes: u32) -> String {
    if minutes <= 1 {
        "1 min".to_string()
    } else {
        format!("{minutes} mins")
    }
}
