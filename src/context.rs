//! Context assembly: an ordered [`ResultSet`] becomes one bounded text block
//! for the answer generator.
//!
//! Items are rendered in the order given, one paragraph each, tagged with
//! their 1-based position and record kind:
//!
//! ```text
//! [Match 1] Partita del 18/01/2026 ...
//!
//! [Standing 2] Classifica U16 Femminile ...
//! ```
//!
//! Output longer than the budget is cut at exactly `max_length` characters
//! and [`ELLIPSIS`] is appended. The cut may land mid-sentence.

use crate::models::{DocKind, ResultSet};

/// Appended after a truncated context.
pub const ELLIPSIS: &str = "...";

const SEPARATOR: &str = "\n\n";

fn tag(kind: Option<DocKind>) -> &'static str {
    match kind {
        Some(DocKind::Match) => "Match",
        Some(DocKind::Standing) => "Standing",
        None => "Document",
    }
}

/// Render `results` as tagged paragraphs, at most `max_length` characters
/// plus the ellipsis.
pub fn format_context(results: &ResultSet, max_length: usize) -> String {
    let context = results
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[{} {}] {}", tag(item.metadata.kind()), i + 1, item.document))
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    truncate_chars(context, max_length)
}

fn truncate_chars(mut text: String, max_length: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_length) {
        text.truncate(cut);
        text.push_str(ELLIPSIS);
    }
    text
}
