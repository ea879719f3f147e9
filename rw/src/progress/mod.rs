//! Progress summarization for evicted history
//!
//! Each iteration starts from a fresh model context, so whatever the model should know
//! about earlier iterations has to be rendered from carried state. Recent transcripts are
//! kept verbatim; older ones are folded into a bounded summary by a `SummaryPolicy`, with
//! `TruncatingSummary` as the default.

mod truncating;

pub use truncating::TruncatingSummary;

use crate::state::HistoryEntry;

/// Strategy for folding evicted history into the running progress summary
///
/// Implementations must be deterministic: the same summary and entries always fold to the
/// same text, so a run split across restart segments ends with the same summary as one
/// that never restarted.
pub trait SummaryPolicy: Send + Sync {
    /// Return the new summary after absorbing `evicted` (oldest first)
    fn fold(&self, summary: &str, evicted: &[HistoryEntry]) -> String;
}
