//! TruncatingSummary - default summarization policy
//!
//! Appends each evicted transcript as a markdown section, keeping only the end of long
//! outputs, then trims the whole summary to a character budget from the front.

use tracing::debug;

use super::SummaryPolicy;
use crate::state::HistoryEntry;

const ENTRY_TRUNCATED: &str = "...[truncated]...\n";
const SUMMARY_TRUNCATED: &str = "...[earlier progress truncated]...\n";

/// Concatenate-and-truncate summary policy
///
/// # Configuration
/// - `max_chars`: Character budget for the whole summary (default: 4000)
/// - `entry_max_chars`: Characters kept from each evicted transcript (default: 800)
///
/// # Example Output
/// ```markdown
/// ## Iteration 3
/// ...[truncated]...
/// the parser now handles nested blocks; remaining work is error recovery
///
/// ## Iteration 4 (interrupted)
/// partial output from the failed step
/// ```
#[derive(Debug, Clone)]
pub struct TruncatingSummary {
    max_chars: usize,
    entry_max_chars: usize,
}

impl TruncatingSummary {
    /// Create with custom limits
    pub fn with_limits(max_chars: usize, entry_max_chars: usize) -> Self {
        debug!(%max_chars, %entry_max_chars, "TruncatingSummary::with_limits: called");
        Self {
            max_chars,
            entry_max_chars,
        }
    }

    fn format_entry(&self, entry: &HistoryEntry) -> String {
        let output = entry.output.trim();
        let body = match tail_chars(output, self.entry_max_chars) {
            Some(tail) => {
                debug!(
                    output_len = %output.len(),
                    max_chars = %self.entry_max_chars,
                    "TruncatingSummary::format_entry: truncating output"
                );
                format!("{}{}", ENTRY_TRUNCATED, tail)
            }
            None => output.to_string(),
        };

        let label = if entry.partial { " (interrupted)" } else { "" };
        format!("## Iteration {}{}\n{}\n\n", entry.iteration, label, body)
    }
}

impl Default for TruncatingSummary {
    fn default() -> Self {
        Self::with_limits(4000, 800)
    }
}

impl SummaryPolicy for TruncatingSummary {
    fn fold(&self, summary: &str, evicted: &[HistoryEntry]) -> String {
        debug!(
            summary_len = %summary.len(),
            evicted_count = %evicted.len(),
            "TruncatingSummary::fold: called"
        );
        let mut combined = summary.to_string();
        for entry in evicted {
            combined.push_str(&self.format_entry(entry));
        }

        // Keep the END: the most recent progress matters most
        match tail_chars(&combined, self.max_chars) {
            Some(tail) => {
                debug!(combined_len = %combined.len(), "TruncatingSummary::fold: trimming summary");
                let tail = tail.strip_prefix(SUMMARY_TRUNCATED).unwrap_or(tail);
                format!("{}{}", SUMMARY_TRUNCATED, tail)
            }
            None => combined,
        }
    }
}

/// The last `max_chars` characters of `s`, or `None` if it already fits
fn tail_chars(s: &str, max_chars: usize) -> Option<&str> {
    let total = s.chars().count();
    if total <= max_chars {
        return None;
    }
    let skip = total - max_chars;
    let start = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(s.len());
    Some(&s[start..])
}
