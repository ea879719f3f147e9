//! Completion detection and iteration evaluation
//!
//! The model signals it is done by emitting `<promise>PHRASE</promise>`. Only a byte-exact
//! match on the configured phrase counts. Optional `<improvements>…</improvements>` blocks
//! carry lessons forward when the iteration falls short.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::r#loop::RunConfig;

const PROMISE_OPEN: &str = "<promise>";

static PROMISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<promise>(.*?)</promise>").expect("promise pattern is valid"));

static IMPROVEMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<improvements>(.*?)</improvements>").expect("improvements pattern is valid"));

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s+").expect("bullet pattern is valid"));

/// Result of scanning text for completion markers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Detection {
    /// A marker enclosing exactly the expected phrase was found
    pub found: bool,
    /// Enclosed text of the matching marker, or of the first marker when none matched
    pub phrase: Option<String>,
    /// An opening tag was left unclosed
    pub malformed: bool,
}

/// Scan `text` for `<promise>` markers and compare each against `expected`
pub fn detect(text: &str, expected: &str) -> Detection {
    debug!(text_len = %text.len(), %expected, "detect: called");
    let enclosed: Vec<&str> = PROMISE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let malformed = text.matches(PROMISE_OPEN).count() > enclosed.len();
    if malformed {
        debug!("detect: unclosed promise marker");
    }

    if let Some(hit) = enclosed.iter().find(|e| **e == expected) {
        debug!("detect: exact match");
        return Detection {
            found: true,
            phrase: Some((*hit).to_string()),
            malformed,
        };
    }

    debug!(marker_count = %enclosed.len(), "detect: no exact match");
    Detection {
        found: false,
        phrase: enclosed.first().map(|s| s.to_string()),
        malformed,
    }
}

/// Pull lesson entries out of every `<improvements>` block, in order
///
/// Each non-empty line is one entry; list bullets and numbering are stripped.
pub fn extract_lessons(text: &str) -> Vec<String> {
    debug!(text_len = %text.len(), "extract_lessons: called");
    IMPROVEMENTS_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .flat_map(|block| block.as_str().lines())
        .map(str::trim)
        .map(|line| BULLET_RE.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Verdict for one whole iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Completed { phrase: String },
    NotCompleted { lessons: Vec<String> },
}

impl Verdict {
    pub fn is_completed(&self) -> bool {
        matches!(self, Verdict::Completed { .. })
    }
}

/// Decides whether an iteration's produced text satisfies completion
#[async_trait]
pub trait CompletionEvaluator: Send + Sync {
    async fn evaluate(&self, produced: &str, run: &RunConfig) -> Verdict;
}

/// Exact-match evaluator over the promise marker
#[derive(Debug, Clone, Default)]
pub struct PromiseEvaluator;

#[async_trait]
impl CompletionEvaluator for PromiseEvaluator {
    async fn evaluate(&self, produced: &str, run: &RunConfig) -> Verdict {
        debug!(produced_len = %produced.len(), "PromiseEvaluator::evaluate: called");
        let detection = detect(produced, &run.completion_phrase);

        if detection.found {
            debug!("PromiseEvaluator::evaluate: completed");
            return Verdict::Completed {
                phrase: run.completion_phrase.clone(),
            };
        }

        if detection.malformed {
            warn!("Malformed completion marker in iteration output, treating as not completed");
        } else if let Some(near_miss) = &detection.phrase {
            debug!(%near_miss, "PromiseEvaluator::evaluate: promise phrase mismatch");
        }

        Verdict::NotCompleted {
            lessons: extract_lessons(produced),
        }
    }
}
