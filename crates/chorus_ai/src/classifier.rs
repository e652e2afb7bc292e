//! Complexity classifier.
//!
//! Analyzes one user message and produces a [`ComplexityProfile`] used for
//! routing. Pure function of the text: weighted keyword categories plus
//! length and multi-question bonuses. No I/O, no error conditions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Content category detected in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Technical,
    Programming,
    Educational,
    Analytical,
    Creative,
    Research,
}

impl Category {
    /// Tag string matching [`ModelDescriptor::specialties`](crate::types::ModelDescriptor).
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Programming => "programming",
            Self::Educational => "educational",
            Self::Analytical => "analytical",
            Self::Creative => "creative",
            Self::Research => "research",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// The result of classifying one input message. Computed fresh per request,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityProfile {
    /// Sum of matched-category weights and length/multi-question bonuses.
    pub score: u32,
    pub matched_categories: HashSet<Category>,
    pub requires_high_quality: bool,
    /// Multiple question marks or conjunction phrasing: the message asks for
    /// more than one thing.
    pub is_multi_dimensional: bool,
}

// ---------------------------------------------------------------------------
// Compiled patterns (Lazy statics)
// ---------------------------------------------------------------------------

/// Category detection patterns. Each entry is (Category, weight, patterns).
static CATEGORY_PATTERNS: Lazy<Vec<(Category, u32, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            Category::Technical,
            3,
            compile_patterns(&[
                r"(?i)architect|system design|infrastructure|scalab",
                r"(?i)distributed|concurren|protocol|latency|throughput",
                r"(?i)algorithm|data structure|complexity|optimi[sz]",
            ]),
        ),
        (
            Category::Programming,
            3,
            compile_patterns(&[
                r"(?i)\bcode\b|function|debug|compile|refactor|implement",
                r"(?i)\bapi\b|library|framework|stack trace|exception",
                r"```",
            ]),
        ),
        (
            Category::Analytical,
            2,
            compile_patterns(&[
                r"(?i)analy[sz]e|compare|evaluate|assess|versus|\bvs\.?\b",
                r"(?i)trade-?offs|pros and cons|strengths and weaknesses",
            ]),
        ),
        (
            Category::Research,
            2,
            compile_patterns(&[
                r"(?i)research|investigate|survey|literature|citation",
                r"(?i)state of the art|recent (studies|papers|findings)",
            ]),
        ),
        (
            Category::Creative,
            2,
            compile_patterns(&[
                r"(?i)write (a|an|the) (story|poem|song|script|essay)",
                r"(?i)creative|brainstorm|imagine|invent|come up with",
            ]),
        ),
        (
            Category::Educational,
            1,
            compile_patterns(&[
                r"(?i)explain|what is|what are|how does|how do",
                r"(?i)teach me|tutorial|walk me through|tell me about",
            ]),
        ),
    ]
});

/// Conjunction phrasing that signals a multi-part request.
static CONJUNCTIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"(?i)\band also\b|\bas well as\b|\bin addition\b",
        r"(?i)\badditionally\b|\bfurthermore\b|\bon top of that\b",
    ])
});

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Bad regex pattern `{p}`: {e}")))
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

// ---------------------------------------------------------------------------
// ComplexityClassifier
// ---------------------------------------------------------------------------

/// Deterministic, stateless classifier. All regex state lives in `Lazy`
/// statics; the struct exists so the pattern tables can become configurable
/// later without changing call sites.
pub struct ComplexityClassifier {
    _private: (),
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityClassifier {
    /// Create a classifier. Pattern tables are compiled once (lazily); forcing
    /// them here surfaces regex errors at construction time.
    pub fn new() -> Self {
        let _ = &*CATEGORY_PATTERNS;
        let _ = &*CONJUNCTIONS;
        Self { _private: () }
    }

    /// Classify a message. Always returns a profile; empty or trivial input
    /// yields the lowest-complexity (educational) category with score 0.
    pub fn classify(&self, text: &str) -> ComplexityProfile {
        let mut score: u32 = 0;
        let mut matched: HashSet<Category> = HashSet::new();

        for (category, weight, patterns) in CATEGORY_PATTERNS.iter() {
            if any_match(patterns, text) {
                matched.insert(*category);
                score += weight;
            }
        }

        // Length bonuses
        if text.len() > 500 {
            score += 2;
        } else if text.len() > 200 {
            score += 1;
        }

        // Multi-part detection: several question marks or conjunction phrasing
        let question_marks = text.matches('?').count();
        let is_multi_dimensional = question_marks >= 2 || any_match(&CONJUNCTIONS, text);
        if is_multi_dimensional {
            score += 1;
        }

        if matched.is_empty() {
            matched.insert(Category::Educational);
        }

        let requires_high_quality =
            score >= 4 || (matched.len() >= 2 && matched.contains(&Category::Technical));

        ComplexityProfile {
            score,
            matched_categories: matched,
            requires_high_quality,
            is_multi_dimensional,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
