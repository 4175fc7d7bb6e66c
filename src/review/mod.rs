//! Review verdict data model
//!
//! The typed outcome of validating an artifact: a verdict, its issues,
//! and the repair bookkeeping that produced it. Verdicts are immutable
//! once returned to the caller; one is produced per validation attempt.

pub mod detect;
pub mod repair;
pub mod static_rules;

pub use detect::IssueDetector;
pub use repair::RepairController;

use serde::{Deserialize, Serialize};

/// How bad an issue is. Ordering matters: `Critical > Error > Warning > Info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    /// Parse a model-supplied severity string, defaulting to `Warning`
    /// for anything unrecognized.
    pub fn parse_lenient(raw: &str) -> Severity {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "error" | "high" => Severity::Error,
            "warning" | "warn" | "medium" => Severity::Warning,
            "info" | "low" | "note" | "nitpick" => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

/// What kind of problem an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    #[default]
    Correctness,
    Style,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Correctness => "correctness",
            Category::Style => "style",
        }
    }

    pub fn parse_lenient(raw: &str) -> Category {
        match raw.trim().to_lowercase().as_str() {
            "security" => Category::Security,
            "performance" | "perf" => Category::Performance,
            "style" | "formatting" | "best-practice" | "best_practice" => Category::Style,
            _ => Category::Correctness,
        }
    }
}

/// A single problem found in an artifact, by either the local rules or
/// the model review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    /// Free-form location hint, e.g. "line 42" or a function name.
    pub location: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.location = Some(format!("line {}", line));
        self
    }

    /// Dedup key: two issues are the same finding if category and
    /// message match, regardless of which source reported them.
    pub fn dedup_key(&self) -> (Category, &str) {
        (self.category, self.message.as_str())
    }
}

/// The structured outcome of validating an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub valid: bool,
    /// Never absent: an empty list signals a clean result. Detector
    /// issues precede model issues, each group in discovery order.
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    /// Present when a fix was accepted, or when repair was exhausted and
    /// the last attempted code is surfaced for transparency.
    pub improved_code: Option<String>,
    /// False when `improved_code` is the unaccepted last attempt of an
    /// exhausted repair loop.
    #[serde(default)]
    pub improved_accepted: bool,
    /// Set when the verdict was salvaged from unstructured reviewer
    /// output (parse stage 4) and field fidelity is not guaranteed.
    #[serde(default)]
    pub low_confidence: bool,
}

impl ReviewVerdict {
    /// A clean verdict with no findings.
    pub fn clean() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            improved_code: None,
            improved_accepted: false,
            low_confidence: false,
        }
    }

    /// Recompute validity against a severity threshold: the verdict is
    /// valid when no issue reaches the threshold.
    pub fn is_valid_under(&self, threshold: Severity) -> bool {
        !self.issues.iter().any(|i| i.severity >= threshold)
    }

    /// Issues at or above the given severity.
    pub fn blocking_issues(&self, threshold: Severity) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.severity >= threshold).collect()
    }
}

/// One iteration of the repair loop. Owned by a single controller
/// invocation and discarded when it returns; passed by value between
/// iterations so the controller stays reentrant.
#[derive(Debug, Clone)]
pub struct FixAttempt {
    /// 1-based attempt index.
    pub attempt: u32,
    /// The code extracted from the fix reply, if extraction succeeded.
    pub source_after_fix: Option<String>,
    /// The detector's verdict on that code, if it was re-validated.
    pub verdict_after_fix: Option<ReviewVerdict>,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_parse_lenient_defaults_to_warning() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("high"), Severity::Error);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Warning);
    }

    #[test]
    fn test_category_parse_lenient() {
        assert_eq!(Category::parse_lenient("Security"), Category::Security);
        assert_eq!(Category::parse_lenient("perf"), Category::Performance);
        assert_eq!(Category::parse_lenient("logic"), Category::Correctness);
    }

    #[test]
    fn test_clean_verdict_is_valid_under_any_threshold() {
        let v = ReviewVerdict::clean();
        assert!(v.is_valid_under(Severity::Info));
        assert!(v.issues.is_empty());
    }

    #[test]
    fn test_is_valid_under_threshold() {
        let mut v = ReviewVerdict::clean();
        v.issues.push(Issue::new(
            Severity::Warning,
            Category::Style,
            "long line",
        ));
        assert!(v.is_valid_under(Severity::Error));
        assert!(!v.is_valid_under(Severity::Warning));
    }

    #[test]
    fn test_dedup_key_ignores_severity() {
        let a = Issue::new(Severity::Error, Category::Security, "hardcoded secret");
        let b = Issue::new(Severity::Critical, Category::Security, "hardcoded secret");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
