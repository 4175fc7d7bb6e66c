//! Local static analysis (no model call)
//!
//! Fast pattern checks for known-unsafe and known-slow constructs. These
//! run on every validation with zero latency cost and never fail except
//! on unreadable input; the model review adds the judgment calls these
//! rules can't make.

use crate::review::{Category, Issue, Severity};
use regex::Regex;

/// A triggered rule: the issue plus the rule's canned remediation hint.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub issue: Issue,
    pub fix: &'static str,
}

struct Rule {
    pattern: Regex,
    severity: Severity,
    category: Category,
    message: &'static str,
    fix: &'static str,
}

impl Rule {
    fn new(
        pattern: &str,
        severity: Severity,
        category: Category,
        message: &'static str,
        fix: &'static str,
    ) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("static rule regex"),
            severity,
            category,
            message,
            fix,
        }
    }
}

/// Compiled rule set. Construction compiles every pattern once; the set
/// is immutable afterwards, so sharing across concurrent validations is
/// safe.
pub struct StaticRules {
    rules: Vec<Rule>,
}

impl Default for StaticRules {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticRules {
    pub fn new() -> Self {
        let rules = vec![
            Rule::new(
                r#"(?i)(api[_-]?key|password|secret|token|aws[_-]?access[_-]?key)\s*=\s*["']"#,
                Severity::Critical,
                Category::Security,
                "Hardcoded secret or credential found",
                "Load secrets from the environment instead of source",
            ),
            Rule::new(
                r"\b(eval|exec)\s*\(",
                Severity::Critical,
                Category::Security,
                "Use of eval/exec is dangerous - consider safer alternatives",
                "Parse data with a safe decoder instead of evaluating it",
            ),
            Rule::new(
                r"os\.system\s*\(|subprocess\.call\s*\(",
                Severity::Error,
                Category::Security,
                "Unvalidated shell command execution",
                "Invoke subprocesses without a shell and validate inputs",
            ),
            Rule::new(
                r"pickle\.loads?\s*\(",
                Severity::Error,
                Category::Security,
                "Deserializing untrusted data with pickle is unsafe",
                "Use a safe serialization format such as JSON",
            ),
            Rule::new(
                r#"execute\s*\(\s*f["']|execute\s*\(\s*["'][^"']*\{"#,
                Severity::Critical,
                Category::Security,
                "Potential SQL injection with interpolated query string",
                "Use parameterized queries: execute(query, params)",
            ),
            Rule::new(
                r"(?m)^\s*assert\s",
                Severity::Warning,
                Category::Security,
                "Assertions can be disabled in production, avoid for critical checks",
                "Use explicit error handling instead of assertions",
            ),
            Rule::new(
                r"(?m)^\s*from\s+\S+\s+import\s+\*",
                Severity::Info,
                Category::Performance,
                "Wildcard imports reduce clarity and can cause namespace pollution",
                "Import the specific items that are used",
            ),
            Rule::new(
                r#"(?i)print\s*\(\s*["']debug"#,
                Severity::Info,
                Category::Performance,
                "Debug print statements left in code",
                "Remove debug prints or use structured logging",
            ),
            Rule::new(
                r"list\s*\(\s*\[",
                Severity::Info,
                Category::Performance,
                "Converting a list literal to list is redundant",
                "Drop the redundant conversion",
            ),
        ];
        Self { rules }
    }

    /// Run every rule against the artifact. Matches are reported in rule
    /// order, then line order, which gives callers a stable discovery
    /// order to preserve in verdicts.
    pub fn analyze(&self, artifact: &str) -> Vec<RuleMatch> {
        let mut matches = Vec::new();

        for rule in &self.rules {
            for (line_idx, line) in artifact.lines().enumerate() {
                if rule.pattern.is_match(line) {
                    matches.push(RuleMatch {
                        issue: Issue::new(rule.severity, rule.category, rule.message)
                            .at_line(line_idx + 1),
                        fix: rule.fix,
                    });
                }
            }
        }

        matches.extend(scan_missing_timeouts(artifact));
        matches.extend(scan_loop_concat(artifact));
        matches
    }
}

/// HTTP calls without a timeout hang forever when the peer stalls.
fn scan_missing_timeouts(artifact: &str) -> Vec<RuleMatch> {
    let call = Regex::new(r"requests\.(get|post|request)\s*\(").expect("static rule regex");
    let mut matches = Vec::new();

    for (line_idx, line) in artifact.lines().enumerate() {
        if call.is_match(line) && !line.contains("timeout") {
            matches.push(RuleMatch {
                issue: Issue::new(
                    Severity::Warning,
                    Category::Performance,
                    "HTTP request without timeout could hang indefinitely",
                )
                .at_line(line_idx + 1),
                fix: "Add a timeout argument to every outbound request",
            });
        }
    }
    matches
}

/// String building with `+=` inside a loop body is quadratic.
fn scan_loop_concat(artifact: &str) -> Vec<RuleMatch> {
    let mut matches = Vec::new();
    let mut loop_indent: Option<usize> = None;

    for (line_idx, line) in artifact.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let indent = line.len() - trimmed.len();

        if let Some(li) = loop_indent {
            if indent <= li {
                loop_indent = None;
            } else if trimmed.contains("+= \"")
                || trimmed.contains("+= '")
                || trimmed.contains("+= f\"")
            {
                matches.push(RuleMatch {
                    issue: Issue::new(
                        Severity::Error,
                        Category::Performance,
                        "String concatenation in loop is slow",
                    )
                    .at_line(line_idx + 1),
                    fix: "Collect the parts and join them once after the loop",
                });
            }
        }

        if loop_indent.is_none()
            && (trimmed.starts_with("for ") || trimmed.starts_with("while "))
        {
            loop_indent = Some(indent);
        }
    }
    matches
}
