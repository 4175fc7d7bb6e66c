//! Layered parser for model review replies
//!
//! Models frequently return malformed structured output: fenced JSON
//! wrapped in prose, trailing commas, smart quotes, truncated strings,
//! or no JSON at all. Parsing runs four ordered recovery stages, each on
//! a fresh copy of the raw reply, stopping at the first success. Order
//! matters: fenced extraction must run before textual repair (repairing
//! punctuation inside surrounding prose corrupts the payload), and field
//! salvage is deliberately last because it discards structure fidelity.
//!
//! Expected malformation is signalled through [`ParseOutcome`], never
//! through errors.

use crate::review::{Category, Issue, ReviewVerdict, Severity};
use crate::util::truncate;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::extract::fenced_blocks;

/// Which recovery stage produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    /// Strict decode of the raw reply.
    Direct,
    /// Strict decode of a fenced block or balanced-brace span.
    Fenced,
    /// Decode after bounded textual repairs.
    Repaired,
    /// Field-level salvage from unstructured text.
    Salvaged,
}

impl RecoveryStage {
    pub fn number(&self) -> u8 {
        match self {
            RecoveryStage::Direct => 1,
            RecoveryStage::Fenced => 2,
            RecoveryStage::Repaired => 3,
            RecoveryStage::Salvaged => 4,
        }
    }
}

/// Discriminated result of a parse: either a decoded value together with
/// the stage that recovered it, or a terminal failure carrying the raw
/// text and every stage-level error encountered.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    Parsed { value: T, stage: RecoveryStage },
    Failed { raw: String, stage_errors: Vec<String> },
}

impl<T> ParseOutcome<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed { .. })
    }

    pub fn stage(&self) -> Option<RecoveryStage> {
        match self {
            ParseOutcome::Parsed { stage, .. } => Some(*stage),
            ParseOutcome::Failed { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed { value, .. } => Some(value),
            ParseOutcome::Failed { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  STAGES 1-3: STRUCTURAL DECODE
// ═══════════════════════════════════════════════════════════════════════════

/// Decode a structured value from a model reply, trying stages 1-3.
///
/// Stage 4 (field salvage) is type-specific; [`parse_verdict`] layers it
/// on top for review verdicts.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> ParseOutcome<T> {
    let mut stage_errors = Vec::new();

    // Stage 1: strict decode as-is
    match serde_json::from_str::<T>(raw.trim()) {
        Ok(value) => {
            return ParseOutcome::Parsed {
                value,
                stage: RecoveryStage::Direct,
            }
        }
        Err(e) => stage_errors.push(format!("stage 1 (direct): {}", e)),
    }

    // Stage 2: extract a fenced block or balanced-brace span, strict decode
    let candidate = extract_candidate(raw);
    match &candidate {
        Some(extracted) => match serde_json::from_str::<T>(extracted) {
            Ok(value) => {
                return ParseOutcome::Parsed {
                    value,
                    stage: RecoveryStage::Fenced,
                }
            }
            Err(e) => stage_errors.push(format!("stage 2 (extract): {}", e)),
        },
        None => stage_errors.push("stage 2 (extract): no fenced block or object found".to_string()),
    }

    // Stage 3: bounded textual repairs on the extracted-or-raw candidate
    let target = candidate.unwrap_or_else(|| raw.trim().to_string());
    let repaired = repair_json(&target);
    match serde_json::from_str::<T>(&repaired) {
        Ok(value) => ParseOutcome::Parsed {
            value,
            stage: RecoveryStage::Repaired,
        },
        Err(e) => {
            stage_errors.push(format!("stage 3 (repair): {}", e));
            ParseOutcome::Failed {
                raw: raw.to_string(),
                stage_errors,
            }
        }
    }
}

/// Pull the most plausible structured span out of a prose-wrapped reply:
/// prefer a fenced block containing an object, then fall back to the
/// outermost balanced `{...}` span.
fn extract_candidate(raw: &str) -> Option<String> {
    for block in fenced_blocks(raw) {
        if block.content.contains('{') {
            return Some(block.content.trim().to_string());
        }
    }
    brace_span(raw).map(|s| s.to_string())
}

/// Locate the outermost balanced `{...}` span, tracking strings and
/// escapes so braces inside values don't confuse the count.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the bounded repair set: smart-quote normalization, control
/// character removal, trailing-comma stripping, and balancing of a
/// truncated tail.
fn repair_json(json: &str) -> String {
    let mut fixed = json.to_string();

    // Smart quotes to plain quotes
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    // Remove control characters that slip into small-model output
    fixed = fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    // Trailing commas before ] or }
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("static regex");
    fixed = trailing_comma.replace_all(&fixed, "$1").into_owned();

    balance_truncated(&fixed)
}

/// Close an unterminated trailing string and any unclosed brackets so a
/// truncated reply still decodes to its complete prefix.
fn balance_truncated(json: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if !in_string && stack.is_empty() {
        return json.to_string();
    }

    let mut balanced = json.trim_end().to_string();
    if in_string {
        // A trailing lone backslash would escape the closing quote
        if balanced.ends_with('\\') && !balanced.ends_with("\\\\") {
            balanced.pop();
        }
        balanced.push('"');
    }
    while let Some(close) = stack.pop() {
        balanced.push(close);
    }
    balanced
}

// ═══════════════════════════════════════════════════════════════════════════
//  VERDICT WIRE SHAPE
// ═══════════════════════════════════════════════════════════════════════════

fn default_true() -> bool {
    true
}

/// The review reply as models actually send it: `valid` often omitted,
/// issues sometimes bare strings, sometimes structured objects.
#[derive(Debug, Deserialize)]
struct VerdictJson {
    #[serde(default = "default_true")]
    valid: bool,
    #[serde(default)]
    issues: Vec<IssueJson>,
    #[serde(default)]
    suggestions: Vec<SuggestionJson>,
    #[serde(default)]
    improved_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IssueJson {
    Structured {
        message: String,
        #[serde(default)]
        severity: String,
        #[serde(default)]
        category: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        location: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SuggestionJson {
    Structured {
        title: String,
        #[serde(default)]
        description: String,
    },
    Text(String),
}

impl VerdictJson {
    fn into_verdict(self) -> ReviewVerdict {
        let issues = self
            .issues
            .into_iter()
            .map(|i| match i {
                IssueJson::Structured {
                    message,
                    severity,
                    category,
                    line,
                    location,
                } => Issue {
                    severity: Severity::parse_lenient(&severity),
                    category: Category::parse_lenient(&category),
                    message,
                    location: location.or_else(|| line.map(|l| format!("line {}", l))),
                },
                IssueJson::Text(message) => {
                    Issue::new(Severity::Warning, Category::Correctness, message)
                }
            })
            .collect();

        let suggestions = self
            .suggestions
            .into_iter()
            .map(|s| match s {
                SuggestionJson::Structured { title, description } if description.is_empty() => {
                    title
                }
                SuggestionJson::Structured { title, description } => {
                    format!("{}: {}", title, description)
                }
                SuggestionJson::Text(text) => text,
            })
            .collect();

        let improved_code = self.improved_code.filter(|c| !c.trim().is_empty());

        ReviewVerdict {
            valid: self.valid,
            issues,
            suggestions,
            improved_code,
            improved_accepted: false,
            low_confidence: false,
        }
    }
}

/// Parse a review reply into a [`ReviewVerdict`], running all four
/// recovery stages. A terminal failure means "reviewer output unusable",
/// never "code is valid".
pub fn parse_verdict(raw: &str) -> ParseOutcome<ReviewVerdict> {
    match parse_json::<VerdictJson>(raw) {
        ParseOutcome::Parsed { value, stage } => ParseOutcome::Parsed {
            value: value.into_verdict(),
            stage,
        },
        ParseOutcome::Failed {
            raw,
            mut stage_errors,
        } => match salvage_verdict(&raw) {
            Some(verdict) => ParseOutcome::Parsed {
                value: verdict,
                stage: RecoveryStage::Salvaged,
            },
            None => {
                stage_errors
                    .push("stage 4 (salvage): no recognizable verdict fields".to_string());
                ParseOutcome::Failed { raw, stage_errors }
            }
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  STAGE 4: FIELD SALVAGE
// ═══════════════════════════════════════════════════════════════════════════

const SALVAGE_MAX_ITEMS: usize = 5;
const SALVAGE_MAX_CHARS: usize = 150;

const ISSUE_WORDS: &[&str] = &["error", "bug", "issue", "problem", "missing", "incorrect"];
const SUGGESTION_WORDS: &[&str] = &["suggest", "recommend", "consider", "should", "could", "better"];

/// Reconstruct a minimum viable verdict from plain prose: an explicit
/// valid flag if one is present, issues from problem-describing lines,
/// suggestions from advice-giving lines. Returns `None` when the text
/// yields nothing usable.
fn salvage_verdict(raw: &str) -> Option<ReviewVerdict> {
    let valid_re = Regex::new(r#"(?i)"?valid"?\s*[:=]\s*(true|false)"#).expect("static regex");
    let explicit_valid = valid_re
        .captures(raw)
        .map(|c| c[1].eq_ignore_ascii_case("true"));

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    for line in raw.lines() {
        let line = line
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
            .trim();
        if line.len() < 10 || line.len() > 200 {
            continue;
        }
        let lower = line.to_lowercase();
        if ISSUE_WORDS.iter().any(|w| lower.contains(w)) {
            if issues.len() < SALVAGE_MAX_ITEMS {
                issues.push(Issue::new(
                    Severity::Warning,
                    Category::Correctness,
                    truncate(line, SALVAGE_MAX_CHARS),
                ));
            }
        } else if SUGGESTION_WORDS.iter().any(|w| lower.contains(w)) {
            if suggestions.len() < SALVAGE_MAX_ITEMS {
                suggestions.push(truncate(line, SALVAGE_MAX_CHARS));
            }
        }
    }

    if explicit_valid.is_none() && issues.is_empty() && suggestions.is_empty() {
        return None;
    }

    Some(ReviewVerdict {
        valid: explicit_valid.unwrap_or(true),
        issues,
        suggestions,
        improved_code: None,
        improved_accepted: false,
        low_confidence: true,
    })
}
