//! Fix-verify-retry controller
//!
//! Drives the bounded repair loop: detect, request a fix, extract code
//! from the reply, re-detect, accept or retry. Exactly three terminal
//! states exist: accepted-clean (no issues found), accepted-fixed
//! (issues repaired and re-verified), and given-up (attempts exhausted,
//! reported honestly with actionable suggestions). The loop's state is a
//! value passed between iterations, so a controller can serve concurrent
//! independent requests without locking.

use crate::cache::{fingerprint, ReviewCache};
use crate::config::Config;
use crate::llm::client::{generate_with_timeout, GenerateOptions, ModelBackend};
use crate::llm::extract::extract_code;
use crate::llm::prompts::FIX_SYSTEM;
use crate::review::detect::IssueDetector;
use crate::review::{Category, FixAttempt, Issue, ReviewVerdict};
use std::sync::Arc;

pub struct RepairController {
    detector: IssueDetector,
    backend: Arc<dyn ModelBackend>,
    config: Config,
    cache: Option<ReviewCache>,
}

impl RepairController {
    pub fn new(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            detector: IssueDetector::new(backend.clone(), config.clone()),
            backend,
            config,
            cache: None,
        }
    }

    /// Attach a verdict cache. Lookups and stores are best-effort; the
    /// controller never depends on the cache for correctness.
    pub fn with_cache(mut self, cache: ReviewCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate an artifact and, when invalid, drive the repair loop.
    pub async fn validate_and_improve(&self, artifact: &str) -> anyhow::Result<ReviewVerdict> {
        let key = fingerprint(
            artifact,
            &self.config.reviewer_model,
            self.config.severity_threshold,
        );
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                tracing::debug!("verdict served from cache");
                return Ok(hit);
            }
        }

        let mut initial = self.detector.detect(artifact).await?;

        if initial.valid {
            tracing::info!("artifact valid, no repair needed");
            // The artifact itself stands; unrequested rewrites from the
            // review are not surfaced as accepted fixes
            initial.improved_code = None;
            self.store(&key, &initial);
            return Ok(initial);
        }

        if !self.config.enable_auto_fix {
            tracing::info!(
                issues = initial.issues.len(),
                "auto-fix disabled, reporting issues without repair"
            );
            initial.improved_code = None;
            return Ok(initial);
        }

        // The review itself sometimes ships improved code. Verify it
        // before trusting it; a verified fix costs no repair attempt
        // because no outbound repair call was made.
        if let Some(code) = initial.improved_code.clone() {
            if let Ok(verdict) = self.detector.detect(&code).await {
                if verdict.valid {
                    tracing::info!("review-supplied fix verified and accepted");
                    let accepted = accept(verdict, code);
                    self.store(&key, &accepted);
                    return Ok(accepted);
                }
            }
        }

        let verdict = self.repair_loop(artifact, initial).await;
        if verdict.valid {
            self.store(&key, &verdict);
        }
        Ok(verdict)
    }

    /// The bounded retry loop. Every outbound fix call consumes an
    /// attempt, including calls whose reply yields no extractable code
    /// and calls that fail outright.
    async fn repair_loop(&self, artifact: &str, initial: ReviewVerdict) -> ReviewVerdict {
        let mut history: Vec<FixAttempt> = Vec::new();
        let mut current = initial;

        for attempt in 1..=self.config.max_attempts {
            let prompt = build_fix_prompt(artifact, &current.issues, &history);
            let options = GenerateOptions {
                model: self.config.reviewer_model.clone(),
                json_mode: false,
            };

            let reply = match generate_with_timeout(
                self.backend.as_ref(),
                FIX_SYSTEM,
                &prompt,
                &options,
                self.config.request_timeout(),
            )
            .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "fix call failed, attempt consumed");
                    history.push(FixAttempt {
                        attempt,
                        source_after_fix: None,
                        verdict_after_fix: None,
                        accepted: false,
                    });
                    continue;
                }
            };

            let Some(code) = extract_code(&reply) else {
                tracing::warn!(
                    attempt,
                    error = %crate::error::EngineError::ExtractionEmpty,
                    "attempt consumed"
                );
                history.push(FixAttempt {
                    attempt,
                    source_after_fix: None,
                    verdict_after_fix: None,
                    accepted: false,
                });
                continue;
            };

            let verdict = match self.detector.detect(&code).await {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "re-validation failed");
                    history.push(FixAttempt {
                        attempt,
                        source_after_fix: Some(code),
                        verdict_after_fix: None,
                        accepted: false,
                    });
                    continue;
                }
            };

            if verdict.valid {
                tracing::info!(attempt, "fix accepted after re-validation");
                return accept(verdict, code);
            }

            tracing::info!(
                attempt,
                remaining = verdict.issues.len(),
                "fix did not resolve all issues"
            );
            history.push(FixAttempt {
                attempt,
                source_after_fix: Some(code),
                verdict_after_fix: Some(verdict.clone()),
                accepted: false,
            });
            current = verdict;
        }

        tracing::warn!(
            error = %crate::error::EngineError::RepairExhausted {
                attempts: self.config.max_attempts,
            },
            "returning give-up verdict"
        );
        give_up(current, &history)
    }

    fn store(&self, key: &str, verdict: &ReviewVerdict) {
        if let Some(cache) = &self.cache {
            let _ = cache.put(key, verdict);
        }
    }
}

/// Build the accepted-fixed terminal verdict.
fn accept(mut verdict: ReviewVerdict, code: String) -> ReviewVerdict {
    verdict.valid = true;
    verdict.improved_code = Some(code);
    verdict.improved_accepted = true;
    verdict
}

/// Build the given-up terminal verdict: last known issues, the last
/// attempted code surfaced for transparency, and human-actionable
/// suggestions. Never a silent success.
fn give_up(last: ReviewVerdict, history: &[FixAttempt]) -> ReviewVerdict {
    let last_code = history
        .iter()
        .rev()
        .find_map(|a| a.source_after_fix.clone());

    let mut suggestions = giveup_suggestions(&last.issues);
    for s in last.suggestions {
        if !suggestions.contains(&s) {
            suggestions.push(s);
        }
    }

    ReviewVerdict {
        valid: false,
        issues: last.issues,
        suggestions,
        improved_code: last_code,
        improved_accepted: false,
        low_confidence: last.low_confidence,
    }
}

/// Per-category guidance for unresolved issues, plus the general
/// escalation paths.
fn giveup_suggestions(issues: &[Issue]) -> Vec<String> {
    let mut suggestions = Vec::new();

    let mut categories: Vec<Category> = issues.iter().map(|i| i.category).collect();
    categories.dedup();
    for category in categories {
        let hint = match category {
            Category::Security => {
                "Remove hardcoded credentials and validate anything that reaches a shell or query"
            }
            Category::Performance => {
                "Add timeouts around network calls and move work out of hot loops"
            }
            Category::Correctness => "Add explicit error handling around failure-prone calls",
            Category::Style => "Align naming and formatting with the surrounding code",
        };
        let hint = hint.to_string();
        if !suggestions.contains(&hint) {
            suggestions.push(hint);
        }
    }

    suggestions.push("Try a larger reviewer model".to_string());
    suggestions.push("Simplify the artifact and run validation again".to_string());
    suggestions.push("Fix the remaining issues manually".to_string());
    suggestions
}

/// Fix prompt: the artifact, the outstanding issues, and on retries the
/// accumulated history of what previous attempts failed to resolve.
fn build_fix_prompt(artifact: &str, issues: &[Issue], history: &[FixAttempt]) -> String {
    let issue_list: Vec<String> = issues
        .iter()
        .map(|i| {
            let location = i
                .location
                .as_deref()
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            format!(
                "- [{}] [{}] {}{}",
                i.severity.label(),
                i.category.label(),
                i.message,
                location
            )
        })
        .collect();

    let mut prompt = format!(
        "The following code has issues that need to be fixed:\n\n```\n{}\n```\n\n\
         Issues to fix:\n{}\n",
        artifact,
        issue_list.join("\n")
    );

    if !history.is_empty() {
        prompt.push_str("\nPrevious fix attempts and their outcomes:\n");
        for attempt in history {
            match (&attempt.source_after_fix, &attempt.verdict_after_fix) {
                (None, _) => {
                    prompt.push_str(&format!(
                        "- Attempt {}: produced no usable code\n",
                        attempt.attempt
                    ));
                }
                (Some(_), None) => {
                    prompt.push_str(&format!(
                        "- Attempt {}: code could not be re-validated\n",
                        attempt.attempt
                    ));
                }
                (Some(_), Some(v)) => {
                    prompt.push_str(&format!(
                        "- Attempt {}: {} issues remained after the fix\n",
                        attempt.attempt,
                        v.issues.len()
                    ));
                }
            }
        }
    }

    prompt.push_str(
        "\nProvide the COMPLETE fixed code that addresses all issues above. \
         Return ONLY the fixed code in a fenced code block.",
    );
    prompt
}
