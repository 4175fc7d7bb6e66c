//! Issue detection: local rules merged with a model review
//!
//! Two independently-sourced issue lists feed one verdict: the static
//! rules (fast, local, never flaky) and a model review decoded through
//! the layered parser. A failing backend or an unusable reply degrades
//! detection to local-only results; that fallback is part of the
//! contract, not an edge case.

use crate::config::Config;
use crate::llm::client::{generate_with_timeout, GenerateOptions, ModelBackend};
use crate::llm::parse::{parse_verdict, ParseOutcome};
use crate::llm::prompts::REVIEW_SYSTEM;
use crate::review::static_rules::StaticRules;
use crate::review::{Issue, ReviewVerdict};
use std::collections::HashSet;
use std::sync::Arc;

pub struct IssueDetector {
    backend: Arc<dyn ModelBackend>,
    config: Config,
    rules: StaticRules,
}

impl IssueDetector {
    pub fn new(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            backend,
            config,
            rules: StaticRules::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate an artifact: run the static rules, request one model
    /// review, merge. Local issues precede model issues; duplicates
    /// (same category and message) are dropped; overall validity is
    /// computed from the merged list against the configured threshold.
    pub async fn detect(&self, artifact: &str) -> anyhow::Result<ReviewVerdict> {
        if artifact.trim().is_empty() {
            anyhow::bail!("nothing to review: artifact is empty");
        }

        let rule_matches = self.rules.analyze(artifact);
        let mut issues: Vec<Issue> = Vec::new();
        let mut suggestions: Vec<String> = Vec::new();
        for m in &rule_matches {
            issues.push(m.issue.clone());
            let fix = m.fix.to_string();
            if !suggestions.contains(&fix) {
                suggestions.push(fix);
            }
        }

        let model_verdict = self.model_review(artifact).await;

        let mut improved_code = None;
        let mut low_confidence = false;
        if let Some(model) = model_verdict {
            let mut seen: HashSet<(crate::review::Category, String)> = issues
                .iter()
                .map(|i| (i.category, i.message.clone()))
                .collect();
            for issue in model.issues {
                if seen.insert((issue.category, issue.message.clone())) {
                    issues.push(issue);
                }
            }
            for s in model.suggestions {
                if !suggestions.contains(&s) {
                    suggestions.push(s);
                }
            }
            improved_code = model.improved_code;
            low_confidence = model.low_confidence;
        }

        let threshold = self.config.severity_threshold;
        let valid = !issues.iter().any(|i| i.severity >= threshold);

        Ok(ReviewVerdict {
            valid,
            issues,
            suggestions,
            improved_code,
            improved_accepted: false,
            low_confidence,
        })
    }

    /// One outbound review call, decoded through the recovery cascade.
    /// Any failure - transport, timeout, or terminal parse - returns
    /// `None` and detection proceeds local-only.
    async fn model_review(&self, artifact: &str) -> Option<ReviewVerdict> {
        let user = build_review_prompt(artifact);
        let options = GenerateOptions {
            model: self.config.reviewer_model.clone(),
            json_mode: true,
        };

        let reply = match generate_with_timeout(
            self.backend.as_ref(),
            REVIEW_SYSTEM,
            &user,
            &options,
            self.config.request_timeout(),
        )
        .await
        {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "model review unavailable, using local rules only");
                return None;
            }
        };

        match parse_verdict(&reply) {
            ParseOutcome::Parsed { value, stage } => {
                tracing::debug!(stage = stage.number(), "review reply parsed");
                Some(value)
            }
            ParseOutcome::Failed { stage_errors, .. } => {
                let err = crate::error::EngineError::ParseFailure {
                    stages: stage_errors.len(),
                    last_error: stage_errors.last().cloned().unwrap_or_default(),
                };
                tracing::warn!(error = %err, "review reply unusable, using local rules only");
                None
            }
        }
    }
}

fn build_review_prompt(artifact: &str) -> String {
    format!(
        "Review this source file:\n\n```\n{}\n```\n\n\
         Check for:\n\
         1. Syntax errors\n\
         2. Logic bugs\n\
         3. Missing error handling\n\
         4. Security problems\n\
         5. Performance issues\n\
         6. Best practice violations\n\n\
         Respond with the JSON object described in your instructions.",
        artifact
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::GenerateOptions;
    use crate::review::{Category, Severity};
    use async_trait::async_trait;

    /// Backend returning a fixed reply for every call.
    struct FixedBackend(String);

    #[async_trait]
    impl ModelBackend for FixedBackend {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    /// Backend that always fails with a transport error.
    struct DownBackend;

    #[async_trait]
    impl ModelBackend for DownBackend {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> anyhow::Result<String> {
            Err(crate::error::EngineError::BackendUnavailable("refused".to_string()).into())
        }
    }

    fn detector(backend: Arc<dyn ModelBackend>) -> IssueDetector {
        IssueDetector::new(backend, Config::default())
    }

    const CLEAN_REPLY: &str = r#"{"valid": true, "issues": [], "suggestions": []}"#;

    #[tokio::test]
    async fn test_clean_artifact_clean_review_is_valid() {
        let d = detector(Arc::new(FixedBackend(CLEAN_REPLY.to_string())));
        let verdict = d.detect("def add(a, b):\n    return a + b\n").await.unwrap();
        assert!(verdict.valid);
        assert!(verdict.issues.is_empty());
    }

    #[tokio::test]
    async fn test_detect_is_idempotent_on_valid_artifact() {
        let d = detector(Arc::new(FixedBackend(CLEAN_REPLY.to_string())));
        let code = "def add(a, b):\n    return a + b\n";
        let first = d.detect(code).await.unwrap();
        let second = d.detect(code).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_local_issues_precede_model_issues() {
        let reply = r#"{"valid": false, "issues": [{"severity": "error", "category": "correctness", "message": "off-by-one in range"}]}"#;
        let d = detector(Arc::new(FixedBackend(reply.to_string())));
        let verdict = d.detect("password = \"hunter2\"\n").await.unwrap();

        assert!(!verdict.valid);
        assert_eq!(verdict.issues.len(), 2);
        assert_eq!(verdict.issues[0].category, Category::Security);
        assert_eq!(verdict.issues[1].message, "off-by-one in range");
    }

    #[tokio::test]
    async fn test_duplicate_findings_merged() {
        // Model repeats the local finding verbatim
        let reply = r#"{"valid": false, "issues": [{"severity": "critical", "category": "security", "message": "Hardcoded secret or credential found"}]}"#;
        let d = detector(Arc::new(FixedBackend(reply.to_string())));
        let verdict = d.detect("api_key = \"sk-1\"\n").await.unwrap();
        assert_eq!(
            verdict
                .issues
                .iter()
                .filter(|i| i.message.contains("secret"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_local_only() {
        let d = detector(Arc::new(DownBackend));
        let verdict = d.detect("token = \"abc123\"\n").await.unwrap();
        // Local critical finding still invalidates the artifact
        assert!(!verdict.valid);
        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(verdict.issues[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_unusable_reply_degrades_to_local_only() {
        let d = detector(Arc::new(FixedBackend("ok".to_string())));
        let verdict = d.detect("def f():\n    return 1\n").await.unwrap();
        assert!(verdict.valid);
        assert!(verdict.issues.is_empty());
    }

    #[tokio::test]
    async fn test_warnings_alone_do_not_invalidate() {
        let reply = r#"{"valid": false, "issues": [{"severity": "warning", "category": "style", "message": "long function"}]}"#;
        let d = detector(Arc::new(FixedBackend(reply.to_string())));
        let verdict = d.detect("def f():\n    return 1\n").await.unwrap();
        // Threshold is error: warnings are reported but not blocking
        assert!(verdict.valid);
        assert_eq!(verdict.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_artifact_is_rejected() {
        let d = detector(Arc::new(FixedBackend(CLEAN_REPLY.to_string())));
        assert!(d.detect("   \n").await.is_err());
    }
}
