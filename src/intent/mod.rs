//! Intent classification for free-text instructions
//!
//! Two tiers, evaluated in order: a lexical fast path that resolves the
//! common case (explicit verbs) with zero outbound calls and
//! deterministic output, and a model fallback for genuinely ambiguous
//! phrasing. Classification always lands on exactly one intent; the
//! fallback-to-`modify` policy means ambiguity is a documented decision,
//! never an error.

pub mod route;

pub use route::{RequestHandler, RequestRouter, RoutedResult};

use crate::config::Config;
use crate::llm::client::{generate_with_timeout, GenerateOptions, ModelBackend};
use crate::llm::prompts::CLASSIFY_SYSTEM;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The classified purpose of a user instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Explain,
    Add,
    Fix,
    Optimize,
    Refactor,
    Modify,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Explain => "explain",
            Intent::Add => "add",
            Intent::Fix => "fix",
            Intent::Optimize => "optimize",
            Intent::Refactor => "refactor",
            Intent::Modify => "modify",
        }
    }

    fn from_token(token: &str) -> Option<Intent> {
        match token.to_lowercase().as_str() {
            "explain" => Some(Intent::Explain),
            "add" => Some(Intent::Add),
            "fix" => Some(Intent::Fix),
            "optimize" => Some(Intent::Optimize),
            "refactor" => Some(Intent::Refactor),
            "modify" => Some(Intent::Modify),
            _ => None,
        }
    }
}

/// Which tier produced the classification. Kept for observability, not
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassificationSource {
    Keyword,
    ModelFallback,
}

/// A classified instruction. Created once per instruction, never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRequest {
    pub raw_text: String,
    pub intent: Intent,
    pub source: ClassificationSource,
    pub confidence: f32,
}

/// Keyword sets in priority order: a "fix" cue beats a vaguer "add" cue
/// when both appear. The scan order IS the tie-break, so the policy is
/// structural rather than data-driven.
const KEYWORD_SETS: &[(Intent, &[&str])] = &[
    (Intent::Fix, &["fix", "bug", "error", "broken"]),
    (Intent::Add, &["add", "create", "implement", "include"]),
    (
        Intent::Optimize,
        &["optimize", "speed up", "faster", "performance"],
    ),
    (
        Intent::Refactor,
        &["refactor", "restructure", "clean up", "reorganize"],
    ),
    (Intent::Explain, &["explain", "what does", "describe"]),
];

const FALLBACK_KNOWN_CONFIDENCE: f32 = 0.8;
const FALLBACK_DEFAULT_CONFIDENCE: f32 = 0.4;

pub struct IntentClassifier {
    backend: Arc<dyn ModelBackend>,
    config: Config,
}

impl IntentClassifier {
    pub fn new(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self { backend, config }
    }

    /// Map an instruction to exactly one intent.
    pub async fn classify(&self, instruction: &str) -> ClassifiedRequest {
        if let Some(intent) = keyword_match(instruction) {
            tracing::debug!(intent = intent.label(), "intent resolved by keyword");
            return ClassifiedRequest {
                raw_text: instruction.to_string(),
                intent,
                source: ClassificationSource::Keyword,
                confidence: 1.0,
            };
        }

        let (intent, confidence) = self.model_fallback(instruction).await;
        tracing::debug!(
            intent = intent.label(),
            confidence,
            "intent resolved by model fallback"
        );
        ClassifiedRequest {
            raw_text: instruction.to_string(),
            intent,
            source: ClassificationSource::ModelFallback,
            confidence,
        }
    }

    /// One constrained model call. Only the first whitespace-delimited
    /// token of the reply counts, which defends against explanatory
    /// preamble; anything unrecognized (or a failed call) defaults to
    /// the most general handler.
    async fn model_fallback(&self, instruction: &str) -> (Intent, f32) {
        let options = GenerateOptions {
            model: self.config.reviewer_model.clone(),
            json_mode: false,
        };

        let reply = match generate_with_timeout(
            self.backend.as_ref(),
            CLASSIFY_SYSTEM,
            instruction,
            &options,
            self.config.request_timeout(),
        )
        .await
        {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "classification call failed, defaulting to modify");
                return (Intent::Modify, FALLBACK_DEFAULT_CONFIDENCE);
            }
        };

        let token = reply
            .split_whitespace()
            .next()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .unwrap_or("");

        match Intent::from_token(token) {
            Some(intent) => (intent, FALLBACK_KNOWN_CONFIDENCE),
            None => (Intent::Modify, FALLBACK_DEFAULT_CONFIDENCE),
        }
    }
}

/// Case-insensitive scan against the keyword sets, first hit wins.
fn keyword_match(instruction: &str) -> Option<Intent> {
    let lower = instruction.to_lowercase();
    for (intent, keywords) in KEYWORD_SETS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Some(*intent);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::GenerateOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedBackend {
        reply: String,
        calls: AtomicU32,
    }

    impl FixedBackend {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for FixedBackend {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct DownBackend;

    #[async_trait]
    impl ModelBackend for DownBackend {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> anyhow::Result<String> {
            Err(crate::error::EngineError::BackendUnavailable("down".to_string()).into())
        }
    }

    fn classifier(backend: Arc<dyn ModelBackend>) -> IntentClassifier {
        IntentClassifier::new(backend, Config::default())
    }

    #[tokio::test]
    async fn test_add_keyword_fast_path() {
        let backend = Arc::new(FixedBackend::new("unused"));
        let c = classifier(backend.clone());
        let r = c.classify("add dropout layers").await;
        assert_eq!(r.intent, Intent::Add);
        assert_eq!(r.source, ClassificationSource::Keyword);
        assert_eq!(r.confidence, 1.0);
        // Fast path makes no outbound call
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fix_keyword_fast_path() {
        let c = classifier(Arc::new(FixedBackend::new("unused")));
        let r = c.classify("please fix the crash").await;
        assert_eq!(r.intent, Intent::Fix);
        assert_eq!(r.source, ClassificationSource::Keyword);
    }

    #[tokio::test]
    async fn test_fix_beats_add_on_tie() {
        let c = classifier(Arc::new(FixedBackend::new("unused")));
        let r = c.classify("fix the parser and add a regression test").await;
        assert_eq!(r.intent, Intent::Fix);
    }

    #[tokio::test]
    async fn test_multiword_keyword_matches() {
        let c = classifier(Arc::new(FixedBackend::new("unused")));
        let r = c.classify("what does this module do?").await;
        assert_eq!(r.intent, Intent::Explain);
    }

    #[tokio::test]
    async fn test_ambiguous_instruction_uses_model_fallback() {
        let backend = Arc::new(FixedBackend::new("refactor"));
        let c = classifier(backend.clone());
        let r = c.classify("make it better somehow").await;
        assert_eq!(r.intent, Intent::Refactor);
        assert_eq!(r.source, ClassificationSource::ModelFallback);
        assert!(r.confidence < 1.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_takes_first_token_only() {
        let c = classifier(Arc::new(FixedBackend::new(
            "optimize. The instruction asks for speed improvements.",
        )));
        let r = c.classify("make it nicer somehow").await;
        assert_eq!(r.intent, Intent::Optimize);
    }

    #[tokio::test]
    async fn test_unknown_token_defaults_to_modify() {
        let c = classifier(Arc::new(FixedBackend::new("banana")));
        let r = c.classify("make it nicer somehow").await;
        assert_eq!(r.intent, Intent::Modify);
        assert!(r.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_backend_failure_defaults_to_modify() {
        let c = classifier(Arc::new(DownBackend));
        let r = c.classify("make it nicer somehow").await;
        assert_eq!(r.intent, Intent::Modify);
        assert_eq!(r.source, ClassificationSource::ModelFallback);
    }

    #[tokio::test]
    async fn test_empty_reply_defaults_to_modify() {
        let c = classifier(Arc::new(FixedBackend::new("")));
        let r = c.classify("make it nicer somehow").await;
        assert_eq!(r.intent, Intent::Modify);
    }
}
