//! Request routing
//!
//! Dispatches a classified intent to its handling strategy through an
//! exhaustive match - no duck-typed lookup, no implicit default beyond
//! the `modify` family. Which intent and handler served a request is
//! logged for every request; misrouting has bitten before, so the
//! observability is contractual.

use super::{ClassifiedRequest, Intent};
use crate::config::Config;
use crate::llm::client::{generate_with_timeout, GenerateOptions, ModelBackend};
use crate::llm::extract::extract_code;
use crate::llm::prompts::{ADDITION_SYSTEM, EXPLAIN_SYSTEM, MODIFICATION_SYSTEM};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// The uniform result shape every handler reply is normalized into.
#[derive(Debug, Clone)]
pub struct RoutedResult {
    pub request_id: Uuid,
    pub intent: Intent,
    /// Name of the handler that served the request.
    pub handler: &'static str,
    /// The handler's reply text.
    pub text: String,
    /// Extracted code, when the handler's contract promises code.
    pub code: Option<String>,
}

/// A handling strategy. Handlers are capability-typed collaborators:
/// they receive the artifact and instruction and return free text or
/// code, nothing more.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this handler's contract promises code in its reply.
    fn yields_code(&self) -> bool;

    async fn handle(&self, artifact: &str, instruction: &str) -> anyhow::Result<String>;
}

/// Default handler implementation: one backend call with a
/// strategy-specific system prompt. The three shipped strategies differ
/// only in prompt and whether they promise code back.
pub struct BackendHandler {
    label: &'static str,
    system: &'static str,
    yields_code: bool,
    backend: Arc<dyn ModelBackend>,
    config: Config,
}

impl BackendHandler {
    pub fn explanation(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            label: "explanation",
            system: EXPLAIN_SYSTEM,
            yields_code: false,
            backend,
            config,
        }
    }

    pub fn addition(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            label: "addition",
            system: ADDITION_SYSTEM,
            yields_code: true,
            backend,
            config,
        }
    }

    pub fn modification(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            label: "modification",
            system: MODIFICATION_SYSTEM,
            yields_code: true,
            backend,
            config,
        }
    }
}

#[async_trait]
impl RequestHandler for BackendHandler {
    fn name(&self) -> &'static str {
        self.label
    }

    fn yields_code(&self) -> bool {
        self.yields_code
    }

    async fn handle(&self, artifact: &str, instruction: &str) -> anyhow::Result<String> {
        let user = format!(
            "Instruction: {}\n\nCode:\n```\n{}\n```",
            instruction, artifact
        );
        let options = GenerateOptions {
            model: self.config.reviewer_model.clone(),
            json_mode: false,
        };
        generate_with_timeout(
            self.backend.as_ref(),
            self.system,
            &user,
            &options,
            self.config.request_timeout(),
        )
        .await
    }
}

pub struct RequestRouter {
    explanation: Box<dyn RequestHandler>,
    addition: Box<dyn RequestHandler>,
    modification: Box<dyn RequestHandler>,
}

impl RequestRouter {
    /// Router wired to the default backend-calling handlers.
    pub fn new(backend: Arc<dyn ModelBackend>, config: Config) -> Self {
        Self {
            explanation: Box::new(BackendHandler::explanation(backend.clone(), config.clone())),
            addition: Box::new(BackendHandler::addition(backend.clone(), config.clone())),
            modification: Box::new(BackendHandler::modification(backend, config)),
        }
    }

    /// Router with caller-supplied handlers.
    pub fn with_handlers(
        explanation: Box<dyn RequestHandler>,
        addition: Box<dyn RequestHandler>,
        modification: Box<dyn RequestHandler>,
    ) -> Self {
        Self {
            explanation,
            addition,
            modification,
        }
    }

    /// Dispatch a classified request and normalize the handler's reply.
    pub async fn route(
        &self,
        classified: &ClassifiedRequest,
        artifact: &str,
    ) -> anyhow::Result<RoutedResult> {
        let handler = match classified.intent {
            Intent::Explain => &self.explanation,
            Intent::Add => &self.addition,
            Intent::Fix | Intent::Optimize | Intent::Refactor | Intent::Modify => {
                &self.modification
            }
        };

        let request_id = Uuid::new_v4();
        tracing::info!(
            %request_id,
            intent = classified.intent.label(),
            handler = handler.name(),
            source = ?classified.source,
            confidence = classified.confidence,
            "routing request"
        );

        let text = handler.handle(artifact, &classified.raw_text).await?;

        let code = if handler.yields_code() {
            let extracted = extract_code(&text);
            if extracted.is_none() {
                tracing::warn!(
                    %request_id,
                    handler = handler.name(),
                    "handler promised code but none was extractable"
                );
            }
            extracted
        } else {
            None
        };

        Ok(RoutedResult {
            request_id,
            intent: classified.intent,
            handler: handler.name(),
            text,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::ClassificationSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubHandler {
        label: &'static str,
        reply: &'static str,
        yields_code: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RequestHandler for StubHandler {
        fn name(&self) -> &'static str {
            self.label
        }

        fn yields_code(&self) -> bool {
            self.yields_code
        }

        async fn handle(&self, _artifact: &str, _instruction: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    struct Counters {
        explanation: Arc<AtomicU32>,
        addition: Arc<AtomicU32>,
        modification: Arc<AtomicU32>,
    }

    fn router_with_stubs() -> (RequestRouter, Counters) {
        let counters = Counters {
            explanation: Arc::new(AtomicU32::new(0)),
            addition: Arc::new(AtomicU32::new(0)),
            modification: Arc::new(AtomicU32::new(0)),
        };
        let router = RequestRouter::with_handlers(
            Box::new(StubHandler {
                label: "explanation",
                reply: "This module parses replies.",
                yields_code: false,
                calls: counters.explanation.clone(),
            }),
            Box::new(StubHandler {
                label: "addition",
                reply: "Added:\n```python\ndef added():\n    return True\n```",
                yields_code: true,
                calls: counters.addition.clone(),
            }),
            Box::new(StubHandler {
                label: "modification",
                reply: "```python\nmodified = True\nvalue = 1\n```",
                yields_code: true,
                calls: counters.modification.clone(),
            }),
        );
        (router, counters)
    }

    fn classified(intent: Intent) -> ClassifiedRequest {
        ClassifiedRequest {
            raw_text: "do the thing".to_string(),
            intent,
            source: ClassificationSource::Keyword,
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn test_explain_routes_to_explanation_handler() {
        let (router, counters) = router_with_stubs();
        let result = router
            .route(&classified(Intent::Explain), "x = 1")
            .await
            .unwrap();
        assert_eq!(result.handler, "explanation");
        assert_eq!(result.code, None);
        assert_eq!(counters.explanation.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_routes_to_addition_handler_and_extracts_code() {
        let (router, counters) = router_with_stubs();
        let result = router
            .route(&classified(Intent::Add), "x = 1")
            .await
            .unwrap();
        assert_eq!(result.handler, "addition");
        assert!(result.code.as_deref().unwrap().contains("def added()"));
        assert_eq!(counters.addition.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_modify_family_routes_to_modification_handler() {
        let (router, counters) = router_with_stubs();
        for intent in [Intent::Fix, Intent::Optimize, Intent::Refactor, Intent::Modify] {
            let result = router.route(&classified(intent), "x = 1").await.unwrap();
            assert_eq!(result.handler, "modification");
            assert_eq!(result.intent, intent);
        }
        assert_eq!(counters.modification.load(Ordering::SeqCst), 4);
        assert_eq!(counters.explanation.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_promised_code_missing_is_not_an_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = RequestRouter::with_handlers(
            Box::new(StubHandler {
                label: "explanation",
                reply: "n/a",
                yields_code: false,
                calls: calls.clone(),
            }),
            Box::new(StubHandler {
                label: "addition",
                reply: "I did not change anything, the request was unclear.",
                yields_code: true,
                calls: calls.clone(),
            }),
            Box::new(StubHandler {
                label: "modification",
                reply: "n/a",
                yields_code: true,
                calls,
            }),
        );

        let result = router
            .route(&classified(Intent::Add), "x = 1")
            .await
            .unwrap();
        assert_eq!(result.code, None);
        assert!(!result.text.is_empty());
    }

    #[tokio::test]
    async fn test_request_ids_are_unique_per_request() {
        let (router, _) = router_with_stubs();
        let a = router
            .route(&classified(Intent::Explain), "x = 1")
            .await
            .unwrap();
        let b = router
            .route(&classified(Intent::Explain), "x = 1")
            .await
            .unwrap();
        assert_ne!(a.request_id, b.request_id);
    }
}
