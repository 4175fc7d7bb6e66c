//! mend library crate
//!
//! Exposes the response-interpretation engine so library embedders can
//! drive validation, repair, and routing without going through the CLI.

pub mod cache;
pub mod config;
pub mod error;
pub mod intent;
pub mod llm;
pub mod review;
pub mod util;

pub use config::Config;
pub use error::EngineError;
pub use intent::{ClassifiedRequest, Intent, IntentClassifier, RequestRouter, RoutedResult};
pub use review::{IssueDetector, RepairController, ReviewVerdict};
