//! Configuration management for mend
//!
//! Stores settings in ~/.config/mend/config.json

use crate::review::Severity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BACKEND_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

fn default_reviewer_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_enable_auto_fix() -> bool {
    true
}

fn default_severity_threshold() -> Severity {
    Severity::Error
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model used for review, fix, and classification-fallback calls.
    #[serde(default = "default_reviewer_model")]
    pub reviewer_model: String,
    /// Hard ceiling on outbound repair calls per validation request.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// When false, validation reports issues but never requests fixes.
    #[serde(default = "default_enable_auto_fix")]
    pub enable_auto_fix: bool,
    /// Minimum severity that makes a verdict invalid.
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: Severity,
    /// Per-call time limit for outbound model calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Chat-completions endpoint.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// API key; the MEND_API_KEY / OPENROUTER_API_KEY environment
    /// variables take precedence over this field.
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reviewer_model: default_reviewer_model(),
            max_attempts: default_max_attempts(),
            enable_auto_fix: default_enable_auto_fix(),
            severity_threshold: default_severity_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            backend_url: default_backend_url(),
            api_key: None,
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mend"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content)?;
        }

        Ok(())
    }

    /// Resolve the API key: environment first, then config file.
    pub fn get_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("MEND_API_KEY") {
            return Some(key);
        }
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            return Some(key);
        }
        self.api_key.clone()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Config file location for display.
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/mend/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &std::path::Path, content: &str) -> anyhow::Result<()> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        eprintln!("  Warning: Failed to set temp config file permissions: {}", e);
    }

    file.write_all(content.as_bytes())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_attempts, 2);
        assert!(config.enable_auto_fix);
        assert_eq!(config.severity_threshold, Severity::Error);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"reviewer_model": "qwen/qwen-2.5-72b"}"#)
            .unwrap();
        assert_eq!(config.reviewer_model, "qwen/qwen-2.5-72b");
        assert_eq!(config.max_attempts, 2);
        assert!(config.enable_auto_fix);
    }

    #[test]
    fn test_severity_threshold_roundtrip() {
        let mut config = Config::default();
        config.severity_threshold = Severity::Warning;
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.severity_threshold, Severity::Warning);
    }
}
