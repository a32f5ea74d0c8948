//! Configuration types for the Sign agent.

use crate::evaluator::parse_declarative;
use crate::matcher::UrlMatcher;
use crate::model::{RuleKind, SignRule};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the Sign agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Signing rules, seeded into the rule store
    pub rules: Vec<SignRule>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            rules: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Protocol assumed when the host gives no service
    pub default_protocol: String,
    /// Port assumed when the host gives no service
    pub default_port: u16,
    /// Script sandbox limits
    pub script: ScriptSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_protocol: "https".to_string(),
            default_port: 443,
            script: ScriptSettings::default(),
        }
    }
}

/// Limits applied to rule scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Maximum operations per evaluation
    pub max_operations: u64,
    /// Maximum function call depth
    pub max_call_levels: usize,
    /// Maximum expression nesting depth
    pub max_expr_depth: usize,
    /// Maximum string length (bytes)
    pub max_string_size: usize,
    /// Connect and read timeout for `http::` calls (seconds)
    pub http_timeout_secs: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 10 * 1024 * 1024, // 10MB
            http_timeout_secs: 12,
        }
    }
}

impl SignerConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    /// Check every rule: names, filters and declarative contents.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.settings.default_protocol.as_str(), "http" | "https") {
            return Err(ConfigError::InvalidSetting(format!(
                "default_protocol must be 'http' or 'https', got '{}'",
                self.settings.default_protocol
            )));
        }
        if self.settings.default_port == 0 {
            return Err(ConfigError::InvalidSetting("default_port must be in 1..65535".to_string()));
        }

        for rule in &self.rules {
            validate_rule(rule)?;
        }
        Ok(())
    }
}

/// Check a single rule.
pub fn validate_rule(rule: &SignRule) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRule {
        rule: rule.name.clone(),
        reason,
    };

    if rule.name.trim().is_empty() {
        return Err(invalid("name is required".to_string()));
    }
    if rule.content.trim().is_empty() {
        return Err(invalid("content is required".to_string()));
    }

    UrlMatcher::compile(&rule.filter).map_err(|e| invalid(e.to_string()))?;

    if rule.kind == RuleKind::Declarative {
        let edits = parse_declarative(&rule.content).map_err(|e| invalid(e.to_string()))?;
        if let Some(problem) = edits.iter().find_map(|edit| edit.problem()) {
            return Err(invalid(problem));
        }
    }

    Ok(())
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}
