//! Request processing pipeline.
//!
//! For every intercepted request from a tool some rule covers: build the
//! binding, select at most one rule, evaluate it, and apply the resulting
//! edits. Every failure on this
//! path is logged and counted, and the request passes through unmodified.

use crate::binding::{HttpService, RequestBinding};
use crate::config::{ConfigError, Settings, SignerConfig};
use crate::evaluator::{EvalError, Evaluator, RuleEvaluator};
use crate::matcher::{select_rule, MatchOutcome};
use crate::message::MessageError;
use crate::model::ToolFlag;
use crate::script::{RhaiEngine, ScriptError};
use crate::store::{MemoryRuleStore, RuleStore, StoreError};
use crate::transformer::{EditApplier, TransformError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// A message handed over by the host proxy.
pub trait InterceptedMessage {
    /// Whether this is the request direction.
    fn is_request(&self) -> bool;

    /// Raw request bytes.
    fn request(&self) -> Vec<u8>;

    /// Replace the request bytes.
    fn set_request(&mut self, request: Vec<u8>);

    /// Target service, when the host knows it.
    fn http_service(&self) -> Option<HttpService>;
}

/// Input of an ad-hoc rule test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestRequest {
    pub rule_id: i64,
    pub raw_request: String,
    pub host: String,
    pub port: i64,
    pub protocol: String,
}

impl RuleTestRequest {
    fn validate(&self) -> Result<(), SignerError> {
        let invalid = |msg: &str| Err(SignerError::InvalidTestRequest(msg.to_string()));

        if self.raw_request.trim().is_empty() {
            return invalid("rawRequest is required");
        }
        if self.host.trim().is_empty() {
            return invalid("host is required");
        }
        if !matches!(self.protocol.as_str(), "http" | "https") {
            return invalid("protocol is required and must be 'http' or 'https'");
        }
        if !(1..=65535).contains(&self.port) {
            return invalid("port is required and must be in 1..65535");
        }
        if self.rule_id < 1 {
            return invalid("ruleId is required");
        }
        Ok(())
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetrics {
    pub requests_total: u64,
    pub requests_signed: u64,
    pub sign_errors: u64,
    pub ambiguous_matches: u64,
}

/// Sign pipeline.
///
/// `Send + Sync`; the host may call it from one thread per in-flight request.
pub struct SignPipeline {
    /// Binding defaults
    settings: Settings,
    /// Rule source
    store: Arc<dyn RuleStore>,
    /// Rule evaluator
    evaluator: Arc<dyn RuleEvaluator>,
    /// Edit applier
    applier: EditApplier,
    /// Metrics: total requests seen.
    requests_total: AtomicU64,
    /// Metrics: total requests rewritten.
    requests_signed: AtomicU64,
    /// Metrics: evaluation, analysis and edit failures.
    sign_errors: AtomicU64,
    /// Metrics: requests matched by more than one rule.
    ambiguous_matches: AtomicU64,
}

impl SignPipeline {
    /// Create a pipeline from its collaborators.
    pub fn new(
        settings: Settings,
        store: Arc<dyn RuleStore>,
        evaluator: Arc<dyn RuleEvaluator>,
    ) -> Self {
        Self {
            settings,
            store,
            evaluator,
            applier: EditApplier::new(),
            requests_total: AtomicU64::new(0),
            requests_signed: AtomicU64::new(0),
            sign_errors: AtomicU64::new(0),
            ambiguous_matches: AtomicU64::new(0),
        }
    }

    /// Create a pipeline from configuration.
    ///
    /// The configured rules seed an in-memory store, which is returned too so
    /// the caller can keep managing rules.
    pub fn from_config(
        config: SignerConfig,
    ) -> Result<(Self, Arc<MemoryRuleStore>), SignerError> {
        config.validate()?;

        let store = Arc::new(MemoryRuleStore::from_rules(config.rules)?);
        let engine = RhaiEngine::new(&config.settings.script)?;
        let evaluator = Arc::new(Evaluator::new(Arc::new(engine)));

        info!(
            rules = store.len(),
            default_protocol = %config.settings.default_protocol,
            default_port = config.settings.default_port,
            "Sign pipeline initialized"
        );

        let pipeline = Self::new(config.settings, store.clone(), evaluator);
        Ok((pipeline, store))
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<(Self, Arc<MemoryRuleStore>), SignerError> {
        let config: SignerConfig = serde_yaml::from_str(yaml).map_err(ConfigError::from)?;
        Self::from_config(config)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<(Self, Arc<MemoryRuleStore>), SignerError> {
        let config: SignerConfig = serde_json::from_str(json).map_err(ConfigError::from)?;
        Self::from_config(config)
    }

    /// Host entry point. Rewrites the request in place when a rule applies.
    pub fn on_request(&self, tool_flag: ToolFlag, message: &mut dyn InterceptedMessage) {
        if !message.is_request() {
            return;
        }

        let raw = message.request();
        if raw.is_empty() {
            return;
        }

        let service = message.http_service();
        if let Some(signed) = self.process_request(tool_flag, &raw, service.as_ref()) {
            message.set_request(signed);
        }
    }

    /// Process raw request bytes. `None` means pass through unchanged.
    pub fn process_request(
        &self,
        tool_flag: ToolFlag,
        raw: &[u8],
        service: Option<&HttpService>,
    ) -> Option<Vec<u8>> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if raw.is_empty() {
            return None;
        }

        // Requests from tools no rule covers are not analyzed at all
        let rules = self.store.list_active_rules();
        if !rules.iter().any(|rule| rule.tool_flag.intersects(tool_flag)) {
            trace!(tool = %tool_flag, "No sign rule for tool");
            return None;
        }

        let binding = match RequestBinding::build(raw, service, &self.settings) {
            Ok(binding) => binding,
            Err(e) => {
                warn!(tool = %tool_flag, error = %e, "Failed to analyze request");
                self.sign_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let rule = match select_rule(&rules, &binding.url, tool_flag) {
            MatchOutcome::Matched(rule) => rule,
            MatchOutcome::NoMatch => {
                trace!(url = %binding.url, tool = %tool_flag, "No matching sign rule");
                return None;
            }
            MatchOutcome::Ambiguous(names) => {
                warn!(
                    url = %binding.url,
                    tool = %tool_flag,
                    rules = ?names,
                    "Multiple sign rules match; leaving request unchanged"
                );
                self.ambiguous_matches.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        debug!(rule = %rule.name, url = %binding.url, tool = %tool_flag, "Matched sign rule");

        let edits = match self.evaluator.evaluate(&binding, &rule) {
            Ok(edits) => edits,
            Err(e) => {
                error!(
                    rule = %rule.name,
                    url = %binding.url,
                    error = %e,
                    "Sign rule evaluation failed"
                );
                self.sign_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if edits.is_empty() {
            debug!(rule = %rule.name, "Sign rule produced no edits");
            return None;
        }

        for edit in &edits {
            debug!(rule = %rule.name, edit = %edit, value = %edit.value, "Edit");
        }

        match self.applier.apply(&edits, raw) {
            Ok(signed) => {
                self.requests_signed.fetch_add(1, Ordering::Relaxed);
                info!(
                    rule = %rule.name,
                    url = %binding.url,
                    edits = edits.len(),
                    "Applied sign rule"
                );
                Some(signed)
            }
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "Failed to apply edits");
                self.sign_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Run one rule against a supplied request, bypassing matching.
    ///
    /// Returns the resulting request text. Unlike [`Self::process_request`],
    /// failures are returned to the caller.
    pub fn test_rule(&self, request: &RuleTestRequest) -> Result<String, SignerError> {
        request.validate()?;

        let rule = u64::try_from(request.rule_id)
            .ok()
            .and_then(|id| self.store.get_rule_by_id(id))
            .filter(|rule| rule.enabled)
            .ok_or(SignerError::RuleNotFound(request.rule_id))?;

        let port = u16::try_from(request.port)
            .map_err(|_| SignerError::InvalidTestRequest("port must be in 1..65535".to_string()))?;
        let service = HttpService::new(request.host.clone(), port, request.protocol.clone());
        let raw = request.raw_request.as_bytes();

        let binding = RequestBinding::build(raw, Some(&service), &self.settings)?;
        let edits = self.evaluator.evaluate(&binding, &rule)?;

        debug!(rule = %rule.name, edits = edits.len(), "Testing sign rule");

        if edits.is_empty() {
            return Ok(request.raw_request.clone());
        }

        let signed = self.applier.apply(&edits, raw)?;
        Ok(String::from_utf8_lossy(&signed).into_owned())
    }

    /// Current counter values.
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_signed: self.requests_signed.load(Ordering::Relaxed),
            sign_errors: self.sign_errors.load(Ordering::Relaxed),
            ambiguous_matches: self.ambiguous_matches.load(Ordering::Relaxed),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Sign agent errors.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),

    #[error("Script engine error: {0}")]
    Script(#[from] ScriptError),

    #[error("Request error: {0}")]
    Message(#[from] MessageError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Edit error: {0}")]
    Transform(#[from] TransformError),

    #[error("Invalid test request: {0}")]
    InvalidTestRequest(String),

    #[error("Rule {0} does not exist or is disabled")]
    RuleNotFound(i64),
}
