//! Rule evaluation: turn a rule plus a request binding into edits.

mod declarative;
mod script;

pub use declarative::{parse_declarative, DeclarativeEdit};
pub use script::edits_from_envelope;

use crate::binding::RequestBinding;
use crate::model::{EditParameter, RuleKind, SignRule};
use crate::script::{ScriptEngine, ScriptError};
use std::sync::Arc;
use tracing::debug;

/// Trait for computing the edits a rule wants applied.
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate a rule against a request.
    fn evaluate(
        &self,
        binding: &RequestBinding,
        rule: &SignRule,
    ) -> Result<Vec<EditParameter>, EvalError>;
}

/// Evaluator dispatching on the rule kind.
pub struct Evaluator {
    engine: Arc<dyn ScriptEngine>,
}

impl Evaluator {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine }
    }
}

impl RuleEvaluator for Evaluator {
    fn evaluate(
        &self,
        binding: &RequestBinding,
        rule: &SignRule,
    ) -> Result<Vec<EditParameter>, EvalError> {
        let edits = match rule.kind {
            RuleKind::Script => {
                let envelope = self.engine.evaluate(&rule.content, binding, &rule.name)?;
                edits_from_envelope(&envelope)?
            }
            RuleKind::Declarative => parse_declarative(&rule.content)?
                .iter()
                .map(|edit| edit.render(binding))
                .collect(),
        };

        debug!(rule = %rule.name, edits = edits.len(), "Rule evaluated");
        Ok(edits)
    }
}

/// Errors that can occur while evaluating a rule.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Script reported failure: {0}")]
    ScriptFailed(String),

    #[error("Invalid script result: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid edit at index {index}: {reason}")]
    InvalidEdit { index: usize, reason: String },

    #[error("Invalid declarative rule: {0}")]
    InvalidDeclarative(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::model::{EditAction, ParameterLocation, ToolFlag};
    use serde_json::{json, Value as JsonValue};

    /// Returns a fixed envelope regardless of the script.
    struct FixedEngine(JsonValue);

    impl ScriptEngine for FixedEngine {
        fn evaluate(
            &self,
            _script: &str,
            _binding: &RequestBinding,
            _rule: &str,
        ) -> Result<JsonValue, ScriptError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEngine;

    impl ScriptEngine for FailingEngine {
        fn evaluate(
            &self,
            _script: &str,
            _binding: &RequestBinding,
            _rule: &str,
        ) -> Result<JsonValue, ScriptError> {
            Err(ScriptError::Compile("unexpected token".to_string()))
        }
    }

    fn binding() -> RequestBinding {
        let raw = b"GET /x?a=1 HTTP/1.1\r\nHost: h\r\n\r\n";
        RequestBinding::build(raw, None, &Settings::default()).unwrap()
    }

    #[test]
    fn test_script_rule_uses_engine() {
        let engine = FixedEngine(json!({
            "success": true,
            "error": "",
            "data": [{ "name": "sign", "value": "x", "location": 0, "action": 3 }]
        }));
        let evaluator = Evaluator::new(Arc::new(engine));
        let rule = SignRule::script("r", ".*", "ignored", ToolFlag::PROXY);

        let edits = evaluator.evaluate(&binding(), &rule).unwrap();
        assert_eq!(
            edits,
            vec![EditParameter::new("sign", "x", ParameterLocation::Url, EditAction::Override)]
        );
    }

    #[test]
    fn test_engine_failure_propagates() {
        let evaluator = Evaluator::new(Arc::new(FailingEngine));
        let rule = SignRule::script("r", ".*", "ignored", ToolFlag::PROXY);

        assert!(matches!(
            evaluator.evaluate(&binding(), &rule),
            Err(EvalError::Script(ScriptError::Compile(_)))
        ));
    }

    #[test]
    fn test_declarative_rule_interpolates() {
        let evaluator = Evaluator::new(Arc::new(FailingEngine));
        let rule = SignRule::declarative(
            "d",
            ".*",
            r#"[{"name": "X-Path", "value": "${request.path}",
                 "location": "HEADER", "action": "OVERRIDE"}]"#,
            ToolFlag::PROXY,
        );

        let edits = evaluator.evaluate(&binding(), &rule).unwrap();
        assert_eq!(
            edits,
            vec![EditParameter::new(
                "X-Path",
                "/x",
                ParameterLocation::Header,
                EditAction::Override
            )]
        );
    }
}
