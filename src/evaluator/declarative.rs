//! Declarative rules: a static JSON edit list with `${...}` templates.
//!
//! ```json
//! {"edits": [
//!   {"name": "ts", "value": "${timestamp}", "location": "PARAM_URL", "action": "OVERRIDE"},
//!   {"name": "X-Debug", "location": 10, "action": 4}
//! ]}
//! ```

use super::EvalError;
use crate::binding::RequestBinding;
use crate::model::{EditAction, EditParameter, ParameterLocation, INVALID_CODE};
use serde::Deserialize;

/// Content accepted for a declarative rule.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Content {
    List(Vec<DeclarativeEdit>),
    Wrapped { edits: Vec<DeclarativeEdit> },
}

/// A location or action given either as its code or its name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Code {
    Number(i64),
    Name(String),
}

/// One edit template.
#[derive(Debug, Clone, Deserialize)]
pub struct DeclarativeEdit {
    #[serde(default)]
    pub name: String,
    /// Value template
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    location: Option<Code>,
    #[serde(default)]
    action: Option<Code>,
}

impl DeclarativeEdit {
    pub fn location_code(&self) -> i64 {
        match &self.location {
            Some(Code::Number(code)) => *code,
            Some(Code::Name(name)) => ParameterLocation::from_name(name)
                .map(ParameterLocation::code)
                .unwrap_or(INVALID_CODE),
            None => INVALID_CODE,
        }
    }

    pub fn action_code(&self) -> i64 {
        match &self.action {
            Some(Code::Number(code)) => *code,
            Some(Code::Name(name)) => EditAction::from_name(name)
                .map(EditAction::code)
                .unwrap_or(INVALID_CODE),
            None => INVALID_CODE,
        }
    }

    /// Resolve the value template against a request.
    pub fn render(&self, binding: &RequestBinding) -> EditParameter {
        EditParameter {
            name: self.name.clone(),
            value: binding.interpolate(&self.value),
            location: self.location_code(),
            action: self.action_code(),
        }
    }

    /// Describe why this edit can never apply, if it can't.
    pub fn problem(&self) -> Option<String> {
        let location = self.location_code();
        let action = self.action_code();

        if ParameterLocation::from_code(location).is_none() {
            return Some(format!("unknown location {:?} for '{}'", self.location, self.name));
        }
        if EditAction::from_code(action).is_none() {
            return Some(format!("unknown action {:?} for '{}'", self.action, self.name));
        }
        None
    }
}

/// Parse declarative rule content.
pub fn parse_declarative(content: &str) -> Result<Vec<DeclarativeEdit>, EvalError> {
    let content: Content = serde_json::from_str(content)?;
    Ok(match content {
        Content::List(edits) => edits,
        Content::Wrapped { edits } => edits,
    })
}
