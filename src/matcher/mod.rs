//! Rule matching.
//!
//! A rule applies to a request when it is enabled, its tool flag shares a
//! bit with the calling tool, and its filter regex is found in the absolute
//! URL. At most one rule may apply; several is a configuration conflict.

mod tool;
mod url;

pub use tool::ToolMatcher;
pub use url::UrlMatcher;

use crate::model::{SignRule, ToolFlag};
use tracing::{trace, warn};

/// What a matcher is checked against.
#[derive(Debug, Clone, Copy)]
pub struct MatchTarget<'a> {
    /// Absolute request URL
    pub url: &'a str,
    /// Tool that produced the request
    pub tool_flag: ToolFlag,
}

/// Trait for a single matching condition.
pub trait Matcher: Send + Sync {
    /// Check if this matcher matches the given target.
    fn matches(&self, target: &MatchTarget<'_>) -> bool;

    /// Get the matcher name for debugging.
    fn name(&self) -> &'static str;
}

/// Result of selecting a rule for a request.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// No rule applies
    NoMatch,
    /// Exactly one rule applies
    Matched(SignRule),
    /// Several rules apply; carries their names
    Ambiguous(Vec<String>),
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// A rule's conditions, compiled.
pub struct CompiledMatcher {
    enabled: bool,
    conditions: Vec<Box<dyn Matcher>>,
}

impl CompiledMatcher {
    /// Compile the conditions of a rule.
    pub fn compile(rule: &SignRule) -> Result<Self, MatcherError> {
        let conditions: Vec<Box<dyn Matcher>> = vec![
            Box::new(ToolMatcher::new(rule.tool_flag)),
            Box::new(UrlMatcher::compile(&rule.filter)?),
        ];

        Ok(Self {
            enabled: rule.enabled,
            conditions,
        })
    }

    /// Check if the target satisfies every condition.
    pub fn matches(&self, target: &MatchTarget<'_>) -> bool {
        if !self.enabled {
            return false;
        }

        for condition in &self.conditions {
            if !condition.matches(target) {
                trace!(matcher = condition.name(), url = target.url, "Condition not met");
                return false;
            }
        }
        true
    }
}

/// Select the single rule that applies to a request.
///
/// Filters are compiled per call; a rule whose filter does not compile is
/// skipped with a warning.
pub fn select_rule(candidates: &[SignRule], url: &str, tool_flag: ToolFlag) -> MatchOutcome {
    let target = MatchTarget { url, tool_flag };
    let mut matched: Vec<&SignRule> = Vec::new();

    for rule in candidates {
        let compiled = match CompiledMatcher::compile(rule) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "Skipping rule with invalid filter");
                continue;
            }
        };

        if compiled.matches(&target) {
            matched.push(rule);
        }
    }

    match matched.as_slice() {
        [] => MatchOutcome::NoMatch,
        [rule] => MatchOutcome::Matched((*rule).clone()),
        many => MatchOutcome::Ambiguous(many.iter().map(|r| r.name.clone()).collect()),
    }
}

/// Errors that can occur during matcher compilation.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid filter pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}
