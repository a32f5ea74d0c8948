//! URL filter matching.

use super::{MatchTarget, Matcher, MatcherError};
use regex::Regex;

/// Compiled URL filter.
///
/// The filter is searched anywhere in the absolute URL, so `example\.com`
/// matches `https://api.example.com/x`. Anchors are up to the rule author.
pub struct UrlMatcher {
    regex: Regex,
}

impl UrlMatcher {
    /// Compile a URL filter.
    pub fn compile(filter: &str) -> Result<Self, MatcherError> {
        Ok(Self {
            regex: Regex::new(filter)?,
        })
    }

    /// Check a URL directly.
    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl Matcher for UrlMatcher {
    fn matches(&self, target: &MatchTarget<'_>) -> bool {
        self.is_match(target.url)
    }

    fn name(&self) -> &'static str {
        "url"
    }
}
