//! Tool flag matching.

use super::{MatchTarget, Matcher};
use crate::model::ToolFlag;

/// Matches when the calling tool is one the rule applies to.
pub struct ToolMatcher {
    allowed: ToolFlag,
}

impl ToolMatcher {
    pub fn new(allowed: ToolFlag) -> Self {
        Self { allowed }
    }
}

impl Matcher for ToolMatcher {
    fn matches(&self, target: &MatchTarget<'_>) -> bool {
        self.allowed.intersects(target.tool_flag)
    }

    fn name(&self) -> &'static str {
        "tool"
    }
}
