use async_trait::async_trait;

use super::RuleEngine;

/// Approves everything. The fallback when nothing else is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseRuleEngine;

#[async_trait]
impl RuleEngine for BaseRuleEngine {
    fn name(&self) -> &str {
        "base"
    }
}
