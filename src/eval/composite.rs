use std::sync::Arc;

use async_trait::async_trait;

use super::{EngineError, EvalContext, HookResponse, RuleEngine};
use crate::protocol::HookMessage;

/// Runs engines in order. The first block wins; otherwise messages are merged.
#[derive(Clone, Default)]
pub struct CompositeRuleEngine {
    engines: Vec<Arc<dyn RuleEngine>>,
}

impl CompositeRuleEngine {
    pub fn new(engines: Vec<Arc<dyn RuleEngine>>) -> Self {
        Self { engines }
    }

    pub fn push(&mut self, engine: Arc<dyn RuleEngine>) {
        self.engines.push(engine);
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[async_trait]
impl RuleEngine for CompositeRuleEngine {
    fn name(&self) -> &str {
        "composite"
    }

    async fn evaluate(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        let mut messages = Vec::new();
        for engine in &self.engines {
            let response = engine.evaluate(msg, ctx).await?;
            if response.is_block() {
                log::debug!("{} blocked {}", engine.name(), msg.tool_name);
                return Ok(response);
            }
            if let Some(m) = response.message.filter(|m| !m.is_empty()) {
                messages.push(m);
            }
        }
        if messages.is_empty() {
            Ok(HookResponse::approve())
        } else {
            Ok(HookResponse::approve_with_message(messages.join("\n")))
        }
    }
}
