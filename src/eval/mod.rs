pub mod base;
pub mod composite;
pub mod context;
pub mod decision;
pub mod linting;

pub use base::BaseRuleEngine;
pub use composite::CompositeRuleEngine;
pub use context::EvalContext;
pub use decision::{Decision, HookResponse};
pub use linting::LintingRuleEngine;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{EventType, HookMessage};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{engine} did not finish before the deadline")]
    Timeout { engine: String },
    #[error("{engine} failed: {message}")]
    Failed { engine: String, message: String },
}

/// The evaluate-and-decide contract shared by every engine.
///
/// Per-event hooks default to approving, so an engine only overrides the
/// events it cares about. [`RuleEngine::evaluate`] dispatches on the event type.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_tool_use(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        let _ = (msg, ctx);
        Ok(HookResponse::approve())
    }

    async fn post_tool_use(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        let _ = (msg, ctx);
        Ok(HookResponse::approve())
    }

    /// Notification, Stop, SubagentStop and PreCompact.
    async fn other_event(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        let _ = (msg, ctx);
        Ok(HookResponse::approve())
    }

    async fn evaluate(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        match msg.event_type {
            EventType::PreToolUse => self.pre_tool_use(msg, ctx).await,
            EventType::PostToolUse => self.post_tool_use(msg, ctx).await,
            _ => self.other_event(msg, ctx).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::protocol::decode;

    /// A hook message for `event` carrying `tool_input`.
    pub fn message(event: &str, tool: &str, tool_input: serde_json::Value) -> HookMessage {
        let doc = serde_json::json!({
            "session_id": "test-session",
            "transcript_path": "/tmp/transcript.jsonl",
            "hook_event_name": event,
            "tool_name": tool,
            "tool_input": tool_input,
        });
        decode(doc.to_string().as_bytes()).unwrap()
    }

    /// Engine returning a fixed response, for composition tests.
    pub struct FixedEngine {
        pub name: &'static str,
        pub response: HookResponse,
    }

    #[async_trait]
    impl RuleEngine for FixedEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(&self, _msg: &HookMessage, _ctx: &EvalContext) -> Result<HookResponse, EngineError> {
            Ok(self.response.clone())
        }
    }

    pub struct FailingEngine;

    #[async_trait]
    impl RuleEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        async fn evaluate(&self, _msg: &HookMessage, _ctx: &EvalContext) -> Result<HookResponse, EngineError> {
            Err(EngineError::Failed {
                engine: "failing".into(),
                message: "boom".into(),
            })
        }
    }
}
