use serde::Serialize;

/// Outcome of an evaluation. Ordered so that `max` picks the stricter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[default]
    Approve,
    Block,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Block => "block",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Block => "BLOCK",
        }
    }
}

/// The single response written back to the host per invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Detailed report for the blocking channel (stderr). Never serialized.
    #[serde(skip)]
    pub details: Option<String>,
}

impl HookResponse {
    pub fn approve() -> Self {
        Self::default()
    }

    pub fn approve_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Block,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }

    /// Text for stderr when blocking: the detailed report if any, else the reason.
    pub fn blocking_output(&self) -> String {
        self.details
            .clone()
            .or_else(|| self.reason.clone())
            .unwrap_or_else(|| String::from("blocked"))
    }
}
