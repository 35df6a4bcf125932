//! The conversation model both wire formats converge on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation inside an assistant turn.
///
/// A call is pending while `output` is `None` and resolved once the
/// matching result has been backfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolCall {
    pub fn pending(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
            output: None,
            duration_ms: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.output.is_none()
    }
}

/// One turn of an agent run: either an assistant turn or the terminal
/// result. A turn list is owned by exactly one run and written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationTurn {
    #[serde(rename_all = "camelCase")]
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        num_turns: Option<u32>,
    },
}

impl ConversationTurn {
    /// Result text if this is the terminal turn.
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Self::Result { text, .. } => Some(text),
            Self::Assistant { .. } => None,
        }
    }
}
