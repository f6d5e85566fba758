//! Events emitted by a single run while it executes.
//!
//! These are what the per-run dispatch pipeline serializes. The wire shape is
//! internally tagged on `type` with `snake_case` names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in a run's stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run started.
    AgentStart,
    /// The run finished.
    AgentEnd {
        /// Error text if the run failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An assistant message started.
    MessageStart,
    /// Streaming text for the current message.
    MessageUpdate {
        /// Text delta.
        delta: String,
    },
    /// The current message finished.
    MessageEnd,
    /// A tool call is about to execute.
    #[serde(rename_all = "camelCase")]
    ToolExecutionStart {
        /// Tool call identifier.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Tool arguments.
        #[serde(default)]
        args: Value,
    },
    /// Partial output from an executing tool.
    #[serde(rename_all = "camelCase")]
    ToolExecutionUpdate {
        /// Tool call identifier.
        tool_call_id: String,
        /// Partial result payload.
        #[serde(default)]
        partial: Value,
    },
    /// A tool call finished.
    #[serde(rename_all = "camelCase")]
    ToolExecutionEnd {
        /// Tool call identifier.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Whether the tool reported an error.
        #[serde(default)]
        is_error: bool,
    },
    /// Context compaction started.
    CompactionStart,
    /// Context compaction finished.
    #[serde(rename_all = "camelCase")]
    CompactionEnd {
        /// Tokens reclaimed, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_saved: Option<u64>,
    },
}

impl RunEvent {
    /// The `type` tag of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::MessageStart => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
            Self::CompactionStart => "compaction_start",
            Self::CompactionEnd { .. } => "compaction_end",
        }
    }

    /// Whether this is a tool execution start.
    #[must_use]
    pub fn is_tool_start(&self) -> bool {
        matches!(self, Self::ToolExecutionStart { .. })
    }

    /// Shorthand constructor for a tool start event.
    #[must_use]
    pub fn tool_start(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> Self {
        Self::ToolExecutionStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_start_wire_shape() {
        let event = RunEvent::tool_start("tc-1", "bash", json!({"cmd": "ls"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_execution_start");
        assert_eq!(value["toolCallId"], "tc-1");
        assert_eq!(value["toolName"], "bash");
        assert_eq!(value["args"]["cmd"], "ls");
    }

    #[test]
    fn unit_variant_wire_shape() {
        let value = serde_json::to_value(RunEvent::AgentStart).unwrap();
        assert_eq!(value, json!({"type": "agent_start"}));
        let back: RunEvent = serde_json::from_value(json!({"type": "compaction_start"})).unwrap();
        assert_eq!(back, RunEvent::CompactionStart);
    }

    #[test]
    fn event_type_matches_tag() {
        let events = [
            RunEvent::AgentStart,
            RunEvent::AgentEnd { error: None },
            RunEvent::MessageStart,
            RunEvent::MessageUpdate { delta: "x".into() },
            RunEvent::MessageEnd,
            RunEvent::tool_start("a", "b", Value::Null),
            RunEvent::ToolExecutionUpdate {
                tool_call_id: "a".into(),
                partial: Value::Null,
            },
            RunEvent::ToolExecutionEnd {
                tool_call_id: "a".into(),
                tool_name: "b".into(),
                is_error: false,
            },
            RunEvent::CompactionStart,
            RunEvent::CompactionEnd { tokens_saved: Some(3) },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }

    #[test]
    fn only_tool_start_is_tool_start() {
        assert!(RunEvent::tool_start("a", "b", Value::Null).is_tool_start());
        assert!(!RunEvent::MessageStart.is_tool_start());
    }
}
