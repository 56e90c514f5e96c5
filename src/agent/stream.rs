//! Line-delimited JSON emitted by the agent CLI in `stream-json` mode.

use serde::Deserialize;

/// One line of agent output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    Assistant {
        message: AssistantBody,
    },
    #[serde(rename = "result")]
    Finished(ResultMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Terminal message of a run.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

/// An entry of the agent's todo list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Todo {
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl StreamMessage {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

impl ContentBlock {
    /// The todo list carried by a `TodoWrite` tool call.
    pub fn todos(&self) -> Option<Vec<Todo>> {
        match self {
            ContentBlock::ToolUse { name, input } if name == "TodoWrite" => {
                serde_json::from_value(input.get("todos")?.clone()).ok()
            }
            _ => None,
        }
    }
}
