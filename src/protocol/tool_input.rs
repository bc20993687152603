use serde::Deserialize;
use serde_json::Value;

/// One replacement inside a `MultiEdit` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditOp {
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Tool input narrowed to the file-mutating tools this crate understands.
///
/// Decoding never fails: an unknown tool name, or a known tool whose input
/// does not have the expected shape, resolves to [`ToolInput::Other`] with
/// the raw value preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Write {
        file_path: String,
        content: String,
    },
    Edit {
        file_path: String,
        old_string: String,
        new_string: String,
        replace_all: bool,
    },
    MultiEdit {
        file_path: String,
        edits: Vec<EditOp>,
    },
    Other(Value),
}

#[derive(Deserialize)]
struct WriteInput {
    file_path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditInput {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Deserialize)]
struct MultiEditInput {
    file_path: String,
    edits: Vec<EditOp>,
}

impl ToolInput {
    /// Narrow a raw `tool_input` value using the tool name as the tag.
    pub fn from_value(tool_name: &str, raw: Value) -> Self {
        match tool_name {
            "Write" => match WriteInput::deserialize(&raw) {
                Ok(w) => ToolInput::Write {
                    file_path: w.file_path,
                    content: w.content,
                },
                Err(_) => ToolInput::Other(raw),
            },
            "Edit" => match EditInput::deserialize(&raw) {
                Ok(e) => ToolInput::Edit {
                    file_path: e.file_path,
                    old_string: e.old_string,
                    new_string: e.new_string,
                    replace_all: e.replace_all,
                },
                Err(_) => ToolInput::Other(raw),
            },
            "MultiEdit" => match MultiEditInput::deserialize(&raw) {
                Ok(m) => ToolInput::MultiEdit {
                    file_path: m.file_path,
                    edits: m.edits,
                },
                Err(_) => ToolInput::Other(raw),
            },
            _ => ToolInput::Other(raw),
        }
    }

    /// Target file of a recognized file-mutating tool.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            ToolInput::Write { file_path, .. }
            | ToolInput::Edit { file_path, .. }
            | ToolInput::MultiEdit { file_path, .. } => Some(file_path),
            ToolInput::Other(_) => None,
        }
    }

    /// Full file content, only known up front for `Write`.
    pub fn content(&self) -> Option<&str> {
        match self {
            ToolInput::Write { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_file_mutation(&self) -> bool {
        !matches!(self, ToolInput::Other(_))
    }
}
