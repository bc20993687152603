use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Issue, LintContext, LintError, LintFile, Linter, Severity, parse_settings};

const NAME: &str = "json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsonSettings {
    pub max_file_size: usize,
    /// Warn when the document differs from its pretty-printed form.
    pub require_formatted: bool,
    /// Accept `//` and `/* */` comments (tsconfig-style files).
    pub allow_comments: bool,
}

impl Default for JsonSettings {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            require_formatted: false,
            allow_comments: false,
        }
    }
}

/// Well-formedness of JSON documents and JSON Lines streams.
pub struct JsonLinter;

#[async_trait]
impl Linter for JsonLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json", "jsonl", "ndjson", "geojson"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        parse_settings::<JsonSettings>(NAME, settings).map(|_| ())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        _ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let settings: JsonSettings = parse_settings(NAME, settings)?;
        Ok(check(&file.path, &file.content, &settings))
    }
}

fn is_json_lines(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl") || e.eq_ignore_ascii_case("ndjson"))
}

pub fn check(path: &Path, content: &str, settings: &JsonSettings) -> Vec<Issue> {
    let issue = |severity, rule: &str, message: String| Issue::new(path, severity, rule, message).from_source(NAME);

    if content.len() > settings.max_file_size {
        return vec![issue(
            Severity::Error,
            "file-size",
            format!("File size {} exceeds limit {}", content.len(), settings.max_file_size),
        )
        .at(1, 1)];
    }

    if is_json_lines(path) {
        return content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .filter_map(|(i, l)| {
                serde_json::from_str::<Value>(l).err().map(|e| {
                    issue(Severity::Error, "syntax", format!("Invalid JSON on line {}: {e}", i + 1))
                        .at(i + 1, e.column().max(1))
                })
            })
            .collect();
    }

    let source = if settings.allow_comments {
        strip_comments(content)
    } else {
        content.to_string()
    };
    let value = match serde_json::from_str::<Value>(&source) {
        Ok(v) => v,
        Err(e) => {
            return vec![issue(Severity::Error, "syntax", format!("Invalid JSON: {e}"))
                .at(e.line().max(1), e.column().max(1))];
        }
    };

    if settings.require_formatted && !settings.allow_comments {
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
        if pretty.trim_end() != content.trim_end() {
            return vec![issue(
                Severity::Warning,
                "formatting",
                "File is not formatted with 2-space indentation".into(),
            )
            .at(1, 1)];
        }
    }
    Vec::new()
}

/// Blank out comments, keeping line/column positions and string contents intact.
fn strip_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
