//! Linter adapters and the common issue model they report into.

/// Go: gofmt and golangci-lint.
pub mod golang;
/// JavaScript/TypeScript: biome, oxlint or eslint, whichever is installed first.
pub mod javascript;
/// Built-in JSON and JSON Lines validation.
pub mod json;
/// Built-in markdown structure rules.
pub mod markdown;
/// Bounded concurrent execution of lint jobs.
pub mod parallel;
/// External process execution under the hook deadline.
pub mod process;
/// Python: ruff check and ruff format.
pub mod python;
/// Rust: rustfmt, plus cargo clippy when enabled.
pub mod rust;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;

use crate::toolcache::CacheManager;

/// Ordered so that `max` yields the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One finding, normalized from whatever tool produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub file: PathBuf,
    /// 1-based; 0 when the finding is not tied to a position.
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
    pub rule: String,
    pub source: String,
}

impl Issue {
    pub fn new(
        file: impl Into<PathBuf>,
        severity: Severity,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line: 0,
            column: 0,
            severity,
            message: message.into(),
            rule: rule.into(),
            source: String::new(),
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// `path:line:col: message (rule)`, position omitted when unknown.
    pub fn render(&self, display_path: &str) -> String {
        let mut out = if self.line > 0 {
            format!("{display_path}:{}:{}: {}", self.line, self.column.max(1), self.message)
        } else {
            self.message.clone()
        };
        if !self.rule.is_empty() {
            out.push_str(&format!(" ({})", self.rule));
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum LintError {
    #[error("{tool} is not installed")]
    ToolUnavailable { tool: String },
    #[error("{tool} exceeded the hook deadline")]
    Timeout { tool: String },
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {tool} output: {message}")]
    Parse { tool: String, message: String },
    #[error("invalid {linter} settings: {message}")]
    Config { linter: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} panicked: {message}")]
    Panicked { tool: String, message: String },
}

impl LintError {
    /// Adapter failures never block: each becomes one non-error issue for the file.
    pub fn into_issue(self, file: &Path, linter: &str) -> Issue {
        let (severity, rule) = match &self {
            LintError::ToolUnavailable { .. } => (Severity::Info, "tool-availability"),
            LintError::Timeout { .. } => (Severity::Warning, "timeout"),
            LintError::Parse { .. } => (Severity::Warning, "parse-error"),
            _ => (Severity::Warning, "internal"),
        };
        Issue::new(file, severity, rule, format!("{linter}: {self}")).from_source(linter)
    }
}

/// A file to lint with the content to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFile {
    pub path: PathBuf,
    pub content: String,
}

impl LintFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Shared state handed to every lint call.
#[derive(Clone)]
pub struct LintContext {
    pub deadline: Instant,
    pub cache: Arc<CacheManager>,
    /// Directory tools are run from.
    pub cwd: PathBuf,
}

pub type BatchResults = HashMap<PathBuf, Result<Vec<Issue>, LintError>>;

/// Uniform capability implemented once per supported language.
#[async_trait]
pub trait Linter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase extensions (without the dot) this adapter accepts.
    fn extensions(&self) -> &'static [&'static str];

    fn can_handle(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions().contains(&ext.as_str())
            })
    }

    /// Validate base settings once at startup.
    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        let _ = settings;
        Ok(())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError>;

    fn supports_batch(&self) -> bool {
        false
    }

    /// Lint several files sharing the same effective settings.
    async fn lint_batch(
        &self,
        files: &[LintFile],
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> BatchResults {
        let mut out = HashMap::with_capacity(files.len());
        for file in files {
            out.insert(file.path.clone(), self.lint(file, settings, ctx).await);
        }
        out
    }
}

/// Deserialize an adapter's typed settings from a merged settings map.
pub fn parse_settings<T: DeserializeOwned>(linter: &str, settings: &Map<String, Value>) -> Result<T, LintError> {
    serde_json::from_value(Value::Object(settings.clone())).map_err(|e| LintError::Config {
        linter: linter.to_string(),
        message: e.to_string(),
    })
}

/// Expand `~` and environment variables in a path-valued setting.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
}

/// The adapters available to the engine, looked up by name or by file.
#[derive(Clone, Default)]
pub struct LinterSet {
    linters: Vec<Arc<dyn Linter>>,
}

impl LinterSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every adapter this crate ships.
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.add(Arc::new(markdown::MarkdownLinter));
        set.add(Arc::new(json::JsonLinter));
        set.add(Arc::new(golang::GoLinter));
        set.add(Arc::new(rust::RustLinter));
        set.add(Arc::new(python::PythonLinter));
        set.add(Arc::new(javascript::JavaScriptLinter));
        set
    }

    /// Add an adapter, replacing any existing one with the same name.
    pub fn add(&mut self, linter: Arc<dyn Linter>) {
        self.linters.retain(|l| l.name() != linter.name());
        self.linters.push(linter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Linter>> {
        self.linters.iter().find(|l| l.name() == name)
    }

    pub fn for_path<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Arc<dyn Linter>> + 'a {
        self.linters.iter().filter(move |l| l.can_handle(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Linter>> {
        self.linters.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.linters.iter().map(|l| l.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn render_with_position_and_rule() {
        let issue = Issue::new("a.md", Severity::Error, "trailing-whitespace", "Line has trailing whitespace")
            .at(3, 10);
        assert_eq!(
            issue.render("a.md"),
            "a.md:3:10: Line has trailing whitespace (trailing-whitespace)"
        );
    }

    #[test]
    fn render_without_position() {
        let issue = Issue::new("a.go", Severity::Info, "", "gofmt not installed");
        assert_eq!(issue.render("a.go"), "gofmt not installed");
    }

    #[test]
    fn errors_map_to_rules() {
        let file = Path::new("a.py");
        let cases = [
            (LintError::ToolUnavailable { tool: "ruff".into() }, Severity::Info, "tool-availability"),
            (LintError::Timeout { tool: "ruff".into() }, Severity::Warning, "timeout"),
            (
                LintError::Parse { tool: "ruff".into(), message: "bad".into() },
                Severity::Warning,
                "parse-error",
            ),
            (
                LintError::Io(std::io::Error::other("boom")),
                Severity::Warning,
                "internal",
            ),
        ];
        for (err, severity, rule) in cases {
            let issue = err.into_issue(file, "python");
            assert_eq!(issue.severity, severity);
            assert_eq!(issue.rule, rule);
            assert!(!issue.is_error());
        }
    }

    #[test]
    fn builtin_set_selects_by_extension_case_insensitive() {
        let set = LinterSet::builtin();
        let names: Vec<_> = set.for_path(Path::new("README.MD")).map(|l| l.name()).collect();
        assert_eq!(names, vec!["markdown"]);
        let names: Vec<_> = set.for_path(Path::new("src/App.TSX")).map(|l| l.name()).collect();
        assert_eq!(names, vec!["javascript"]);
        assert_eq!(set.for_path(Path::new("Makefile")).count(), 0);
    }

    #[test]
    fn add_replaces_same_name() {
        let mut set = LinterSet::builtin();
        let before = set.names().len();
        set.add(Arc::new(markdown::MarkdownLinter));
        assert_eq!(set.names().len(), before);
        assert!(set.get("go").is_some());
    }

    #[test]
    fn expand_path_home() {
        let expanded = expand_path("~/x/.golangci.yml");
        assert!(!expanded.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
    }
}
