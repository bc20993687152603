use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::process::{require_tool, run_tool};
use super::{Issue, LintContext, LintError, LintFile, Linter, Severity, expand_path, parse_settings};

const NAME: &str = "rust";
const CATEGORY: &str = "rust";
const DEFAULT_EDITION: &str = "2021";

static STDIN_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-->\s*<stdin>:(\d+):(\d+)").expect("static regex"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RustSettings {
    /// Edition passed to rustfmt; read from the nearest Cargo.toml when unset.
    pub edition: Option<String>,
    pub rustfmt_config: Option<String>,
    /// Run `cargo clippy` on files already written to disk.
    pub clippy: bool,
    pub disabled_lints: Vec<String>,
}

/// rustfmt on the pending content, clippy on the written crate.
pub struct RustLinter;

#[async_trait]
impl Linter for RustLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        parse_settings::<RustSettings>(NAME, settings).map(|_| ())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let settings: RustSettings = parse_settings(NAME, settings)?;
        let rustfmt = require_tool(ctx, CATEGORY, "rustfmt").await?;

        let manifest = find_manifest(&file.path);
        let edition = settings
            .edition
            .clone()
            .or_else(|| manifest.as_deref().and_then(edition_from_manifest))
            .unwrap_or_else(|| DEFAULT_EDITION.to_string());

        let mut args = vec!["--edition".to_string(), edition, "--emit".into(), "stdout".into()];
        if let Some(config) = settings.rustfmt_config.as_deref() {
            args.push("--config-path".into());
            args.push(expand_path(config).display().to_string());
        }
        let output = run_tool("rustfmt", &rustfmt, &args, Some(file.content.as_str()), ctx).await?;

        let mut issues = Vec::new();
        if !output.success() {
            issues.extend(syntax_issues(&file.path, &output.stderr));
            if issues.is_empty() {
                return Err(LintError::Parse {
                    tool: "rustfmt".into(),
                    message: output.stderr.trim().to_string(),
                });
            }
            return Ok(issues);
        }
        if output.stdout != file.content {
            issues.push(
                Issue::new(&file.path, Severity::Warning, "rustfmt", "File is not formatted with rustfmt")
                    .at(1, 1)
                    .from_source("rustfmt"),
            );
        }

        if settings.clippy
            && let Some(manifest) = manifest
            && on_disk(file).await
        {
            let result = clippy(&file.path, &manifest, &settings, ctx).await;
            merge_clippy(&mut issues, &file.path, result);
        }
        Ok(issues)
    }
}

/// A failed clippy run becomes one more issue; formatting findings stay.
fn merge_clippy(issues: &mut Vec<Issue>, path: &Path, result: Result<Vec<Issue>, LintError>) {
    match result {
        Ok(found) => issues.extend(found),
        Err(e) => {
            log::warn!("clippy failed on {}: {e}", path.display());
            issues.push(e.into_issue(path, NAME));
        }
    }
}

/// rustfmt reports parse errors as `error: ...` followed by `--> <stdin>:L:C`.
fn syntax_issues(path: &Path, stderr: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut message: Option<&str> = None;
    for line in stderr.lines() {
        if let Some(m) = line.strip_prefix("error: ") {
            message = Some(m.trim());
        } else if let Some(caps) = STDIN_LOCATION.captures(line) {
            let text = message.take().unwrap_or("syntax error");
            issues.push(
                Issue::new(path, Severity::Error, "syntax", format!("Rust syntax error: {text}"))
                    .at(caps[1].parse().unwrap_or(1), caps[2].parse().unwrap_or(1))
                    .from_source("rustfmt"),
            );
        }
    }
    issues
}

async fn on_disk(file: &LintFile) -> bool {
    tokio::fs::read_to_string(&file.path)
        .await
        .is_ok_and(|disk| disk == file.content)
}

fn find_manifest(path: &Path) -> Option<PathBuf> {
    path.parent()?
        .ancestors()
        .map(|d| d.join("Cargo.toml"))
        .find(|m| m.is_file())
}

/// `package.edition`, following `edition.workspace = true` up to the workspace root.
fn edition_from_manifest(manifest: &Path) -> Option<String> {
    let doc: toml::Table = std::fs::read_to_string(manifest).ok()?.parse().ok()?;
    match doc.get("package").and_then(|p| p.get("edition")) {
        Some(toml::Value::String(edition)) => Some(edition.clone()),
        Some(toml::Value::Table(t)) if t.get("workspace").and_then(toml::Value::as_bool) == Some(true) => {
            let start = manifest.parent()?.parent()?;
            start
                .ancestors()
                .map(|d| d.join("Cargo.toml"))
                .filter(|m| m.is_file())
                .find_map(|m| workspace_edition(&m))
        }
        _ => workspace_edition(manifest),
    }
}

fn workspace_edition(manifest: &Path) -> Option<String> {
    let doc: toml::Table = std::fs::read_to_string(manifest).ok()?.parse().ok()?;
    doc.get("workspace")?
        .get("package")?
        .get("edition")?
        .as_str()
        .map(str::to_string)
}

#[derive(Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    message: Option<Diagnostic>,
}

#[derive(Deserialize)]
struct Diagnostic {
    message: String,
    level: String,
    #[serde(default)]
    code: Option<DiagnosticCode>,
    #[serde(default)]
    spans: Vec<Span>,
}

#[derive(Deserialize)]
struct DiagnosticCode {
    code: String,
}

#[derive(Deserialize)]
struct Span {
    file_name: String,
    line_start: usize,
    column_start: usize,
    is_primary: bool,
}

async fn clippy(
    path: &Path,
    manifest: &Path,
    settings: &RustSettings,
    ctx: &LintContext,
) -> Result<Vec<Issue>, LintError> {
    let cargo = require_tool(ctx, CATEGORY, "cargo").await?;
    let root = manifest.parent().unwrap_or(Path::new("."));

    let mut args: Vec<String> = vec![
        "clippy".into(),
        "--message-format=json".into(),
        "--no-deps".into(),
        "--quiet".into(),
        "--manifest-path".into(),
        manifest.display().to_string(),
        "--".into(),
    ];
    for lint in &settings.disabled_lints {
        args.push("-A".into());
        args.push(lint.clone());
    }

    let mut run_ctx = ctx.clone();
    run_ctx.cwd = root.to_path_buf();
    let output = run_tool("cargo-clippy", &cargo, &args, None, &run_ctx).await?;
    Ok(parse_clippy(path, root, &output.stdout))
}

fn parse_clippy(path: &Path, root: &Path, stdout: &str) -> Vec<Issue> {
    stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<CargoMessage>(l).ok())
        .filter(|m| m.reason == "compiler-message")
        .filter_map(|m| m.message)
        .filter_map(|d| {
            let span = d.spans.iter().find(|s| s.is_primary)?;
            let span_path = Path::new(&span.file_name);
            let hit = path.ends_with(span_path)
                || root.join(span_path) == path
                || root.ancestors().any(|a| a.join(span_path) == path);
            if !hit {
                return None;
            }
            let severity = match d.level.as_str() {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let rule = d.code.map(|c| c.code).unwrap_or_else(|| "rustc".into());
            Some(
                Issue::new(path, severity, rule, d.message)
                    .at(span.line_start, span.column_start)
                    .from_source("clippy"),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rustfmt_syntax_error() {
        let stderr = "error: expected one of `!` or `::`, found `main`\n --> <stdin>:1:4\n  |\n1 | fnn main() {}\n";
        let issues = syntax_issues(Path::new("src/main.rs"), stderr);
        assert_eq!(issues.len(), 1);
        assert_eq!((issues[0].line, issues[0].column), (1, 4));
        assert!(issues[0].message.contains("expected one of"));
        assert!(issues[0].is_error());
    }

    #[test]
    fn edition_from_package() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("Cargo.toml");
        std::fs::write(&manifest, "[package]\nname = \"x\"\nedition = \"2024\"\n").unwrap();
        assert_eq!(edition_from_manifest(&manifest).as_deref(), Some("2024"));
    }

    #[test]
    fn edition_inherited_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"member\"]\n\n[workspace.package]\nedition = \"2021\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("member/src")).unwrap();
        let manifest = dir.path().join("member/Cargo.toml");
        std::fs::write(&manifest, "[package]\nname = \"m\"\nedition.workspace = true\n").unwrap();
        assert_eq!(edition_from_manifest(&manifest).as_deref(), Some("2021"));
        assert_eq!(
            find_manifest(&dir.path().join("member/src/lib.rs")).as_deref(),
            Some(manifest.as_path())
        );
    }

    #[test]
    fn clippy_messages_filtered_to_file() {
        let root = Path::new("/work/crate");
        let file = Path::new("/work/crate/src/lib.rs");
        let stdout = [
            r#"{"reason":"compiler-artifact","target":{}}"#,
            r#"{"reason":"compiler-message","message":{"message":"needless return","level":"warning","code":{"code":"clippy::needless_return"},"spans":[{"file_name":"src/lib.rs","line_start":3,"column_start":5,"is_primary":true}]}}"#,
            r#"{"reason":"compiler-message","message":{"message":"elsewhere","level":"warning","code":null,"spans":[{"file_name":"src/other.rs","line_start":1,"column_start":1,"is_primary":true}]}}"#,
        ]
        .join("\n");
        let issues = parse_clippy(file, root, &stdout);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule, "clippy::needless_return");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn clippy_failure_keeps_format_issues() {
        let path = Path::new("src/lib.rs");
        let mut issues = vec![Issue::new(path, Severity::Warning, "rustfmt", "File is not formatted with rustfmt")];
        merge_clippy(&mut issues, path, Err(LintError::Timeout { tool: "cargo-clippy".into() }));
        let rules: Vec<&str> = issues.iter().map(|i| i.rule.as_str()).collect();
        assert_eq!(rules, vec!["rustfmt", "timeout"]);
    }
}
