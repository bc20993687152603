use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::process::{require_tool, run_tool};
use super::{
    BatchResults, Issue, LintContext, LintError, LintFile, Linter, Severity, expand_path, parse_settings,
};

const NAME: &str = "go";
const CATEGORY: &str = "go";

static GOFMT_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<standard input>:(\d+):(\d+): (.+)$").expect("static regex"));
static GOLANGCI_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version v?(\d+)\.").expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoSettings {
    /// Run golangci-lint (when installed) on files already on disk.
    pub golangci_lint: bool,
    pub golangci_config: Option<String>,
}

impl Default for GoSettings {
    fn default() -> Self {
        Self {
            golangci_lint: true,
            golangci_config: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GolangciOutput {
    #[serde(default)]
    issues: Option<Vec<GolangciIssue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GolangciIssue {
    from_linter: String,
    text: String,
    #[serde(default)]
    severity: String,
    pos: GolangciPos,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GolangciPos {
    filename: String,
    line: usize,
    column: usize,
}

/// gofmt for syntax and formatting, golangci-lint for everything else.
pub struct GoLinter;

#[async_trait]
impl Linter for GoLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        parse_settings::<GoSettings>(NAME, settings).map(|_| ())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let mut results = self.lint_batch(std::slice::from_ref(file), settings, ctx).await;
        results.remove(&file.path).unwrap_or_else(|| Ok(Vec::new()))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn lint_batch(
        &self,
        files: &[LintFile],
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> BatchResults {
        let mut out: BatchResults = HashMap::with_capacity(files.len());
        let settings: GoSettings = match parse_settings(NAME, settings) {
            Ok(s) => s,
            Err(e) => {
                let message = e.to_string();
                for f in files {
                    out.insert(
                        f.path.clone(),
                        Err(LintError::Config {
                            linter: NAME.into(),
                            message: message.clone(),
                        }),
                    );
                }
                return out;
            }
        };

        let gofmt = match require_tool(ctx, CATEGORY, "gofmt").await {
            Ok(path) => path,
            Err(_) => {
                for f in files {
                    let err = LintError::ToolUnavailable { tool: "gofmt".into() };
                    out.insert(f.path.clone(), Err(err));
                }
                return out;
            }
        };

        let mut on_disk = Vec::new();
        for file in files {
            if is_skipped(file) {
                out.insert(file.path.clone(), Ok(Vec::new()));
                continue;
            }
            let result = gofmt_check(&gofmt, file, ctx).await;
            let syntax_ok = matches!(&result, Ok(issues) if !issues.iter().any(Issue::is_error));
            if syntax_ok && matches_disk(file).await {
                on_disk.push(file.path.clone());
            }
            out.insert(file.path.clone(), result);
        }

        if settings.golangci_lint && !on_disk.is_empty() {
            for issue in golangci(&on_disk, &settings, ctx).await {
                if let Some(Ok(issues)) = out.get_mut(&issue.file) {
                    issues.push(issue);
                }
            }
        }
        out
    }
}

fn is_skipped(file: &LintFile) -> bool {
    file.content.contains("// Code generated")
        || file
            .path
            .components()
            .any(|c| c.as_os_str() == "testdata")
}

/// golangci-lint reads files itself, so only lint content that is already written.
async fn matches_disk(file: &LintFile) -> bool {
    tokio::fs::read_to_string(&file.path)
        .await
        .is_ok_and(|disk| disk == file.content)
}

async fn gofmt_check(gofmt: &Path, file: &LintFile, ctx: &LintContext) -> Result<Vec<Issue>, LintError> {
    let output = run_tool("gofmt", gofmt, ["-e"], Some(file.content.as_str()), ctx).await?;
    if !output.success() {
        let issues: Vec<Issue> = output
            .stderr
            .lines()
            .filter_map(|l| GOFMT_ERROR.captures(l.trim()))
            .take(10)
            .map(|caps| {
                Issue::new(&file.path, Severity::Error, "syntax", format!("Go syntax error: {}", &caps[3]))
                    .at(caps[1].parse().unwrap_or(1), caps[2].parse().unwrap_or(1))
                    .from_source("gofmt")
            })
            .collect();
        if issues.is_empty() {
            return Err(LintError::Parse {
                tool: "gofmt".into(),
                message: output.stderr.trim().to_string(),
            });
        }
        return Ok(issues);
    }

    if output.stdout != file.content {
        let line = first_difference(&file.content, &output.stdout);
        return Ok(vec![
            Issue::new(&file.path, Severity::Warning, "gofmt", "File is not properly formatted with gofmt")
                .at(line, 1)
                .from_source("gofmt"),
        ]);
    }
    Ok(Vec::new())
}

fn first_difference(a: &str, b: &str) -> usize {
    a.lines()
        .zip(b.lines())
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.lines().count().min(b.lines().count()))
        + 1
}

fn module_root(path: &Path, fallback: &Path) -> PathBuf {
    path.parent()
        .and_then(|dir| dir.ancestors().find(|d| d.join("go.mod").is_file()))
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fallback.to_path_buf())
}

/// Best effort: a missing binary or unreadable output yields no issues.
async fn golangci(paths: &[PathBuf], settings: &GoSettings, ctx: &LintContext) -> Vec<Issue> {
    let entry = ctx.cache.discover_tool(CATEGORY, "golangci-lint").await;
    let Some(binary) = entry.path.filter(|_| entry.available) else {
        return Vec::new();
    };
    let major = entry.version.as_deref().and_then(golangci_major);
    let root = module_root(&paths[0], &ctx.cwd);

    let config = settings
        .golangci_config
        .as_deref()
        .map(expand_path)
        .or_else(|| Some(root.join(".golangci.yml")).filter(|p| p.is_file()));
    let args = golangci_args(major, config.as_deref(), paths);

    let mut run_ctx = ctx.clone();
    run_ctx.cwd = root.clone();
    let output = match run_tool("golangci-lint", &binary, &args, None, &run_ctx).await {
        Ok(output) => output,
        Err(e) => {
            log::debug!("golangci-lint skipped: {e}");
            return Vec::new();
        }
    };
    if output.stdout.trim().is_empty() {
        return Vec::new();
    }
    let parsed: GolangciOutput = match serde_json::from_str(output.stdout.trim()) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("unreadable golangci-lint output: {e}");
            return Vec::new();
        }
    };

    parsed
        .issues
        .unwrap_or_default()
        .into_iter()
        .filter_map(|i| {
            let reported = root.join(&i.pos.filename);
            let file = paths.iter().find(|p| **p == reported || p.ends_with(&i.pos.filename))?;
            let severity = if i.severity == "error" {
                Severity::Error
            } else {
                Severity::Warning
            };
            Some(
                Issue::new(file, severity, i.from_linter, i.text)
                    .at(i.pos.line, i.pos.column)
                    .from_source("golangci-lint"),
            )
        })
        .collect()
}

/// Major version from `golangci-lint --version` output.
fn golangci_major(version: &str) -> Option<u32> {
    GOLANGCI_VERSION.captures(version)?[1].parse().ok()
}

/// v1 and v2 spell fast mode and JSON output differently. Unknown versions get v2 flags.
fn golangci_args(major: Option<u32>, config: Option<&Path>, paths: &[PathBuf]) -> Vec<String> {
    let mut args: Vec<String> = vec!["run".into()];
    if major == Some(1) {
        args.push("--fast".into());
        args.push("--out-format=json".into());
    } else {
        args.push("--fast-only".into());
        args.push("--output.json.path=stdout".into());
        args.push("--show-stats=false".into());
    }
    if let Some(config) = config {
        args.push(format!("--config={}", config.display()));
    }
    args.extend(paths.iter().map(|p| p.display().to_string()));
    args
}
