use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::process::run_tool;
use super::{
    BatchResults, Issue, LintContext, LintError, LintFile, Linter, Severity, expand_path, parse_settings,
};

const NAME: &str = "python";
const CATEGORY: &str = "python";

static AST_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"line (\d+)"#).expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PythonSettings {
    /// Also run `ruff format --check`.
    pub format: bool,
    pub ruff_args: Vec<String>,
    pub ruff_config: Option<String>,
    /// Rule code prefixes reported as errors; everything else is a warning.
    pub error_codes: Vec<String>,
}

impl Default for PythonSettings {
    fn default() -> Self {
        Self {
            format: true,
            ruff_args: Vec::new(),
            ruff_config: None,
            error_codes: vec!["E9".into(), "F821".into()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuffDiagnostic {
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    location: Option<RuffLocation>,
}

#[derive(Debug, Deserialize)]
struct RuffLocation {
    row: usize,
    column: usize,
}

/// How ruff is invoked: directly, or through `uv tool run`.
#[derive(Debug, Clone)]
enum Ruff {
    Direct(PathBuf),
    Uv(PathBuf),
}

impl Ruff {
    fn program(&self) -> &Path {
        match self {
            Ruff::Direct(p) | Ruff::Uv(p) => p,
        }
    }

    fn args(&self, rest: Vec<String>) -> Vec<String> {
        match self {
            Ruff::Direct(_) => rest,
            Ruff::Uv(_) => ["tool", "run", "ruff"]
                .into_iter()
                .map(String::from)
                .chain(rest)
                .collect(),
        }
    }
}

/// ruff check and ruff format; `python3 -m ast` for syntax when ruff is missing.
pub struct PythonLinter;

#[async_trait]
impl Linter for PythonLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        parse_settings::<PythonSettings>(NAME, settings).map(|_| ())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let settings: PythonSettings = parse_settings(NAME, settings)?;
        match find_ruff(ctx).await {
            Some(ruff) => lint_with_ruff(&ruff, file, &settings, ctx).await,
            None => syntax_only(file, ctx).await,
        }
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
        let settings: PythonSettings = match parse_settings(NAME, settings) {
            Ok(s) => s,
            Err(e) => {
                let message = e.to_string();
                return files
                    .iter()
                    .map(|f| {
                        let err = LintError::Config {
                            linter: NAME.into(),
                            message: message.clone(),
                        };
                        (f.path.clone(), Err(err))
                    })
                    .collect();
            }
        };

        // ruff takes one stdin document per run, so resolve once and fan out.
        let ruff = find_ruff(ctx).await;
        let runs = files.iter().map(|file| {
            let ruff = ruff.clone();
            let settings = &settings;
            async move {
                let result = match ruff {
                    Some(ruff) => lint_with_ruff(&ruff, file, settings, ctx).await,
                    None => syntax_only(file, ctx).await,
                };
                (file.path.clone(), result)
            }
        });
        let mut out: BatchResults = HashMap::with_capacity(files.len());
        out.extend(join_all(runs).await);
        out
    }
}

async fn find_ruff(ctx: &LintContext) -> Option<Ruff> {
    let (name, entry) = ctx.cache.discover_first(CATEGORY, &["ruff", "uv"]).await?;
    let path = entry.path?;
    Some(if name == "ruff" { Ruff::Direct(path) } else { Ruff::Uv(path) })
}

async fn lint_with_ruff(
    ruff: &Ruff,
    file: &LintFile,
    settings: &PythonSettings,
    ctx: &LintContext,
) -> Result<Vec<Issue>, LintError> {
    let display = file.display_path();
    let mut check: Vec<String> = vec!["check".into(), "--output-format".into(), "json".into()];
    if let Some(config) = settings.ruff_config.as_deref() {
        check.push("--config".into());
        check.push(expand_path(config).display().to_string());
    }
    check.extend(settings.ruff_args.iter().cloned());
    check.extend(["--stdin-filename".into(), display.clone(), "-".into()]);

    let output = run_tool("ruff", ruff.program(), ruff.args(check), Some(file.content.as_str()), ctx).await?;
    let mut issues = parse_ruff(&file.path, &output.stdout, &settings.error_codes).map_err(|message| {
        LintError::Parse {
            tool: "ruff".into(),
            message,
        }
    })?;

    let has_syntax_error = issues.iter().any(|i| i.rule == "syntax");
    if settings.format && !has_syntax_error {
        let format: Vec<String> = vec![
            "format".into(),
            "--check".into(),
            "--stdin-filename".into(),
            display,
            "-".into(),
        ];
        let output = run_tool("ruff-format", ruff.program(), ruff.args(format), Some(file.content.as_str()), ctx)
            .await?;
        if !output.success() {
            issues.push(
                Issue::new(&file.path, Severity::Warning, "ruff-format", "File is not formatted with ruff format")
                    .at(1, 1)
                    .from_source("ruff"),
            );
        }
    }
    Ok(issues)
}

fn parse_ruff(path: &Path, stdout: &str, error_codes: &[String]) -> Result<Vec<Issue>, String> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }
    let diagnostics: Vec<RuffDiagnostic> = serde_json::from_str(stdout).map_err(|e| e.to_string())?;
    Ok(diagnostics
        .into_iter()
        .map(|d| {
            let (line, column) = d.location.map(|l| (l.row, l.column)).unwrap_or((1, 1));
            let (severity, rule) = match d.code {
                None => (Severity::Error, "syntax".to_string()),
                Some(code) if code.eq_ignore_ascii_case("syntax-error") => (Severity::Error, "syntax".to_string()),
                Some(code) if error_codes.iter().any(|p| code.starts_with(p.as_str())) => (Severity::Error, code),
                Some(code) => (Severity::Warning, code),
            };
            Issue::new(path, severity, rule, d.message)
                .at(line, column)
                .from_source("ruff")
        })
        .collect())
}

async fn syntax_only(file: &LintFile, ctx: &LintContext) -> Result<Vec<Issue>, LintError> {
    let entry = ctx.cache.discover_tool(CATEGORY, "python3").await;
    let Some(python) = entry.path.filter(|_| entry.available) else {
        return Err(LintError::ToolUnavailable { tool: "ruff".into() });
    };
    let output = run_tool("python3", &python, ["-m", "ast", "-"], Some(file.content.as_str()), ctx).await?;
    if output.success() {
        return Ok(Vec::new());
    }
    Ok(vec![ast_issue(&file.path, &output.stderr)])
}

/// The traceback from `python3 -m ast` ends with `SyntaxError: msg` and names the line.
fn ast_issue(path: &Path, stderr: &str) -> Issue {
    let line = AST_LINE
        .captures_iter(stderr)
        .last()
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1);
    let message = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("invalid syntax");
    Issue::new(path, Severity::Error, "syntax", format!("Python syntax error: {message}"))
        .at(line, 1)
        .from_source("python3")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        PythonSettings::default().error_codes
    }

    #[test]
    fn ruff_codes_mapped_to_severity() {
        let raw = r#"[
            {"code":"F401","message":"`os` imported but unused","location":{"row":1,"column":8}},
            {"code":"F821","message":"Undefined name `x`","location":{"row":3,"column":5}},
            {"code":null,"message":"SyntaxError: Expected an expression","location":{"row":4,"column":9}}
        ]"#;
        let issues = parse_ruff(Path::new("a.py"), raw, &defaults()).unwrap();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].rule, "F401");
        assert!(issues[1].is_error());
        assert_eq!(issues[2].rule, "syntax");
        assert_eq!((issues[2].line, issues[2].column), (4, 9));
    }

    #[test]
    fn empty_output_is_clean() {
        assert!(parse_ruff(Path::new("a.py"), "", &defaults()).unwrap().is_empty());
        assert!(parse_ruff(Path::new("a.py"), "[]", &defaults()).unwrap().is_empty());
        assert!(parse_ruff(Path::new("a.py"), "not json", &defaults()).is_err());
    }

    #[test]
    fn custom_error_codes() {
        let raw = r#"[{"code":"E501","message":"Line too long","location":{"row":2,"column":89}}]"#;
        let issues = parse_ruff(Path::new("a.py"), raw, &["E5".to_string()]).unwrap();
        assert!(issues[0].is_error());
    }

    #[test]
    fn ast_traceback() {
        let stderr = "Traceback (most recent call last):\n  File \"/usr/lib/python3.12/ast.py\", line 1793, in main\n  File \"<stdin>\", line 3\n    def f(\n         ^\nSyntaxError: '(' was never closed\n";
        let issue = ast_issue(Path::new("a.py"), stderr);
        assert_eq!(issue.line, 3);
        assert!(issue.message.ends_with("'(' was never closed"));
        assert!(issue.is_error());
    }

    #[test]
    fn uv_wraps_ruff() {
        let uv = Ruff::Uv(PathBuf::from("/usr/bin/uv"));
        assert_eq!(uv.args(vec!["check".into()]), vec!["tool", "run", "ruff", "check"]);
        let direct = Ruff::Direct(PathBuf::from("/usr/bin/ruff"));
        assert_eq!(direct.args(vec!["check".into()]), vec!["check"]);
    }
}
