use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::process::{require_tool, run_tool};
use super::{Issue, LintContext, LintError, LintFile, Linter, Severity, expand_path, parse_settings};

const NAME: &str = "javascript";
const CATEGORY: &str = "javascript";
const KNOWN_TOOLS: &[&str] = &["biome", "oxlint", "eslint"];

/// `::error file=x.ts,line=3,col=7,title=rule::message`, the GitHub annotation format.
static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^::(error|warning|notice)\s+([^:]*)::(.*)$").expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JavaScriptSettings {
    /// Skip discovery and use this tool only.
    pub force_tool: Option<String>,
    pub preference: Vec<String>,
    pub max_file_size: usize,
    pub biome_config_path: Option<String>,
    pub oxlint_config_path: Option<String>,
    pub eslint_config_path: Option<String>,
}

impl Default for JavaScriptSettings {
    fn default() -> Self {
        Self {
            force_tool: None,
            preference: KNOWN_TOOLS.iter().map(|t| t.to_string()).collect(),
            max_file_size: 10 * 1024 * 1024,
            biome_config_path: None,
            oxlint_config_path: None,
            eslint_config_path: None,
        }
    }
}

impl JavaScriptSettings {
    fn candidates(&self) -> Vec<&str> {
        match self.force_tool.as_deref() {
            Some(tool) => vec![tool],
            None => self.preference.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintResult {
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    #[serde(default)]
    rule_id: Option<String>,
    severity: u8,
    message: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    fatal: bool,
}

/// JavaScript and TypeScript through the first installed of biome, oxlint, eslint.
pub struct JavaScriptLinter;

#[async_trait]
impl Linter for JavaScriptLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        let parsed: JavaScriptSettings = parse_settings(NAME, settings)?;
        match parsed.candidates().into_iter().find(|t| !KNOWN_TOOLS.contains(t)) {
            Some(unknown) => Err(LintError::Config {
                linter: NAME.into(),
                message: format!("unknown tool {unknown:?}, expected one of {}", KNOWN_TOOLS.join(", ")),
            }),
            None => Ok(()),
        }
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let settings: JavaScriptSettings = parse_settings(NAME, settings)?;
        if file.content.len() > settings.max_file_size {
            return Ok(vec![
                Issue::new(
                    &file.path,
                    Severity::Warning,
                    "file-size",
                    format!("File size {} exceeds limit {}, not linted", file.content.len(), settings.max_file_size),
                )
                .from_source(NAME),
            ]);
        }

        let candidates = settings.candidates();
        let (tool, binary) = match settings.force_tool.as_deref() {
            Some(forced) => (forced.to_string(), require_tool(ctx, CATEGORY, forced).await?),
            None => match ctx.cache.discover_first(CATEGORY, &candidates).await {
                Some((name, entry)) => match entry.path {
                    Some(path) => (name, path),
                    None => return Err(LintError::ToolUnavailable { tool: name }),
                },
                None => {
                    return Err(LintError::ToolUnavailable {
                        tool: candidates.join("/"),
                    });
                }
            },
        };

        // These tools read files themselves; stage the content next to the target
        // so project configuration is discovered the same way.
        let staged = stage(file)?;
        let staged_path = staged.path().to_path_buf();
        let args = tool_args(&tool, &staged_path, &settings);
        let output = run_tool(&tool, &binary, &args, None, ctx).await?;
        drop(staged);

        let issues = match tool.as_str() {
            "eslint" => parse_eslint(&file.path, &output.stdout),
            _ => Ok(parse_annotations(&file.path, &output.stdout)),
        };
        let issues = issues.map_err(|message| LintError::Parse {
            tool: tool.clone(),
            message,
        })?;
        if issues.is_empty() && !output.success() && !output.stderr.trim().is_empty() {
            log::debug!("{tool} exited {:?}: {}", output.code(), output.stderr.trim());
        }
        Ok(issues.into_iter().map(|i| i.from_source(tool.clone())).collect())
    }
}

fn stage(file: &LintFile) -> Result<tempfile::NamedTempFile, LintError> {
    let suffix = file
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let mut builder = tempfile::Builder::new();
    builder.prefix("cc-lintgate-").suffix(&suffix);
    let mut staged = match file.path.parent().filter(|d| d.is_dir()) {
        Some(dir) => builder.tempfile_in(dir).or_else(|_| builder.tempfile())?,
        None => builder.tempfile()?,
    };
    staged.write_all(file.content.as_bytes())?;
    staged.flush()?;
    Ok(staged)
}

fn tool_args(tool: &str, staged: &Path, settings: &JavaScriptSettings) -> Vec<String> {
    let config = |raw: &Option<String>| raw.as_deref().map(expand_path);
    let path = staged.display().to_string();
    match tool {
        "biome" => {
            let mut args = vec!["lint".to_string(), "--reporter=github".into()];
            if let Some(dir) = config(&settings.biome_config_path) {
                args.push(format!("--config-path={}", dir.display()));
            }
            args.push(path);
            args
        }
        "oxlint" => {
            let mut args = vec!["--format=github".to_string()];
            if let Some(cfg) = config(&settings.oxlint_config_path) {
                args.push("--config".into());
                args.push(cfg.display().to_string());
            }
            args.push(path);
            args
        }
        _ => {
            let mut args = vec!["--format".to_string(), "json".into(), "--no-warn-ignored".into()];
            if let Some(cfg) = config(&settings.eslint_config_path) {
                args.push("--config".into());
                args.push(cfg.display().to_string());
            }
            args.push(path);
            args
        }
    }
}

/// Annotations from biome and oxlint; properties are `key=value` pairs split on commas.
fn parse_annotations(path: &Path, stdout: &str) -> Vec<Issue> {
    stdout
        .lines()
        .filter_map(|l| ANNOTATION.captures(l.trim()))
        .map(|caps| {
            let severity = match &caps[1] {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let mut line = 1;
            let mut column = 1;
            let mut rule = String::new();
            for prop in caps[2].split(',') {
                match prop.trim().split_once('=') {
                    Some(("line", v)) => line = v.parse().unwrap_or(1),
                    Some(("col", v)) => column = v.parse().unwrap_or(1),
                    Some(("title", v)) => rule = v.to_string(),
                    _ => {}
                }
            }
            Issue::new(PathBuf::from(path), severity, rule, unescape(&caps[3])).at(line, column)
        })
        .collect()
}

fn unescape(message: &str) -> String {
    message.replace("%0A", "\n").replace("%0D", "\r").replace("%25", "%")
}

fn parse_eslint(path: &Path, stdout: &str) -> Result<Vec<Issue>, String> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }
    let results: Vec<EslintResult> = serde_json::from_str(stdout).map_err(|e| e.to_string())?;
    Ok(results
        .into_iter()
        .flat_map(|r| r.messages)
        .map(|m| {
            let severity = if m.severity >= 2 { Severity::Error } else { Severity::Warning };
            let rule = match (m.rule_id, m.fatal) {
                (Some(rule), _) => rule,
                (None, true) => "syntax".to_string(),
                (None, false) => String::new(),
            };
            Issue::new(path, severity, rule, m.message).at(m.line.unwrap_or(1), m.column.unwrap_or(1))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biome_annotations() {
        let out = "::error title=lint/suspicious/noDebugger,file=/tmp/cc-lintgate-x.js,line=2,endLine=2,col=1,endColumn=9::This is an unexpected use of the debugger statement.\n::warning title=lint/style/useConst,file=/tmp/x.js,line=1,endLine=1,col=1,endColumn=4::This let declares a variable that is only assigned once.\nChecked 1 file in 2ms.\n";
        let issues = parse_annotations(Path::new("src/a.js"), out);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].rule, "lint/suspicious/noDebugger");
        assert!(issues[0].is_error());
        assert_eq!((issues[0].line, issues[0].column), (2, 1));
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[1].file, Path::new("src/a.js"));
    }

    #[test]
    fn eslint_json() {
        let out = r#"[{"filePath":"/tmp/x.js","messages":[
            {"ruleId":"no-unused-vars","severity":2,"message":"'a' is assigned a value but never used.","line":1,"column":7},
            {"ruleId":"semi","severity":1,"message":"Missing semicolon.","line":2,"column":10},
            {"ruleId":null,"fatal":true,"severity":2,"message":"Parsing error: Unexpected token","line":3,"column":1}
        ]}]"#;
        let issues = parse_eslint(Path::new("a.js"), out).unwrap();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].is_error());
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[2].rule, "syntax");
    }

    #[test]
    fn force_tool_overrides_preference() {
        let settings = JavaScriptSettings {
            force_tool: Some("eslint".into()),
            ..JavaScriptSettings::default()
        };
        assert_eq!(settings.candidates(), vec!["eslint"]);
        assert_eq!(JavaScriptSettings::default().candidates(), vec!["biome", "oxlint", "eslint"]);
    }

    #[test]
    fn configure_rejects_unknown_tool() {
        let mut settings = Map::new();
        settings.insert("forceTool".into(), Value::String("jshint".into()));
        assert!(matches!(
            JavaScriptLinter.configure(&settings),
            Err(LintError::Config { .. })
        ));
        assert!(JavaScriptLinter.configure(&Map::new()).is_ok());
    }

    #[test]
    fn staged_file_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = LintFile::new(dir.path().join("App.tsx"), "export const a = 1;\n");
        let staged = stage(&file).unwrap();
        assert_eq!(staged.path().extension().unwrap(), "tsx");
        assert_eq!(staged.path().parent().unwrap(), dir.path());
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), file.content);
    }
}
