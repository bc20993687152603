use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Issue, LintContext, LintError, LintFile, Linter, Severity, parse_settings};

const NAME: &str = "markdown";

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]|$)").expect("static regex"));
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)(?:[-*+]|\d+[.)])[ \t]").expect("static regex"));
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})[ \t]*([^`\s]*)").expect("static regex"));
static UNDERSCORE_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w_])_[^_\s](?:[^_]*[^_\s])?_(?:[^\w_]|$)").expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkdownSettings {
    pub max_line_length: usize,
    pub max_blank_lines: usize,
    pub list_indent_size: usize,
    pub require_frontmatter: bool,
    pub disabled_rules: Vec<String>,
}

impl Default for MarkdownSettings {
    fn default() -> Self {
        Self {
            max_line_length: 120,
            max_blank_lines: 2,
            list_indent_size: 2,
            require_frontmatter: false,
            disabled_rules: Vec::new(),
        }
    }
}

impl MarkdownSettings {
    fn enabled(&self, rule: &str) -> bool {
        !self.disabled_rules.iter().any(|r| r == rule)
    }
}

/// Structure and whitespace rules for markdown, no external tool needed.
pub struct MarkdownLinter;

#[async_trait]
impl Linter for MarkdownLinter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown"]
    }

    fn configure(&self, settings: &Map<String, Value>) -> Result<(), LintError> {
        parse_settings::<MarkdownSettings>(NAME, settings).map(|_| ())
    }

    async fn lint(
        &self,
        file: &LintFile,
        settings: &Map<String, Value>,
        _ctx: &LintContext,
    ) -> Result<Vec<Issue>, LintError> {
        let settings: MarkdownSettings = parse_settings(NAME, settings)?;
        Ok(check(&file.path, &file.content, &settings))
    }
}

/// Run every enabled rule over `content`.
pub fn check(path: &Path, content: &str, settings: &MarkdownSettings) -> Vec<Issue> {
    let mut issues = Vec::new();
    let issue = |line: usize, column: usize, severity: Severity, rule: &str, message: String| {
        Issue::new(path, severity, rule, message)
            .at(line, column)
            .from_source(NAME)
    };

    let lines: Vec<&str> = content
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();

    let frontmatter_end = frontmatter_end(&lines);
    if settings.require_frontmatter && frontmatter_end.is_none() && settings.enabled("require-frontmatter") {
        issues.push(issue(
            1,
            1,
            Severity::Error,
            "require-frontmatter",
            "Front matter is required but not present".into(),
        ));
    }
    let body_start = frontmatter_end.map(|end| end + 1).unwrap_or(0);

    let indent_size = settings.list_indent_size.max(1);
    let max_blank = settings.max_blank_lines;

    let mut fence: Option<String> = None;
    let mut last_level = 0usize;
    let mut seen_h1 = false;
    let mut blank_run = 0usize;

    for (idx, line) in lines.iter().enumerate() {
        let n = idx + 1;

        if settings.enabled("trailing-whitespace") && (line.ends_with(' ') || line.ends_with('\t')) {
            issues.push(issue(
                n,
                line.len(),
                Severity::Error,
                "trailing-whitespace",
                "Line has trailing whitespace".into(),
            ));
        }

        // The empty piece after the final newline is not a line.
        let after_final_newline = idx + 1 == lines.len() && line.is_empty();
        if line.trim().is_empty() && !after_final_newline {
            blank_run += 1;
            if blank_run > max_blank && settings.enabled("blank-line-spacing") {
                issues.push(issue(
                    n,
                    1,
                    Severity::Warning,
                    "blank-line-spacing",
                    format!("More than {max_blank} consecutive blank lines"),
                ));
            }
        } else {
            blank_run = 0;
        }

        if idx < body_start {
            continue;
        }

        if let Some(caps) = FENCE.captures(line) {
            let marker = &caps[1];
            match &fence {
                Some(open) if marker.starts_with(open.as_str()) && caps[2].is_empty() => fence = None,
                Some(_) => {}
                None => {
                    if caps[2].is_empty() && settings.enabled("code-block-language") {
                        issues.push(issue(
                            n,
                            1,
                            Severity::Warning,
                            "code-block-language",
                            "Code blocks should specify a language for syntax highlighting".into(),
                        ));
                    }
                    fence = Some(marker.to_string());
                }
            }
            continue;
        }
        if fence.is_some() {
            continue;
        }

        let width = line.chars().count();
        if width > settings.max_line_length && settings.enabled("line-length") {
            issues.push(issue(
                n,
                settings.max_line_length + 1,
                Severity::Warning,
                "line-length",
                format!(
                    "Line exceeds maximum length of {} characters ({width})",
                    settings.max_line_length
                ),
            ));
        }

        if let Some(caps) = HEADING.captures(line) {
            let level = caps[1].len();
            if settings.enabled("heading-hierarchy") {
                if level == 1 && seen_h1 {
                    issues.push(issue(
                        n,
                        1,
                        Severity::Warning,
                        "heading-hierarchy",
                        "Multiple H1 headings found, consider using H2 for subsequent sections".into(),
                    ));
                }
                if last_level > 0 && level > last_level + 1 {
                    issues.push(issue(
                        n,
                        1,
                        Severity::Error,
                        "heading-hierarchy",
                        format!(
                            "Heading level {level} skips level {} (should not skip levels)",
                            last_level + 1
                        ),
                    ));
                }
            }
            seen_h1 |= level == 1;
            last_level = level;
            continue;
        }

        if let Some(caps) = LIST_ITEM.captures(line) {
            let indent = caps[1].replace('\t', "    ").len();
            if indent % indent_size != 0 && settings.enabled("list-indentation") {
                issues.push(issue(
                    n,
                    1,
                    Severity::Warning,
                    "list-indentation",
                    format!("List items should use {indent_size}-space indentation for nesting"),
                ));
            }
        }

        if settings.enabled("emphasis-consistency")
            && !line.contains('*')
            && UNDERSCORE_EMPHASIS.is_match(line)
        {
            issues.push(issue(
                n,
                1,
                Severity::Info,
                "emphasis-consistency",
                "Prefer * for italic emphasis over _".into(),
            ));
        }
    }

    issues
}

/// Index of the closing `---` when the document opens with front matter.
fn frontmatter_end(lines: &[&str]) -> Option<usize> {
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return None;
    }
    lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, l)| matches!(l.trim_end(), "---" | "..."))
        .map(|(i, _)| i)
}
