use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{EngineError, EvalContext, HookResponse, RuleEngine};
use crate::config::AppConfig;
use crate::linters::parallel::{plan_jobs, run_jobs};
use crate::linters::{Issue, LintContext, LintError, LintFile, Linter, LinterSet, Severity};
use crate::protocol::HookMessage;
use crate::toolcache::CacheManager;

const TAG: &str = "cc-lintgate";

/// Dispatches file writes to every applicable linter and blocks on errors.
pub struct LintingRuleEngine {
    config: AppConfig,
    linters: LinterSet,
    cache: Arc<CacheManager>,
}

impl LintingRuleEngine {
    /// Build the engine, validating each enabled linter's base settings.
    pub fn new(config: AppConfig, linters: LinterSet, cache: Arc<CacheManager>) -> Result<Self, LintError> {
        for linter in linters.iter() {
            if !config.is_linter_enabled(linter.name()) {
                continue;
            }
            let base = config.linter_config(linter.name()).cloned().unwrap_or_default();
            linter.configure(&base)?;
        }
        Ok(Self { config, linters, cache })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn linters(&self) -> &LinterSet {
        &self.linters
    }

    fn applicable<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Arc<dyn Linter>> + 'a {
        self.linters
            .for_path(path)
            .filter(|l| self.config.is_linter_enabled(l.name()))
    }

    /// Lint `files` with every applicable linter under the context deadline.
    pub async fn lint_files(&self, files: Vec<LintFile>, ctx: &EvalContext) -> BTreeMap<PathBuf, Vec<Issue>> {
        let mut items = Vec::new();
        for file in files {
            let key = file.path.to_string_lossy().into_owned();
            for linter in self.applicable(&file.path) {
                let settings = self.config.effective_settings_in(linter.name(), &key, Some(&ctx.cwd));
                items.push((linter.clone(), file.clone(), settings));
            }
        }
        if items.is_empty() {
            return BTreeMap::new();
        }

        let lint_ctx = LintContext {
            deadline: ctx.deadline,
            cache: self.cache.clone(),
            cwd: ctx.cwd.clone(),
        };
        let results = run_jobs(plan_jobs(items), self.config.parallel.worker_limit(), &lint_ctx).await;
        if let Err(e) = self.cache.flush() {
            log::warn!("failed to flush tool cache statistics: {e}");
        }
        results
    }

    async fn lint_and_decide(&self, files: Vec<LintFile>, ctx: &EvalContext) -> HookResponse {
        let results = self.lint_files(files, ctx).await;
        decide(&results, &ctx.cwd)
    }

    /// Human-readable account of what would run for `path`.
    pub fn show_actions(&self, path: &Path, cwd: &Path) -> String {
        let key = path.to_string_lossy();
        let mut out = format!("{}\n", path.display());
        let mut any = false;
        for linter in self.linters.for_path(path) {
            any = true;
            let name = linter.name();
            if !self.config.is_linter_enabled(name) {
                let _ = writeln!(out, "  linter: {name} (disabled)");
                continue;
            }
            let _ = writeln!(out, "  linter: {name}");
            for rule in self.config.rule_overrides_in(&key, name, Some(cwd)) {
                let _ = writeln!(out, "    override: {} (from {})", rule.pattern, rule.source.display());
            }
            let settings = self.config.effective_settings_in(name, &key, Some(cwd));
            let rendered = serde_json::to_string(&settings).unwrap_or_default();
            let _ = writeln!(out, "    settings: {rendered}");
        }
        if !any {
            out.push_str("  no linters apply\n");
        }
        out
    }
}

#[async_trait]
impl RuleEngine for LintingRuleEngine {
    fn name(&self) -> &str {
        "linting"
    }

    async fn pre_tool_use(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        if !msg.tool_input.is_file_mutation() {
            return Ok(HookResponse::approve());
        }
        // Edit and MultiEdit carry no full content; they are checked after the write.
        let (Some(path), Some(content)) = (msg.tool_input.file_path(), msg.tool_input.content()) else {
            return Ok(HookResponse::approve());
        };
        if path.is_empty() {
            return Ok(HookResponse::approve());
        }
        let path = absolute(path, &ctx.cwd);
        if self.applicable(&path).next().is_none() {
            return Ok(HookResponse::approve());
        }
        Ok(self.lint_and_decide(vec![LintFile::new(path, content)], ctx).await)
    }

    async fn post_tool_use(&self, msg: &HookMessage, ctx: &EvalContext) -> Result<HookResponse, EngineError> {
        if !msg.tool_input.is_file_mutation() {
            return Ok(HookResponse::approve());
        }
        if let Some(error) = &msg.tool_error {
            log::debug!("{} reported an error, skipping lint: {error}", msg.tool_name);
            return Ok(HookResponse::approve());
        }
        let Some(path) = msg.tool_input.file_path().filter(|p| !p.is_empty()) else {
            return Ok(HookResponse::approve());
        };
        let path = absolute(path, &ctx.cwd);
        if self.applicable(&path).next().is_none() {
            return Ok(HookResponse::approve());
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                log::info!("cannot read {}: {e}", path.display());
                return Ok(HookResponse::approve_with_message(format!(
                    "- [{TAG}]: cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        let mut files = vec![LintFile::new(path.clone(), content)];
        if let Some(test) = go_test_sibling(&path)
            && let Ok(content) = tokio::fs::read_to_string(&test).await
        {
            files.push(LintFile::new(test, content));
        }
        Ok(self.lint_and_decide(files, ctx).await)
    }
}

fn absolute(path: &str, cwd: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// `foo.go` → `foo_test.go`; `None` for test files and non-Go paths.
fn go_test_sibling(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".go")?;
    if stem.ends_with("_test") {
        return None;
    }
    Some(path.with_file_name(format!("{stem}_test.go")))
}

fn display_path(path: &Path, cwd: &Path) -> String {
    path.strip_prefix(cwd)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Block iff any issue is an error; warnings and info ride along in `message`.
fn decide(results: &BTreeMap<PathBuf, Vec<Issue>>, cwd: &Path) -> HookResponse {
    let with_issues: Vec<_> = results.iter().filter(|(_, issues)| !issues.is_empty()).collect();
    if with_issues.is_empty() {
        return HookResponse::approve();
    }

    let errors: usize = with_issues
        .iter()
        .map(|(_, issues)| issues.iter().filter(|i| i.is_error()).count())
        .sum();
    let blocking = errors > 0;
    let report = with_issues
        .iter()
        .map(|(path, issues)| format_report(&display_path(path, cwd), issues, blocking))
        .collect::<Vec<_>>()
        .join("\n\n");

    if !blocking {
        return HookResponse::approve_with_message(report);
    }
    let failing: Vec<String> = with_issues
        .iter()
        .filter(|(_, issues)| issues.iter().any(Issue::is_error))
        .map(|(path, _)| display_path(path, cwd))
        .collect();
    let mut response = HookResponse::block(format!("Found {errors} error(s) in {}", failing.join(", ")));
    response.details = Some(report);
    response
}

/// One file's block: header, one line per issue, then a footer.
pub fn format_report(display: &str, issues: &[Issue], blocking: bool) -> String {
    let mut out = format!("- [{TAG}:{display}]:");
    for issue in issues {
        let _ = write!(out, "\n  {}", issue.render(display));
    }
    out.push('\n');
    let count = issues.iter().filter(|i| i.severity == Severity::Error).count();
    if blocking && count > 0 {
        let _ = write!(
            out,
            "\nFound {count} blocking issue(s) - fix all above\nBLOCKING: Must fix ALL errors above before continuing"
        );
    } else {
        let _ = write!(
            out,
            "\nFound {} warning(s) - consider fixing\nNON-BLOCKING: Issues detected but you can continue",
            issues.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Decision;
    use crate::eval::testing::message;
    use std::time::Duration;

    const BAD_MARKDOWN: &str = "# Title\n\n### Skipped   \n\nBody text.\n";
    const GOOD_MARKDOWN: &str = "# Title\n\n## Section\n\nBody text.\n";

    fn engine(dir: &Path, config: AppConfig) -> LintingRuleEngine {
        let cache = Arc::new(CacheManager::new(dir.to_path_buf(), "test-host".into()).without_version_probe());
        LintingRuleEngine::new(config, LinterSet::builtin(), cache).unwrap()
    }

    fn ctx(dir: &Path) -> EvalContext {
        EvalContext::new(dir.to_path_buf(), Duration::from_secs(10))
    }

    fn write(path: &Path, content: &str) -> HookMessage {
        message(
            "PreToolUse",
            "Write",
            serde_json::json!({"file_path": path, "content": content}),
        )
    }

    #[tokio::test]
    async fn blocks_markdown_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let msg = write(&dir.path().join("README.md"), BAD_MARKDOWN);
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp.decision, Decision::Block);
        assert!(resp.reason.as_deref().unwrap().starts_with("Found 2 error(s) in README.md"));
        let details = resp.details.unwrap();
        assert!(details.starts_with("- [cc-lintgate:README.md]:"));
        assert!(details.contains("trailing whitespace"));
        assert!(details.contains("(heading-hierarchy)"));
        assert!(details.contains("BLOCKING"));
    }

    #[test]
    fn warning_only_file_in_blocking_report_gets_warning_footer() {
        let path = Path::new("main_test.go");
        let issues = vec![Issue::new(path, Severity::Warning, "gofmt", "File is not properly formatted with gofmt")];
        let report = format_report("main_test.go", &issues, true);
        assert!(report.contains("Found 1 warning(s) - consider fixing"));
        assert!(!report.contains("BLOCKING:"));
        assert!(!report.contains("Found 0 blocking"));
    }

    #[tokio::test]
    async fn clean_markdown_approves_silently() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let msg = write(&dir.path().join("README.md"), GOOD_MARKDOWN);
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp, HookResponse::approve());
    }

    #[tokio::test]
    async fn warnings_approve_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let long = format!("# Title\n\n{}\n", "word ".repeat(40).trim_end());
        let msg = write(&dir.path().join("notes.md"), &long);
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp.decision, Decision::Approve);
        let message = resp.message.unwrap();
        assert!(message.contains("(line-length)"));
        assert!(message.contains("NON-BLOCKING"));
    }

    #[tokio::test]
    async fn overrides_and_disabled_linters_apply() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("cc-lintgate.json");
        std::fs::write(
            &config_path,
            r#"{
                "linters": {"json": {"enabled": false}},
                "rules": [{"pattern": "docs/**", "linter": "markdown",
                           "rules": {"disabledRules": ["trailing-whitespace", "heading-hierarchy"]}}]
            }"#,
        )
        .unwrap();
        let mut config = AppConfig::default_config();
        config.merge_file(&config_path).unwrap();
        let engine = engine(dir.path(), config);

        let msg = write(&dir.path().join("docs/guide.md"), BAD_MARKDOWN);
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp.decision, Decision::Approve);

        let msg = write(&dir.path().join("data.json"), "{broken");
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp, HookResponse::approve());
    }

    #[tokio::test]
    async fn non_write_tools_and_bad_shapes_soft_skip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let c = ctx(dir.path());

        let bash = message("PreToolUse", "Bash", serde_json::json!({"command": "ls"}));
        assert_eq!(engine.evaluate(&bash, &c).await.unwrap(), HookResponse::approve());

        let no_content = message("PreToolUse", "Write", serde_json::json!({"file_path": "a.md"}));
        assert_eq!(engine.evaluate(&no_content, &c).await.unwrap(), HookResponse::approve());

        let wrong_type = message("PreToolUse", "Write", serde_json::json!({"file_path": 7, "content": "x"}));
        assert_eq!(engine.evaluate(&wrong_type, &c).await.unwrap(), HookResponse::approve());

        let edit = message(
            "PreToolUse",
            "Edit",
            serde_json::json!({"file_path": "a.md", "old_string": "a", "new_string": "b  "}),
        );
        assert_eq!(engine.evaluate(&edit, &c).await.unwrap(), HookResponse::approve());
    }

    #[tokio::test]
    async fn post_tool_use_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let path = dir.path().join("CHANGELOG.md");
        std::fs::write(&path, BAD_MARKDOWN).unwrap();
        let msg = message(
            "PostToolUse",
            "Edit",
            serde_json::json!({"file_path": path, "old_string": "a", "new_string": "b"}),
        );
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert!(resp.is_block());

        let missing = message(
            "PostToolUse",
            "Write",
            serde_json::json!({"file_path": dir.path().join("gone.md"), "content": ""}),
        );
        let resp = engine.evaluate(&missing, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp.decision, Decision::Approve);
        assert!(resp.message.unwrap().contains("cannot read"));
    }

    #[tokio::test]
    async fn post_tool_use_skips_failed_tools() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), AppConfig::default_config());
        let path = dir.path().join("x.md");
        std::fs::write(&path, BAD_MARKDOWN).unwrap();
        let doc = serde_json::json!({
            "hook_event_name": "PostToolUse",
            "tool_name": "Write",
            "tool_input": {"file_path": path, "content": BAD_MARKDOWN},
            "tool_error": "permission denied",
        });
        let msg = crate::protocol::decode(doc.to_string().as_bytes()).unwrap();
        let resp = engine.evaluate(&msg, &ctx(dir.path())).await.unwrap();
        assert_eq!(resp, HookResponse::approve());
    }

    #[tokio::test]
    async fn concurrent_evaluations_agree() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(dir.path(), AppConfig::default_config()));
        let msg = Arc::new(write(&dir.path().join("README.md"), BAD_MARKDOWN));
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let engine = engine.clone();
            let msg = msg.clone();
            let ctx = ctx(dir.path());
            set.spawn(async move { engine.evaluate(&msg, &ctx).await });
        }
        let mut decisions = Vec::new();
        while let Some(joined) = set.join_next().await {
            decisions.push(joined.unwrap().unwrap().decision);
        }
        assert_eq!(decisions.len(), 50);
        assert!(decisions.iter().all(|d| *d == Decision::Block));

        let stats = engine.cache.document().unwrap().performance.linters;
        assert_eq!(stats["markdown"].files_processed, 50);
    }

    #[test]
    fn go_sibling_paths() {
        assert_eq!(
            go_test_sibling(Path::new("/p/pkg/server.go")),
            Some(PathBuf::from("/p/pkg/server_test.go"))
        );
        assert_eq!(go_test_sibling(Path::new("/p/pkg/server_test.go")), None);
        assert_eq!(go_test_sibling(Path::new("/p/README.md")), None);
    }

    #[test]
    fn show_actions_lists_overrides_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("project.json");
        std::fs::write(
            &layer,
            r#"{"rules": [{"pattern": "*.md", "linter": "*", "rules": {"maxLineLength": 80}}]}"#,
        )
        .unwrap();
        let mut config = AppConfig::default_config();
        config.merge_file(&layer).unwrap();
        let engine = engine(dir.path(), config);
        let out = engine.show_actions(Path::new("docs/a.md"), dir.path());
        assert!(out.contains("linter: markdown"));
        assert!(out.contains("override: *.md"));
        assert!(out.contains("project.json"));
        assert!(out.contains("\"maxLineLength\":80"));
        assert!(engine.show_actions(Path::new("Makefile"), dir.path()).contains("no linters apply"));
    }
}
