//! Layered JSON configuration: global, project, project-local, explicit.
//!
//! Each layer is parsed into a [`ConfigOverlay`] and merged into the final
//! [`AppConfig`] in load order. Linter settings merge key-wise, override
//! rules accumulate, scalar settings are replaced by the later layer.

pub mod pattern;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use pattern::matches_pattern;

/// Embedded default configuration (lowest layer).
const DEFAULT_CONFIG: &str = include_str!("../../config.default.json");

/// Base name of the configuration files.
pub const CONFIG_NAME: &str = "cc-lintgate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid duration {0:?}")]
    Duration(String),
}

// ── Final (merged) config types ──

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub parallel: ParallelSettings,
    pub timeout: Option<Duration>,
    pub linters: BTreeMap<String, LinterConfig>,
    pub rules: Vec<RuleOverride>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelSettings {
    pub max_workers: Option<usize>,
    pub disable_parallel: bool,
}

impl ParallelSettings {
    /// Number of lint tasks allowed to run at once.
    pub fn worker_limit(&self) -> usize {
        if self.disable_parallel {
            return 1;
        }
        match self.max_workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LinterConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// A glob-scoped settings fragment, tagged with the file it came from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleOverride {
    pub pattern: String,
    pub linter: String,
    #[serde(default)]
    pub rules: Map<String, Value>,
    #[serde(skip)]
    pub source: PathBuf,
}

impl RuleOverride {
    pub fn applies_to(&self, linter: &str) -> bool {
        self.linter == linter || self.linter == "*"
    }
}

// ── Overlay types (one per config file) ──

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParallelOverlay {
    max_workers: Option<usize>,
    disable_parallel: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationSetting {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    #[serde(default)]
    parallel: Option<ParallelOverlay>,
    #[serde(default)]
    timeout: Option<DurationSetting>,
    #[serde(default)]
    linters: BTreeMap<String, LinterConfig>,
    #[serde(default)]
    rules: Vec<RuleOverride>,
}

impl AppConfig {
    /// Embedded defaults only.
    pub fn default_config() -> Self {
        let mut config = Self::default();
        // The embedded file is covered by `default_config_parses`.
        if let Ok(overlay) = serde_json::from_str::<ConfigOverlay>(DEFAULT_CONFIG) {
            let _ = config.apply_overlay(overlay, Path::new("<default>"));
        }
        config
    }

    /// Merge one layer on top of this config.
    fn apply_overlay(&mut self, overlay: ConfigOverlay, source: &Path) -> Result<(), ConfigError> {
        if let Some(p) = overlay.parallel {
            if p.max_workers.is_some() {
                self.parallel.max_workers = p.max_workers;
            }
            if let Some(disable) = p.disable_parallel {
                self.parallel.disable_parallel = disable;
            }
        }

        if let Some(timeout) = overlay.timeout {
            self.timeout = Some(match timeout {
                DurationSetting::Seconds(s) => Duration::from_secs(s),
                DurationSetting::Text(s) => parse_duration(&s)?,
            });
        }

        for (name, layer) in overlay.linters {
            let entry = self.linters.entry(name).or_default();
            if layer.enabled.is_some() {
                entry.enabled = layer.enabled;
            }
            for (key, value) in layer.config {
                entry.config.insert(key, value);
            }
        }

        self.rules.extend(overlay.rules.into_iter().map(|mut rule| {
            rule.source = source.to_path_buf();
            rule
        }));
        Ok(())
    }

    /// Parse and merge the JSON document at `path`.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_str(&data, path)
    }

    fn merge_str(&mut self, data: &str, source: &Path) -> Result<(), ConfigError> {
        let overlay: ConfigOverlay =
            serde_json::from_str(data).map_err(|source_err| ConfigError::Parse {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        self.apply_overlay(overlay, source)
    }

    /// Merged base settings for a linter, if any layer mentions it.
    pub fn linter_config(&self, linter: &str) -> Option<&Map<String, Value>> {
        self.linters.get(linter).map(|l| &l.config)
    }

    /// Linters are enabled unless some layer says otherwise.
    pub fn is_linter_enabled(&self, linter: &str) -> bool {
        self.linters
            .get(linter)
            .and_then(|l| l.enabled)
            .unwrap_or(true)
    }

    /// Every override for `linter` (or `*`) whose pattern matches `path`, in load order.
    pub fn rule_overrides(&self, path: &str, linter: &str) -> Vec<&RuleOverride> {
        let cwd = std::env::current_dir().ok();
        self.rule_overrides_in(path, linter, cwd.as_deref())
    }

    pub fn rule_overrides_in(&self, path: &str, linter: &str, cwd: Option<&Path>) -> Vec<&RuleOverride> {
        self.rules
            .iter()
            .filter(|r| r.applies_to(linter))
            .filter(|r| pattern::matches_pattern_in(&r.pattern, path, cwd))
            .collect()
    }

    /// Base settings with every matching override applied in order.
    pub fn effective_settings(&self, linter: &str, path: &str) -> Map<String, Value> {
        let cwd = std::env::current_dir().ok();
        self.effective_settings_in(linter, path, cwd.as_deref())
    }

    pub fn effective_settings_in(&self, linter: &str, path: &str, cwd: Option<&Path>) -> Map<String, Value> {
        let mut settings = self.linter_config(linter).cloned().unwrap_or_default();
        for rule in self.rule_overrides_in(path, linter, cwd) {
            for (key, value) in &rule.rules {
                settings.insert(key.clone(), value.clone());
            }
        }
        settings
    }
}

/// Resolves and loads the configuration layers for one invocation.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    home: Option<PathBuf>,
    project_root: PathBuf,
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(cwd: &Path) -> Self {
        let home = dirs::home_dir();
        let project_root = find_project_root(cwd, home.as_deref());
        Self {
            home,
            project_root,
            explicit: None,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Optional layers, lowest precedence first. The explicit path is not included.
    pub fn layer_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        let global = self
            .home
            .as_ref()
            .map(|h| h.join(".claude").join(format!("{CONFIG_NAME}.json")));
        if let Some(global) = &global {
            paths.push(global.clone());
        }
        let claude = self.project_root.join(".claude");
        let project = claude.join(format!("{CONFIG_NAME}.json"));
        if global.as_ref() != Some(&project) {
            paths.push(project);
        }
        paths.push(claude.join(format!("{CONFIG_NAME}.local.json")));
        paths
    }

    /// Defaults, then each existing layer, then the explicit file (which must exist).
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default_config();
        for path in self.layer_paths() {
            if !path.is_file() {
                continue;
            }
            log::debug!("loading config layer {}", path.display());
            config.merge_file(&path)?;
        }
        if let Some(explicit) = &self.explicit {
            if !explicit.is_file() {
                return Err(ConfigError::NotFound(explicit.clone()));
            }
            log::debug!("loading explicit config {}", explicit.display());
            config.merge_file(explicit)?;
        }
        Ok(config)
    }
}

/// Nearest ancestor of `start` holding a project `.claude` or `.git`; else `start`.
///
/// The home directory's `.claude` is the global layer and does not mark a project.
pub fn find_project_root(start: &Path, home: Option<&Path>) -> PathBuf {
    for dir in start.ancestors() {
        if dir.join(".git").exists() {
            return dir.to_path_buf();
        }
        if Some(dir) != home && dir.join(".claude").is_dir() {
            return dir.to_path_buf();
        }
    }
    start.to_path_buf()
}

/// Parse a duration such as `60s`, `1m30s`, `500ms`, `1.5h` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let err = || ConfigError::Duration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(err());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if num_end == 0 {
            return Err(err());
        }
        let value: f64 = rest[..num_end].parse().map_err(|_| err())?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(err()),
        };
        total += value * scale;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(total).map_err(|_| err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply_str(config: &mut AppConfig, json: &str, source: &str) {
        config.merge_str(json, Path::new(source)).unwrap();
    }

    #[test]
    fn default_config_parses() {
        let overlay: ConfigOverlay = serde_json::from_str(DEFAULT_CONFIG).unwrap();
        assert!(overlay.linters.contains_key("markdown"));
    }

    #[test]
    fn default_markdown_limits() {
        let config = AppConfig::default_config();
        let md = config.linter_config("markdown").unwrap();
        assert_eq!(md["maxLineLength"], json!(120));
        assert_eq!(md["maxBlankLines"], json!(2));
    }

    #[test]
    fn linters_enabled_by_default() {
        let config = AppConfig::default();
        assert!(config.is_linter_enabled("go"));
        assert!(config.linter_config("go").is_none());
    }

    #[test]
    fn linter_config_merges_keywise() {
        let mut config = AppConfig::default();
        apply_str(
            &mut config,
            r#"{"linters":{"markdown":{"config":{"maxLineLength":80,"listIndentSize":4}}}}"#,
            "a",
        );
        apply_str(
            &mut config,
            r#"{"linters":{"markdown":{"enabled":false,"config":{"maxLineLength":100}}}}"#,
            "b",
        );
        let md = config.linter_config("markdown").unwrap();
        assert_eq!(md["maxLineLength"], json!(100));
        assert_eq!(md["listIndentSize"], json!(4));
        assert!(!config.is_linter_enabled("markdown"));
    }

    #[test]
    fn omitted_enabled_keeps_previous() {
        let mut config = AppConfig::default();
        apply_str(&mut config, r#"{"linters":{"go":{"enabled":false}}}"#, "a");
        apply_str(&mut config, r#"{"linters":{"go":{"config":{"x":1}}}}"#, "b");
        assert!(!config.is_linter_enabled("go"));
    }

    #[test]
    fn rules_accumulate_with_source() {
        let mut config = AppConfig::default();
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"*.md","linter":"markdown","rules":{"maxLineLength":100}}]}"#,
            "/home/u/.claude/cc-lintgate.json",
        );
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"*.md","linter":"markdown","rules":{"maxLineLength":200}}]}"#,
            "/p/.claude/cc-lintgate.json",
        );
        let overrides = config.rule_overrides_in("docs/a.md", "markdown", None);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].source, Path::new("/home/u/.claude/cc-lintgate.json"));
        assert_eq!(overrides[1].rules["maxLineLength"], json!(200));

        let settings = config.effective_settings_in("markdown", "docs/a.md", None);
        assert_eq!(settings["maxLineLength"], json!(200));
    }

    #[test]
    fn layered_overrides_with_different_keys_both_apply() {
        let mut config = AppConfig::default();
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"*.md","linter":"markdown","rules":{"maxLineLength":100,"maxBlankLines":3}}]}"#,
            "/home/u/.claude/cc-lintgate.json",
        );
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"*.md","linter":"markdown","rules":{"requireFrontmatter":true,"maxBlankLines":1}}]}"#,
            "/p/.claude/cc-lintgate.local.json",
        );
        let overrides = config.rule_overrides_in("docs/a.md", "markdown", None);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[1].source, Path::new("/p/.claude/cc-lintgate.local.json"));
        assert!(!overrides[1].rules.contains_key("maxLineLength"));

        let settings = config.effective_settings_in("markdown", "docs/a.md", None);
        assert_eq!(settings["maxLineLength"], json!(100));
        assert_eq!(settings["requireFrontmatter"], json!(true));
        assert_eq!(settings["maxBlankLines"], json!(1));
    }

    #[test]
    fn wildcard_linter_override() {
        let mut config = AppConfig::default();
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"vendor/**","linter":"*","rules":{"disabled":true}}]}"#,
            "a",
        );
        assert_eq!(config.rule_overrides_in("vendor/x/y.go", "go", None).len(), 1);
        assert!(config.rule_overrides_in("src/y.go", "go", None).is_empty());
        assert_eq!(config.rule_overrides_in("vendor/x/y.go", "python", None).len(), 1);
    }

    #[test]
    fn override_for_other_linter_ignored() {
        let mut config = AppConfig::default();
        apply_str(
            &mut config,
            r#"{"rules":[{"pattern":"*.md","linter":"json","rules":{"a":1}}]}"#,
            "a",
        );
        assert!(config.rule_overrides_in("a.md", "markdown", None).is_empty());
    }

    #[test]
    fn parallel_fields_override_individually() {
        let mut config = AppConfig::default();
        apply_str(&mut config, r#"{"parallel":{"maxWorkers":3}}"#, "a");
        apply_str(&mut config, r#"{"parallel":{"disableParallel":false}}"#, "b");
        assert_eq!(config.parallel.max_workers, Some(3));
        assert_eq!(config.parallel.worker_limit(), 3);
        apply_str(&mut config, r#"{"parallel":{"disableParallel":true}}"#, "c");
        assert_eq!(config.parallel.worker_limit(), 1);
    }

    #[test]
    fn timeout_string_and_seconds() {
        let mut config = AppConfig::default();
        apply_str(&mut config, r#"{"timeout":"1m30s"}"#, "a");
        assert_eq!(config.timeout, Some(Duration::from_secs(90)));
        apply_str(&mut config, r#"{"timeout":5}"#, "b");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn invalid_timeout_is_error() {
        let mut config = AppConfig::default();
        let err = config.merge_str(r#"{"timeout":"soon"}"#, Path::new("a")).unwrap_err();
        assert!(matches!(err, ConfigError::Duration(_)));
    }

    #[test]
    fn parse_durations() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("5").is_ok());
    }

    #[test]
    fn malformed_layer_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let mut config = AppConfig::default();
        assert!(matches!(config.merge_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn loader_layers_in_order() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".claude")).unwrap();
        std::fs::create_dir_all(project.path().join(".claude")).unwrap();
        std::fs::write(
            home.path().join(".claude/cc-lintgate.json"),
            r#"{"timeout":"10s","linters":{"markdown":{"config":{"maxLineLength":90}}}}"#,
        )
        .unwrap();
        std::fs::write(
            project.path().join(".claude/cc-lintgate.json"),
            r#"{"timeout":"20s"}"#,
        )
        .unwrap();
        std::fs::write(
            project.path().join(".claude/cc-lintgate.local.json"),
            r#"{"linters":{"markdown":{"config":{"maxLineLength":70}}}}"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(project.path()).with_home(Some(home.path().to_path_buf()));
        let config = loader.load().unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.linter_config("markdown").unwrap()["maxLineLength"], json!(70));
    }

    #[test]
    fn loader_explicit_must_exist() {
        let project = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(project.path())
            .with_home(None)
            .with_explicit(Some(project.path().join("missing.json")));
        assert!(matches!(loader.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn project_root_found_from_subdir() {
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join(".git")).unwrap();
        let sub = project.path().join("a/b");
        std::fs::create_dir_all(&sub).unwrap();
        assert_eq!(find_project_root(&sub, None), project.path());
    }
}
