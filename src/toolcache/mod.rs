//! Per-workspace, per-host cache of discovered external tools.
//!
//! Short-lived hook processes share one JSON document under
//! `<workspace>/.claude/cc-lintgate-tools.json`. Every write re-reads the
//! document, applies the change and atomically replaces the file, so
//! concurrent invocations never observe a torn file.

pub mod discovery;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema version of the cache document.
pub const CACHE_VERSION: &str = "1.0.0";
/// Base name of the cache file inside `.claude/`.
pub const CACHE_FILE: &str = "cc-lintgate-tools.json";
/// Maximum age of a discovery result.
pub const TOOL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("tool cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize tool cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    #[default]
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub available: bool,
    pub last_check: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mod_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: ToolSource,
}

impl ToolCacheEntry {
    pub fn missing(now: DateTime<Utc>) -> Self {
        Self {
            path: None,
            version: None,
            available: false,
            last_check: now,
            file_mod_time: None,
            source: ToolSource::Global,
        }
    }

    /// Usable without re-discovery: recent enough, and the binary unchanged.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        // A check stamped in the future (clock skew) counts as recent.
        if (now - self.last_check).to_std().is_ok_and(|age| age > TOOL_TTL) {
            return false;
        }
        match &self.path {
            Some(path) => {
                let Some(current) = discovery::modified_time(path) else {
                    return false;
                };
                self.file_mod_time == Some(current)
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_time_ms: u64,
    pub average_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinterStats {
    pub files_processed: u64,
    pub issues_found: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_cores: usize,
    pub os: String,
    pub arch: String,
}

impl SystemMetrics {
    pub fn current() -> Self {
        Self {
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceCache {
    #[serde(default)]
    pub system: SystemMetrics,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolMetrics>,
    #[serde(default)]
    pub linters: BTreeMap<String, LinterStats>,
}

/// The persisted document: `tools[category][name]` plus telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalToolCache {
    pub version: String,
    pub git_root: PathBuf,
    pub hostname: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub tools: BTreeMap<String, BTreeMap<String, ToolCacheEntry>>,
    #[serde(default)]
    pub performance: PerformanceCache,
}

impl UniversalToolCache {
    pub fn new(git_root: &Path, hostname: &str) -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            git_root: git_root.to_path_buf(),
            hostname: hostname.to_string(),
            last_updated: Utc::now(),
            tools: BTreeMap::new(),
            performance: PerformanceCache {
                system: SystemMetrics::current(),
                ..PerformanceCache::default()
            },
        }
    }

    /// Whether this document was written for the given workspace and host.
    pub fn belongs_to(&self, git_root: &Path, hostname: &str) -> bool {
        self.version == CACHE_VERSION && self.git_root == git_root && self.hostname == hostname
    }

    pub fn tool(&self, category: &str, name: &str) -> Option<&ToolCacheEntry> {
        self.tools.get(category).and_then(|c| c.get(name))
    }
}

/// Telemetry collected during one invocation, merged into the document on flush.
#[derive(Debug, Default)]
struct PendingStats {
    tools: BTreeMap<String, ToolMetrics>,
    linters: BTreeMap<String, LinterStats>,
}

impl PendingStats {
    fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.linters.is_empty()
    }
}

/// Owner of the tool cache for one workspace. Shared across lint tasks via `Arc`.
pub struct CacheManager {
    workspace: PathBuf,
    cache_path: PathBuf,
    hostname: String,
    probe_versions: bool,
    doc: RwLock<Option<UniversalToolCache>>,
    write_lock: Mutex<()>,
    pending: Mutex<PendingStats>,
}

impl CacheManager {
    /// Cache for the workspace containing `cwd`.
    pub fn for_path(cwd: &Path) -> Self {
        let workspace = find_workspace(cwd, dirs::home_dir().as_deref());
        Self::new(workspace, current_hostname())
    }

    pub fn new(workspace: PathBuf, hostname: String) -> Self {
        let cache_path = workspace.join(".claude").join(CACHE_FILE);
        Self {
            workspace,
            cache_path,
            hostname,
            probe_versions: true,
            doc: RwLock::new(None),
            write_lock: Mutex::new(()),
            pending: Mutex::new(PendingStats::default()),
        }
    }

    /// Skip running `--version` on discovered binaries.
    pub fn without_version_probe(mut self) -> Self {
        self.probe_versions = false;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Read the on-disk document, or a fresh one if missing, corrupt or foreign.
    fn read_document(&self) -> UniversalToolCache {
        let fresh = || UniversalToolCache::new(&self.workspace, &self.hostname);
        let Ok(data) = std::fs::read_to_string(&self.cache_path) else {
            return fresh();
        };
        match serde_json::from_str::<UniversalToolCache>(&data) {
            Ok(doc) if doc.belongs_to(&self.workspace, &self.hostname) => doc,
            Ok(doc) => {
                log::info!(
                    "discarding tool cache for {} on {} (expected {} on {})",
                    doc.git_root.display(),
                    doc.hostname,
                    self.workspace.display(),
                    self.hostname
                );
                fresh()
            }
            Err(e) => {
                log::warn!("discarding unreadable tool cache {}: {e}", self.cache_path.display());
                fresh()
            }
        }
    }

    fn ensure_loaded(&self) {
        if self.doc.read().is_some() {
            return;
        }
        let loaded = self.read_document();
        let mut guard = self.doc.write();
        if guard.is_none() {
            *guard = Some(loaded);
        }
    }

    /// Snapshot of the in-memory document.
    pub fn document(&self) -> Option<UniversalToolCache> {
        self.ensure_loaded();
        self.doc.read().clone()
    }

    pub fn get_tool(&self, category: &str, name: &str) -> Option<ToolCacheEntry> {
        self.ensure_loaded();
        self.doc
            .read()
            .as_ref()
            .and_then(|d| d.tool(category, name).cloned())
    }

    /// Cached entry when fresh, else a new discovery written back to the cache.
    ///
    /// A missing tool is a normal result (`available == false`), never an error.
    pub async fn discover_tool(&self, category: &str, name: &str) -> ToolCacheEntry {
        if let Some(entry) = self.get_tool(category, name)
            && entry.is_fresh(Utc::now())
        {
            return entry;
        }

        let entry = discovery::discover(name, &self.workspace, self.probe_versions).await;
        if let Err(e) = self.update_tool(category, name, entry.clone()) {
            log::warn!("failed to update tool cache for {name}: {e}");
        }
        entry
    }

    /// First available tool out of `names`, in order.
    pub async fn discover_first(&self, category: &str, names: &[&str]) -> Option<(String, ToolCacheEntry)> {
        for name in names {
            let entry = self.discover_tool(category, name).await;
            if entry.available {
                return Some((name.to_string(), entry));
            }
        }
        None
    }

    /// Record an entry in memory and persist it.
    pub fn update_tool(&self, category: &str, name: &str, entry: ToolCacheEntry) -> Result<(), CacheError> {
        self.ensure_loaded();
        if let Some(doc) = self.doc.write().as_mut() {
            doc.tools
                .entry(category.to_string())
                .or_default()
                .insert(name.to_string(), entry.clone());
        }
        self.persist_with(|doc| {
            doc.tools
                .entry(category.to_string())
                .or_default()
                .insert(name.to_string(), entry);
        })
    }

    /// Account one run of an external tool.
    pub fn record_tool_run(&self, tool: &str, elapsed: Duration, success: bool) {
        let mut pending = self.pending.lock();
        let m = pending.tools.entry(tool.to_string()).or_default();
        add_run(m, elapsed, success, Utc::now());
    }

    /// Account files and issues processed by a linter.
    pub fn record_linter(&self, linter: &str, files: u64, issues: u64) {
        let mut pending = self.pending.lock();
        let s = pending.linters.entry(linter.to_string()).or_default();
        s.files_processed += files;
        s.issues_found += issues;
    }

    /// Merge collected telemetry into the persisted document.
    pub fn flush(&self) -> Result<(), CacheError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        self.persist_with(|doc| {
            let perf = &mut doc.performance;
            perf.system = SystemMetrics::current();
            for (tool, run) in &pending.tools {
                let m = perf.tools.entry(tool.clone()).or_default();
                m.total_runs += run.total_runs;
                m.successful_runs += run.successful_runs;
                m.failed_runs += run.failed_runs;
                m.total_time_ms += run.total_time_ms;
                m.average_time_ms = m.total_time_ms / m.total_runs.max(1);
                m.last_used = run.last_used.or(m.last_used);
            }
            for (linter, stats) in &pending.linters {
                let s = perf.linters.entry(linter.clone()).or_default();
                s.files_processed += stats.files_processed;
                s.issues_found += stats.issues_found;
            }
        })
    }

    /// Read-modify-write of the on-disk document with an atomic replace.
    fn persist_with(&self, apply: impl FnOnce(&mut UniversalToolCache)) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let mut doc = self.read_document();
        apply(&mut doc);
        doc.last_updated = Utc::now();

        let dir = self
            .cache_path
            .parent()
            .unwrap_or(self.workspace.as_path());
        let io_err = |source: std::io::Error| CacheError::Io {
            path: self.cache_path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let data = serde_json::to_vec_pretty(&doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.persist(&self.cache_path).map_err(|e| io_err(e.error))?;

        *self.doc.write() = Some(doc);
        Ok(())
    }
}

fn add_run(m: &mut ToolMetrics, elapsed: Duration, success: bool, now: DateTime<Utc>) {
    m.total_runs += 1;
    if success {
        m.successful_runs += 1;
    } else {
        m.failed_runs += 1;
    }
    m.total_time_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    m.average_time_ms = m.total_time_ms / m.total_runs;
    m.last_used = Some(now);
}

/// Nearest ancestor with a project `.claude` dir, else with `.git`, else `cwd`.
pub fn find_workspace(cwd: &Path, home: Option<&Path>) -> PathBuf {
    if let Some(dir) = cwd
        .ancestors()
        .find(|d| Some(*d) != home && d.join(".claude").is_dir())
    {
        return dir.to_path_buf();
    }
    if let Some(dir) = cwd.ancestors().find(|d| d.join(".git").exists()) {
        return dir.to_path_buf();
    }
    cwd.to_path_buf()
}

pub fn current_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("unknown"))
}
