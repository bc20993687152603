//! cc-lintgate: a Claude Code hook that lints files the agent writes.
//!
//! Each invocation reads one hook request from stdin, runs the linters that
//! apply to the written file, and answers with one of two decisions:
//! [`eval::Decision::Approve`] or [`eval::Decision::Block`]. The process exit
//! code carries the verdict: `0` approve, `2` block, `1` a non-blocking
//! failure (bad input, timeout, internal error).
//!
//! # Architecture
//!
//! - **[`protocol`]**: Hook request decoding, response encoding, exit codes.
//! - **[`eval`]**: Rule engines: the linting engine, composition, decision types.
//! - **[`linters`]**: Per-language adapters over external tools, bounded parallel runner.
//! - **[`config`]**: Layered JSON configuration and glob-scoped rule overrides.
//! - **[`toolcache`]**: Workspace-scoped, disk-persisted tool discovery cache.
//! - **[`registry`]**: Priority-ordered hook configurations and their engines.
//! - **[`executor`]**: Read, decode, evaluate under a deadline, map to an exit code.
//! - **[`logging`]**: File logger and `~/.local/share/cc-lintgate/decisions.log`.

/// Configuration types, layer loading, and override pattern matching.
pub mod config;
/// Rule engines and decision types.
pub mod eval;
/// Top-level request driver.
pub mod executor;
/// Linter adapters and the parallel job runner.
pub mod linters;
/// File logging and decision records.
pub mod logging;
/// Hook wire format.
pub mod protocol;
/// Hook registry.
pub mod registry;
/// Tool discovery cache.
pub mod toolcache;

use std::path::Path;
use std::sync::Arc;

use config::AppConfig;
use eval::LintingRuleEngine;
use linters::{LintError, LinterSet};
use toolcache::CacheManager;

/// Linting engine over the built-in adapters, caching tools for the workspace around `cwd`.
pub fn build_engine(config: AppConfig, cwd: &Path) -> Result<LintingRuleEngine, LintError> {
    let cache = Arc::new(CacheManager::for_path(cwd));
    LintingRuleEngine::new(config, LinterSet::builtin(), cache)
}
