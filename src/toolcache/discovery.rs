use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use super::{ToolCacheEntry, ToolSource};

/// Project-local bin directories, searched before `PATH`.
pub const LOCAL_BIN_DIRS: &[&str] = &["node_modules/.bin", ".venv/bin", "venv/bin"];

const VERSION_FLAGS: &[&str] = &["--version", "-V", "-v", "version"];
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Locate `name`, local bin directories first, and describe what was found.
pub async fn discover(name: &str, workspace: &Path, probe_version: bool) -> ToolCacheEntry {
    let now = Utc::now();
    let Some((path, source)) = locate(name, workspace) else {
        log::debug!("tool {name} not found");
        return ToolCacheEntry::missing(now);
    };

    let file_mod_time = modified_time(&path);
    let version = if probe_version {
        probe_version_of(&path).await
    } else {
        None
    };
    log::debug!(
        "discovered {name} at {} ({:?}, {})",
        path.display(),
        source,
        version.as_deref().unwrap_or("unknown version")
    );

    ToolCacheEntry {
        path: Some(path),
        version,
        available: true,
        last_check: now,
        file_mod_time,
        source,
    }
}

fn locate(name: &str, workspace: &Path) -> Option<(PathBuf, ToolSource)> {
    for dir in LOCAL_BIN_DIRS {
        let dir = workspace.join(dir);
        if !dir.is_dir() {
            continue;
        }
        if let Ok(path) = which::which_in(name, Some(&dir), workspace) {
            return Some((path, ToolSource::Local));
        }
    }
    which::which(name).ok().map(|p| (p, ToolSource::Global))
}

pub(crate) fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// First non-empty output line of the first version flag that succeeds.
async fn probe_version_of(path: &Path) -> Option<String> {
    for flag in VERSION_FLAGS {
        let mut cmd = Command::new(path);
        cmd.arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            _ => continue,
        };
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let line = String::from_utf8_lossy(&text)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);
        if line.is_some() {
            return line;
        }
    }
    None
}
