use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant as StdInstant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{LintContext, LintError};

/// Captured result of one external tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Run `program` with `args`, optionally feeding `stdin`, bounded by the hook deadline.
///
/// The child is killed if the deadline passes. Non-zero exit is not an
/// error here: most linters exit non-zero when they find something.
pub async fn run_tool<I, S>(
    tool: &str,
    program: &Path,
    args: I,
    stdin: Option<&str>,
    ctx: &LintContext,
) -> Result<ToolOutput, LintError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&ctx.cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = StdInstant::now();
    let mut child = cmd.spawn().map_err(|source| LintError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    // Feed stdin concurrently so a chatty tool cannot deadlock on a full pipe.
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_owned();
            Some(tokio::spawn(async move {
                let _ = pipe.write_all(input.as_bytes()).await;
                let _ = pipe.shutdown().await;
            }))
        }
        _ => None,
    };

    let result = tokio::time::timeout_at(ctx.deadline, child.wait_with_output()).await;
    if let Some(writer) = writer {
        writer.abort();
    }
    let elapsed = started.elapsed();

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            ctx.cache.record_tool_run(tool, elapsed, false);
            return Err(LintError::Spawn {
                tool: tool.to_string(),
                source,
            });
        }
        Err(_) => {
            log::warn!("{tool} killed after exceeding the deadline");
            ctx.cache.record_tool_run(tool, elapsed, false);
            return Err(LintError::Timeout {
                tool: tool.to_string(),
            });
        }
    };

    ctx.cache.record_tool_run(tool, elapsed, output.status.success());
    log::debug!(
        "{tool} exited with {:?} in {}ms",
        output.status.code(),
        elapsed.as_millis()
    );
    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Resolve a tool through the cache, or report it unavailable.
pub async fn require_tool(
    ctx: &LintContext,
    category: &str,
    name: &str,
) -> Result<std::path::PathBuf, LintError> {
    let entry = ctx.cache.discover_tool(category, name).await;
    match entry.path {
        Some(path) if entry.available => Ok(path),
        _ => Err(LintError::ToolUnavailable {
            tool: name.to_string(),
        }),
    }
}
