use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

use crate::eval::HookResponse;
use crate::protocol::HookMessage;

/// Environment variable selecting the log level (`error` .. `trace`, or `off`).
pub const LOG_ENV: &str = "CC_LINTGATE_LOG";

/// `~/.local/share/cc-lintgate`, if a home directory is known.
pub fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".local/share/cc-lintgate"))
}

fn level_from_env(debug: bool) -> LevelFilter {
    if debug {
        return LevelFilter::Debug;
    }
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the file logger. Stdout and stderr carry the hook protocol, so
/// diagnostics only ever go to `cc-lintgate.log`.
/// Best-effort: any failure leaves logging disabled.
pub fn init(debug: bool) {
    let level = level_from_env(debug);
    if level == LevelFilter::Off {
        return;
    }
    let Some(dir) = log_dir() else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("cc-lintgate.log"))
    else {
        return;
    };
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Off)
        .build();
    let _ = WriteLogger::init(level, config, file);
}

/// Append a decision record to `decisions.log`.
/// Best-effort: failures are silently ignored (logging must never block the hook).
pub fn log_decision(msg: &HookMessage, response: &HookResponse) {
    let Some(dir) = log_dir() else {
        return;
    };
    let _ = std::fs::create_dir_all(&dir);
    let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("decisions.log"))
    else {
        return;
    };
    let _ = writeln!(file, "{}", decision_line(msg, response));
}

/// `timestamp  decision  event  tool  file  reason`, tab separated, one line.
fn decision_line(msg: &HookMessage, response: &HookResponse) -> String {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let file: String = msg
        .tool_input
        .file_path()
        .unwrap_or("-")
        .chars()
        .take(200)
        .collect();
    let reason = response
        .reason
        .as_deref()
        .or(response.message.as_deref())
        .unwrap_or("")
        .replace('\n', "; ");
    format!(
        "{ts}\t{decision}\t{event}\t{tool}\t{file}\t{reason}",
        decision = response.decision.as_str(),
        event = msg.event_type,
        tool = if msg.tool_name.is_empty() { "-" } else { msg.tool_name.as_str() },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[test]
    fn decision_line_is_single_line() {
        let msg = decode(
            br#"{"hook_event_name":"PreToolUse","tool_name":"Write","tool_input":{"file_path":"/p/a.md","content":"x"}}"#,
        )
        .unwrap();
        let mut resp = HookResponse::block("Found 2 error(s) in a.md");
        resp.details = Some("line one\nline two".into());
        let line = decision_line(&msg, &resp);
        assert!(!line.contains('\n'));
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(&fields[1..], &["block", "PreToolUse", "Write", "/p/a.md", "Found 2 error(s) in a.md"]);
    }

    #[test]
    fn multi_line_message_flattened() {
        let msg = decode(br#"{"hook_event_name":"Stop"}"#).unwrap();
        let resp = HookResponse::approve_with_message("a\nb");
        let line = decision_line(&msg, &resp);
        assert!(line.ends_with("approve\tStop\t-\t-\ta; b"));
    }

    #[test]
    fn debug_flag_wins() {
        assert_eq!(level_from_env(true), LevelFilter::Debug);
    }
}
