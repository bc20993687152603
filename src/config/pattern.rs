//! Glob matching for override patterns, with `**` spanning directories.

use std::path::Path;

use glob::{MatchOptions, Pattern};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Does `path` match `pattern`, resolving relative forms against the current directory?
pub fn matches_pattern(pattern: &str, path: &str) -> bool {
    let cwd = std::env::current_dir().ok();
    matches_pattern_in(pattern, path, cwd.as_deref())
}

/// Match `path` (and its form relative to `cwd`) against `pattern`.
///
/// Each form is tried directly, then by basename, then with the `**`
/// expansion rules when the pattern contains `**`.
pub fn matches_pattern_in(pattern: &str, path: &str, cwd: Option<&Path>) -> bool {
    let relative = relative_form(path, cwd);
    let forms = [Some(path), relative.as_deref()];

    forms.into_iter().flatten().any(|p| {
        glob_match(pattern, p)
            || glob_match(pattern, basename(p))
            || (pattern.contains("**") && matches_double_star(pattern, p))
    })
}

/// The `**` rules: split at the first `**` into a directory prefix and a
/// trailing pattern.
pub fn matches_double_star(pattern: &str, path: &str) -> bool {
    let Some((prefix, suffix)) = pattern.split_once("**") else {
        return false;
    };
    let prefix = prefix.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');

    if prefix.is_empty() {
        if suffix.is_empty() {
            return true;
        }
        let segments: Vec<&str> = path.split('/').collect();
        return (0..segments.len()).any(|i| glob_match(suffix, &segments[i..].join("/")))
            || glob_match(suffix, basename(path));
    }

    let remainder = if path == prefix {
        ""
    } else if let Some(rest) = path.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
        rest
    } else {
        return false;
    };

    if suffix.is_empty() {
        return true;
    }
    if let Some(tail) = suffix.strip_prefix('*')
        && !suffix.contains('/')
    {
        return remainder.ends_with(tail);
    }
    glob_match(suffix, remainder) || glob_match(suffix, basename(remainder))
}

/// Single-segment match: `*` never crosses `/`, and a `**` run is just `*`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut pattern = pattern.to_string();
    while pattern.contains("**") {
        pattern = pattern.replace("**", "*");
    }
    Pattern::new(&pattern)
        .map(|p| p.matches_with(candidate, OPTIONS))
        .unwrap_or(false)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn relative_form(path: &str, cwd: Option<&Path>) -> Option<String> {
    let p = Path::new(path);
    if !p.is_absolute() {
        return None;
    }
    let rel = p.strip_prefix(cwd?).ok()?;
    Some(rel.to_string_lossy().into_owned())
}
