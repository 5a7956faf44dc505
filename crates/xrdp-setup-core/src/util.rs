//! Small helpers shared by the installer and the ledger tool.

use std::env;
use std::ffi::OsStr;
use std::path::Path;

/// Opt-in switch for longer log and ledger snippets.
pub const DIAGNOSTIC_ENV: &str = "XRDP_SETUP_DIAGNOSTIC";

const SNIPPET_LIMIT: usize = 240;
const DIAGNOSTIC_SNIPPET_LIMIT: usize = 2048;

/// True when `program` resolves to an executable file on `$PATH`.
pub fn program_in_path(program: &str) -> bool {
    if program.contains('/') {
        return is_executable(Path::new(program));
    }
    env::var_os("PATH")
        .is_some_and(|paths| program_in(&paths, program))
}

fn program_in(paths: &OsStr, program: &str) -> bool {
    env::split_paths(paths).any(|dir| is_executable(&dir.join(program)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub fn diagnostic_mode() -> bool {
    env::var(DIAGNOSTIC_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    ["1", "true", "yes", "on"]
        .iter()
        .any(|accepted| value.eq_ignore_ascii_case(accepted))
}

/// Snippet length for logs and ledger summaries.
pub fn log_limit() -> usize {
    if diagnostic_mode() {
        DIAGNOSTIC_SNIPPET_LIMIT
    } else {
        SNIPPET_LIMIT
    }
}

/// Flatten a value onto one line and cap it at `max_len` characters.
pub fn sanitize_log_value(value: &str, max_len: usize) -> String {
    let flattened = value
        .split(|ch: char| ch == '\n' || ch == '\r')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if flattened.chars().count() <= max_len {
        return flattened;
    }
    let kept = flattened.chars().take(max_len).collect::<String>();
    format!("{}...", kept.trim_end())
}

pub fn log_snippet(value: &str) -> String {
    sanitize_log_value(value, log_limit())
}

/// Last `count` non-empty lines of captured command output.
pub fn tail_lines(output: &str, count: usize) -> String {
    let lines = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
