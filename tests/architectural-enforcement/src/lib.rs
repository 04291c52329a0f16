//! Architectural Enforcement Helpers
//!
//! Source scanning shared by the integration tests in `tests/`, which enforce:
//! - No sleep calls in production code
//! - No blocking I/O inside async functions
//!
//! Scanning is line based. Everything from the first `#[cfg(test)]` line of a
//! file onward is treated as test code, as are `test_utils.rs` files.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["chatstream/core/src", "chatstream/cli/src"];

/// Qualifiers that may precede `fn` in a function signature
const FN_QUALIFIERS: &[&str] = &[
    "pub",
    "pub(crate)",
    "pub(super)",
    "async",
    "const",
    "unsafe",
];

/// A line that breaks an architectural rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source text
    pub text: String,
    /// What rule was broken
    pub reason: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Workspace root, independent of the directory tests run from
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// All production `.rs` files under the workspace's production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            let is_rust = path.extension().and_then(|s| s.to_str()) == Some("rs");
            let is_test_support = path.file_name().and_then(|s| s.to_str()) == Some("test_utils.rs");
            if is_rust && !is_test_support {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files
}

/// Lines before the first `#[cfg(test)]`, with comments stripped
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|line| line.split("//").next().unwrap_or(line))
        .collect()
}

/// Whether `line` opens a function signature, and if so whether it is async
#[must_use]
pub fn fn_signature(line: &str) -> Option<bool> {
    let mut is_async = false;
    for word in line.split_whitespace() {
        if word == "fn" {
            return Some(is_async);
        }
        if !FN_QUALIFIERS.contains(&word) {
            return None;
        }
        if word == "async" {
            is_async = true;
        }
    }
    None
}

/// Whether the function enclosing `lines[idx]` is async
#[must_use]
pub fn in_async_fn(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        if let Some(is_async) = fn_signature(line) {
            return is_async;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("mod ") || trimmed.starts_with("impl") {
            return false;
        }
    }
    false
}

/// Scan every production file, reporting lines `rule` flags
pub fn scan<F>(rule: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize) -> Option<&'static str>,
{
    let mut violations = Vec::new();

    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines = production_lines(&content);
        for idx in 0..lines.len() {
            if let Some(reason) = rule(&lines, idx) {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    text: lines[idx].trim().to_string(),
                    reason,
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_detection() {
        assert_eq!(fn_signature("pub async fn open(&self) {"), Some(true));
        assert_eq!(fn_signature("    fn helper() -> u8 {"), Some(false));
        assert_eq!(fn_signature("pub(crate) fn now_ms() -> u64 {"), Some(false));
        assert_eq!(fn_signature("let f = fn_ptr;"), None);
        assert_eq!(fn_signature("// fn commented"), None);
    }

    #[test]
    fn test_async_context_detection() {
        let code = [
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
            "fn fine() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ];
        assert!(in_async_fn(&code, 1));
        assert!(!in_async_fn(&code, 4));
    }

    #[test]
    fn test_test_modules_are_excluded() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { std::thread::sleep(d); }\n}\n";
        let lines = production_lines(content);
        assert_eq!(lines, vec!["fn a() {}"]);
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(
            files.iter().any(|p| p.ends_with("orchestrator.rs")),
            "scan root resolved incorrectly: {files:?}"
        );
    }
}
