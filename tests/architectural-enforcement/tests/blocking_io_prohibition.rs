//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in production code MUST NOT perform blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, async reqwest.
//!
//! Blocking calls in synchronous functions (config loading before the runtime
//! starts, for example) are acceptable.

use architectural_enforcement::{in_async_fn, scan};

const BLOCKING_CALLS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|lines, idx| {
        if !in_async_fn(lines, idx) {
            return None;
        }
        BLOCKING_CALLS
            .iter()
            .find(|(pattern, _)| lines[idx].contains(pattern))
            .map(|(_, reason)| *reason)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O calls found in async production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::fs, tokio::net and tokio::io inside async functions");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}
