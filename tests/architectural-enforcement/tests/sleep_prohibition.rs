//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Streams wait on I/O, channels
//! or cancellation tokens, never on a timer standing in for an event.
//! **Exceptions**: test code.

use architectural_enforcement::scan;

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|lines, idx| {
        let line = lines[idx];
        if line.contains("thread::sleep") {
            Some("Thread sleep")
        } else if line.contains("time::sleep") || line.contains("sleep(") {
            Some("Async sleep")
        } else {
            None
        }
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Wait on the stream, a channel or a CancellationToken instead");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
