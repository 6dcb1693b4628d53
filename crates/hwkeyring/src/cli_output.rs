//! Centralised helpers for CLI output. Results go to stdout as JSON; notices go to stderr.

use eyre::Context as _;
use serde::Serialize;
use std::io::Write as _;

/// Print `value` as one line of JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(value).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")
}

/// Print a human-facing notice on stderr. Write failures are ignored.
pub fn print_notice(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}
