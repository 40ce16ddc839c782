//! Global output mode flags and printing helpers.
//!
//! `main` records `--json`, `--quiet` and `--verbose` in the environment so
//! every command can consult them without threading flags through.

use serde::Serialize;

pub const JSON_VAR: &str = "FACSIMILE_JSON";
pub const QUIET_VAR: &str = "FACSIMILE_QUIET";
pub const VERBOSE_VAR: &str = "FACSIMILE_VERBOSE";

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

pub fn is_json() -> bool {
    flag(JSON_VAR)
}

pub fn is_quiet() -> bool {
    flag(QUIET_VAR)
}

pub fn is_verbose() -> bool {
    flag(VERBOSE_VAR)
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("  Error: failed to serialize output: {e}"),
    }
}

/// Status line on stderr, suppressed by `--quiet` and `--json`.
pub fn status(message: &str) {
    if !is_quiet() && !is_json() {
        eprintln!("  {message}");
    }
}
