//! Environment readiness check.

use crate::cli::output;
use crate::config::{ProviderKind, RuntimeConfig};
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use serde_json::json;
use std::process::Command;

const MIN_MEMORY_MB: u64 = 512;

/// Check Chromium, provider credentials, and available memory.
pub async fn run(config: RuntimeConfig) -> Result<()> {
    let chromium = config.chromium_path.clone().or_else(find_chromium);
    let mem_mb = get_available_memory_mb();

    if output::is_json() {
        output::print_json(&json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "chromium": chromium.as_ref().map(|p| p.display().to_string()),
            "providers": config.providers.iter().map(|p| json!({
                "provider": p.kind.as_str(),
                "model": p.model,
            })).collect::<Vec<_>>(),
            "memory_mb": mem_mb,
            "ready": chromium.is_some(),
        }));
        return Ok(());
    }

    println!("Facsimile Doctor");
    println!("================");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome or set FACSIMILE_CHROMIUM_PATH."
        ),
    }

    for kind in ProviderKind::ALL {
        match config.providers.iter().find(|p| p.kind == kind) {
            Some(p) => println!("[OK] {kind}: {} ({})", kind.key_var(), p.model),
            None => println!("[--] {kind}: {} not set", kind.key_var()),
        }
    }
    if config.providers.is_empty() {
        println!("[!!] No provider configured; clones will use the deterministic fallback");
    }

    match mem_mb {
        Some(mb) if mb >= MIN_MEMORY_MB => {
            println!("[OK] Available memory: {mb}MB (>= {MIN_MEMORY_MB}MB required)")
        }
        Some(mb) => {
            println!("[!!] Available memory: {mb}MB (< {MIN_MEMORY_MB}MB, may be insufficient)")
        }
        None => println!("[??] Could not determine available memory"),
    }

    println!();
    if chromium.is_some() {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
        println!("  Captures need a Chromium binary; refinement still works.");
    }
    Ok(())
}

/// Available memory in MB, where the platform tells us.
fn get_available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let bytes: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let output = Command::new("free").arg("-m").output().ok()?;
        parse_free_output(&String::from_utf8_lossy(&output.stdout))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Column 7 of the `Mem:` row of `free -m` is "available".
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_free_output(s: &str) -> Option<u64> {
    s.lines()
        .find(|line| line.starts_with("Mem:"))
        .and_then(|line| line.split_whitespace().nth(6))
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_free_output() {
        let sample = "               total        used        free      shared  buff/cache   available\n\
                      Mem:           15890        4211        6520         310        5158       11045\n\
                      Swap:           2047           0        2047\n";
        assert_eq!(parse_free_output(sample), Some(11045));
        assert_eq!(parse_free_output("nothing here"), None);
    }
}
