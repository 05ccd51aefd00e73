use std::path::Path;
use std::process::{Command, Output};

use anyhow::{bail, Context, Result};

/// Read a sysfs/procfs value, trimming trailing NULs and whitespace.
pub fn read_trimmed(path: &Path) -> Result<String> {
    let val = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(val.trim_end_matches('\0').trim().to_string())
}

/// Parse kernel cpu list format: "0,6" or "0-2,6-8" or "3".
pub fn parse_cpu_list(s: &str) -> Vec<u32> {
    let mut result = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(s), Ok(e)) = (start.parse::<u32>(), end.parse::<u32>()) {
                for cpu in s..=e {
                    result.push(cpu);
                }
            }
        } else if let Ok(cpu) = part.parse::<u32>() {
            result.push(cpu);
        }
    }
    result.sort_unstable();
    result.dedup();
    result
}

/// Logical cpu ids present under {sys}/devices/system/cpu, numerically ordered.
pub fn cpu_ids(sys_root: &Path) -> Result<Vec<u32>> {
    let dir = sys_root.join("devices/system/cpu");
    let mut ids = Vec::new();
    for entry in
        std::fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name.strip_prefix("cpu").and_then(|s| s.parse::<u32>().ok()) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        bail!("no cpus visible under {}", dir.display());
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Run an external tool to completion and capture its output. A spawn
/// failure is an error; a non-zero exit status is left to the caller,
/// since some collaborators report ignorable failures that way.
pub fn run_tool(tool: &str, args: &[&str]) -> Result<Output> {
    Command::new(tool)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {} {}", tool, args.join(" ")))
}

/// Stdout and stderr of a finished tool, merged for diagnostics.
pub fn tool_output(out: &Output) -> String {
    let mut text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let err = String::from_utf8_lossy(&out.stderr);
    let err = err.trim();
    if !err.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(err);
    }
    text
}
