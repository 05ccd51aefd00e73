// Interrupt rerouting with exact restoration. All maskable interrupt
// sources (the default mask plus every /proc/irq/<n>/smp_affinity) are
// pointed at one reserved cpu for the benchmark window; their original
// masks are persisted to a snapshot file first so reset can put every
// single one back.
//
// The snapshot is append-only and written ONLY when it does not already
// exist: if an earlier `set` aborted before its `reset`, that file still
// holds the true pre-benchmark state, and a repeated `set` writing its
// own view would capture already-mutated masks. First writer wins.
//
// A fixed skip list covers sources the kernel refuses to reroute (the
// timer interrupt, cascade lines). Those are never written, never saved,
// never restored.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};

use crate::config::Config;
use crate::util::read_trimmed;

pub struct IrqAffinity<'a> {
    cfg: &'a Config,
}

impl<'a> IrqAffinity<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    /// Affinity files eligible for rerouting: the default mask first, then
    /// every per-interrupt mask in numeric order, minus the skip list.
    fn affinity_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.cfg.proc_root.join("irq");
        let mut files = vec![dir.join("default_smp_affinity")];
        let mut irqs: Vec<u64> = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if self.cfg.irq_skip.iter().any(|skip| *skip == name) {
                continue;
            }
            if let Ok(irq) = name.parse::<u64>() {
                irqs.push(irq);
            }
        }
        irqs.sort_unstable();
        files.extend(
            irqs.into_iter()
                .map(|irq| dir.join(irq.to_string()).join("smp_affinity")),
        );
        Ok(files)
    }

    pub fn setup(&self) -> Result<()> {
        let snapshot = &self.cfg.snapshot_path;
        let save = !snapshot.exists();
        if save {
            info!(
                "saving original interrupt routing to {}",
                snapshot.display()
            );
        } else {
            info!(
                "{} already exists, keeping the earlier snapshot",
                snapshot.display()
            );
        }

        let mask = cpu_mask(self.cfg.irq_cpu);
        let mut written = 0usize;
        for path in self.affinity_files()? {
            let original = read_trimmed(&path)?;
            if save {
                append_snapshot_line(snapshot, &path, &original)?;
            }
            write_verified(&path, &mask)?;
            written += 1;
        }
        info!("routed {} interrupt sources to cpu{}", written, self.cfg.irq_cpu);
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        let snapshot = &self.cfg.snapshot_path;
        if !snapshot.exists() {
            info!(
                "no interrupt routing snapshot at {}, nothing to restore",
                snapshot.display()
            );
            return Ok(());
        }
        let content = fs::read_to_string(snapshot)
            .with_context(|| format!("failed to read {}", snapshot.display()))?;

        let mut restored = 0usize;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (path, mask) = parse_snapshot_line(line)
                .ok_or_else(|| anyhow!("malformed snapshot line {}: '{}'", idx + 1, line))?;
            let path = Path::new(path);
            if !path.exists() {
                // the interrupt source vanished between set and reset
                warn!("{} is gone, skipping its restore", path.display());
                continue;
            }
            fs::write(path, format!("{mask}\n"))
                .with_context(|| format!("failed to restore {}", path.display()))?;
            restored += 1;
        }

        // Deleted only once every line is back in place: a failure above
        // leaves the snapshot intact so reset can be retried.
        fs::remove_file(snapshot)
            .with_context(|| format!("failed to remove {}", snapshot.display()))?;
        info!(
            "restored {} interrupt sources, removed {}",
            restored,
            snapshot.display()
        );
        Ok(())
    }
}

/// Hex cpumask with only `cpu` set, in /proc/irq notation: 32-bit hex
/// groups, most significant first, comma separated.
pub fn cpu_mask(cpu: u32) -> String {
    let group = (cpu / 32) as usize;
    let mut groups = vec![0u32; group + 1];
    groups[group] = 1u32 << (cpu % 32);
    let mut parts = Vec::with_capacity(groups.len());
    for (i, g) in groups.iter().enumerate().rev() {
        if i == groups.len() - 1 {
            parts.push(format!("{g:x}"));
        } else {
            parts.push(format!("{g:08x}"));
        }
    }
    parts.join(",")
}

/// The kernel re-renders written masks (zero padding, comma grouping), so
/// read-back comparison must be value-based, not textual.
pub fn masks_equal(a: &str, b: &str) -> bool {
    normalize_mask(a) == normalize_mask(b)
}

fn normalize_mask(s: &str) -> String {
    let hex: String = s
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect::<String>()
        .to_ascii_lowercase();
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One snapshot line: `<absolute-file-path>:<original-mask>`. Affinity
/// paths never contain ':', so the first colon is the separator.
pub fn parse_snapshot_line(line: &str) -> Option<(&str, &str)> {
    let (path, mask) = line.split_once(':')?;
    if path.is_empty() || mask.is_empty() {
        return None;
    }
    Some((path, mask))
}

fn append_snapshot_line(snapshot: &Path, path: &Path, original: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(snapshot)
        .with_context(|| format!("failed to open {}", snapshot.display()))?;
    writeln!(file, "{}:{}", path.display(), original)
        .with_context(|| format!("failed to append to {}", snapshot.display()))?;
    Ok(())
}

fn write_verified(path: &Path, mask: &str) -> Result<()> {
    fs::write(path, format!("{mask}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    let readback = read_trimmed(path)?;
    if !masks_equal(&readback, mask) {
        bail!(
            "{} reads back '{}' after writing '{}'",
            path.display(),
            readback,
            mask
        );
    }
    Ok(())
}
