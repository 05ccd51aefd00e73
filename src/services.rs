// Background service suspension. The stop command's exit status is
// advisory only (systemctl can fail on a canceled in-flight job while the
// daemon still dies); the process table is the authority on whether a
// service is actually gone.

use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::config::{Config, ServiceEntry};
use crate::util::{run_tool, tool_output};

const STOP_POLL_WINDOW: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ServiceController<'a> {
    cfg: &'a Config,
}

impl<'a> ServiceController<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn stop_all(&self) -> Result<()> {
        for entry in &self.cfg.services {
            self.stop_entry(entry)?;
        }
        Ok(())
    }

    fn stop_entry(&self, entry: &ServiceEntry) -> Result<()> {
        for unit in &entry.units {
            let out = run_tool(&self.cfg.tools.systemctl, &["stop", unit.as_str()])?;
            if !out.status.success() {
                warn!("stop {} reported failure: {}", unit, tool_output(&out));
            }
        }
        let deadline = Instant::now() + STOP_POLL_WINDOW;
        loop {
            let survivors = processes_matching(&self.cfg.proc_root, &entry.process)?;
            if survivors.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                bail!(
                    "{} still running (pids {:?}) after stopping {}",
                    entry.process,
                    survivors,
                    entry.units.join(", ")
                );
            }
            sleep(STOP_POLL_INTERVAL);
        }
        info!("stopped {} ({})", entry.process, entry.units.join(", "));
        Ok(())
    }

    pub fn start_all(&self) -> Result<()> {
        for entry in &self.cfg.services {
            for unit in &entry.units {
                let out = run_tool(&self.cfg.tools.systemctl, &["start", unit.as_str()])?;
                if !out.status.success() {
                    bail!("failed to start {}: {}", unit, tool_output(&out));
                }
            }
            info!("started {} ({})", entry.process, entry.units.join(", "));
        }
        Ok(())
    }
}

/// Pids whose command name starts with `name`. comm is truncated to 15
/// bytes by the kernel, so prefix matching is the reliable comparison.
pub fn processes_matching(proc_root: &Path, name: &str) -> Result<Vec<u32>> {
    let mut pids = Vec::new();
    for entry in std::fs::read_dir(proc_root)
        .with_context(|| format!("failed to list {}", proc_root.display()))?
    {
        let entry = entry?;
        let pid = match entry.file_name().to_string_lossy().parse::<u32>() {
            Ok(pid) => pid,
            Err(_) => continue,
        };
        let comm = match std::fs::read_to_string(entry.path().join("comm")) {
            Ok(comm) => comm,
            Err(_) => continue, // raced a process exit
        };
        if comm.trim().starts_with(name) {
            pids.push(pid);
        }
    }
    pids.sort_unstable();
    Ok(pids)
}
