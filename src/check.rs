// Read-only baseline assertions. Every check compares one live system
// property against the configured expectation and fails the whole `set`
// on the first mismatch. No retries: a deviating host needs an operator,
// not a workaround.

use anyhow::{bail, Context, Result};
use log::info;

use crate::config::Config;
use crate::util::{parse_cpu_list, read_trimmed};

pub struct PreChecker<'a> {
    cfg: &'a Config,
}

impl<'a> PreChecker<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn run_all(&self) -> Result<()> {
        self.check_kernel_release()?;
        self.check_threads_per_core()?;
        self.check_turbo_boost()?;
        self.check_numa_nodes()?;
        self.check_scaling_driver()?;
        self.check_process_table()?;
        Ok(())
    }

    fn check_kernel_release(&self) -> Result<()> {
        let path = self.cfg.proc_root.join("sys/kernel/osrelease");
        let release = read_trimmed(&path)?;
        if release != self.cfg.baseline.kernel_release {
            bail!(
                "kernel release is '{}', baseline expects '{}'",
                release,
                self.cfg.baseline.kernel_release
            );
        }
        info!("kernel release {} matches baseline", release);
        Ok(())
    }

    fn check_threads_per_core(&self) -> Result<()> {
        let path = self
            .cfg
            .sys_root
            .join("devices/system/cpu/cpu0/topology/thread_siblings_list");
        let siblings = parse_cpu_list(&read_trimmed(&path)?);
        if siblings.len() != self.cfg.baseline.threads_per_core {
            bail!(
                "cpu0 has {} sibling thread(s), baseline expects {} (is SMT disabled?)",
                siblings.len(),
                self.cfg.baseline.threads_per_core
            );
        }
        info!("{} thread(s) per core", siblings.len());
        Ok(())
    }

    // Two driver interfaces report turbo state: intel_pstate exposes
    // no_turbo, acpi-cpufreq exposes boost. A host with neither has no
    // turbo capability at all.
    fn check_turbo_boost(&self) -> Result<()> {
        let no_turbo = self.cfg.sys_root.join("devices/system/cpu/intel_pstate/no_turbo");
        let boost = self.cfg.sys_root.join("devices/system/cpu/cpufreq/boost");
        let enabled = if no_turbo.exists() {
            read_trimmed(&no_turbo)? == "0"
        } else if boost.exists() {
            read_trimmed(&boost)? == "1"
        } else {
            false
        };
        if enabled != self.cfg.baseline.turbo_boost {
            bail!(
                "turbo boost is {}, baseline expects {}",
                onoff(enabled),
                onoff(self.cfg.baseline.turbo_boost)
            );
        }
        info!("turbo boost {}", onoff(enabled));
        Ok(())
    }

    fn check_numa_nodes(&self) -> Result<()> {
        let dir = self.cfg.sys_root.join("devices/system/node");
        let mut nodes = 0usize;
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name
                .strip_prefix("node")
                .is_some_and(|s| s.parse::<u32>().is_ok())
            {
                nodes += 1;
            }
        }
        if nodes != self.cfg.baseline.numa_nodes {
            bail!(
                "{} NUMA node(s) present, baseline expects {}",
                nodes,
                self.cfg.baseline.numa_nodes
            );
        }
        info!("{} NUMA node(s)", nodes);
        Ok(())
    }

    fn check_scaling_driver(&self) -> Result<()> {
        let path = self
            .cfg
            .sys_root
            .join("devices/system/cpu/cpu0/cpufreq/scaling_driver");
        let driver = read_trimmed(&path)?;
        if driver != self.cfg.baseline.scaling_driver {
            bail!(
                "frequency scaling driver is '{}', baseline expects '{}'",
                driver,
                self.cfg.baseline.scaling_driver
            );
        }
        info!("frequency scaling driver {}", driver);
        Ok(())
    }

    // Every running process must carry a whitelisted command-name prefix.
    // A process that vanishes mid-scan is fine; one we can see and cannot
    // account for is not.
    fn check_process_table(&self) -> Result<()> {
        let offenders = self.unlisted_processes()?;
        if !offenders.is_empty() {
            let listing: Vec<String> = offenders
                .iter()
                .map(|(pid, comm)| format!("{} (pid {})", comm, pid))
                .collect();
            bail!(
                "{} process(es) running outside the whitelist: {}",
                offenders.len(),
                listing.join(", ")
            );
        }
        info!("all running processes are whitelisted");
        Ok(())
    }

    fn unlisted_processes(&self) -> Result<Vec<(u32, String)>> {
        let mut offenders = Vec::new();
        for entry in std::fs::read_dir(&self.cfg.proc_root)
            .with_context(|| format!("failed to list {}", self.cfg.proc_root.display()))?
        {
            let entry = entry?;
            let pid = match entry.file_name().to_string_lossy().parse::<u32>() {
                Ok(pid) => pid,
                Err(_) => continue,
            };
            let comm = match std::fs::read_to_string(entry.path().join("comm")) {
                Ok(comm) => comm.trim().to_string(),
                Err(_) => continue,
            };
            if !self
                .cfg
                .baseline
                .process_whitelist
                .iter()
                .any(|prefix| comm.starts_with(prefix.as_str()))
            {
                offenders.push((pid, comm));
            }
        }
        offenders.sort_unstable();
        Ok(offenders)
    }
}

fn onoff(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
