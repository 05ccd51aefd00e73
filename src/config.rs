// Immutable run configuration. Every controller borrows this at
// construction; nothing here changes after load.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Config file picked up from the working directory when --config is absent.
pub const DEFAULT_CONFIG_PATH: &str = "benchenv.json";

/// Expected machine baseline. `set` refuses to touch a host that deviates
/// from this; the operator fixes the host (or the baseline), never the tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Baseline {
    /// Exact contents of /proc/sys/kernel/osrelease.
    pub kernel_release: String,
    /// Sibling count of cpu0; 1 means hyperthreading is off.
    pub threads_per_core: usize,
    /// Expected turbo-boost state as reported by the cpufreq driver.
    pub turbo_boost: bool,
    /// NUMA node count.
    pub numa_nodes: usize,
    /// Exact contents of cpu0/cpufreq/scaling_driver.
    pub scaling_driver: String,
    /// Command-name prefixes a running process may carry during `set`.
    pub process_whitelist: Vec<String>,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            kernel_release: "6.8.0-benchmark".to_string(),
            threads_per_core: 1,
            turbo_boost: false,
            numa_nodes: 1,
            scaling_driver: "acpi-cpufreq".to_string(),
            process_whitelist: vec![
                "systemd".to_string(),
                "kthreadd".to_string(),
                "kworker".to_string(),
                "sshd".to_string(),
                "bash".to_string(),
                "benchenv".to_string(),
            ],
        }
    }
}

/// One suspendable background service: the process name its daemon runs
/// under, and the service units that own it. List order is the stop/start
/// order and is part of the contract (deterministic logs and sequencing).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub process: String,
    pub units: Vec<String>,
}

/// External tool names, overridable so tests can point at stubs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub systemctl: String,
    pub cpupower: String,
    pub cset: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
            cpupower: "cpupower".to_string(),
            cset: "cset".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub baseline: Baseline,
    pub services: Vec<ServiceEntry>,
    /// Frequency every cpu is pinned to while benchmarking.
    pub fixed_freq_mhz: u32,
    /// Kernel cpu-list of the cores reserved for the benchmark workload.
    pub shield_cpus: String,
    /// The one cpu left handling hardware interrupts.
    pub irq_cpu: u32,
    /// Interrupt names whose affinity is never written and never saved.
    /// Some sources (the timer, cascaded controllers) reject writes.
    pub irq_skip: Vec<String>,
    /// Where the original interrupt routing is persisted between set and reset.
    pub snapshot_path: PathBuf,
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub tools: Tools,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseline: Baseline::default(),
            services: vec![
                ServiceEntry {
                    process: "crond".to_string(),
                    units: vec!["crond.service".to_string()],
                },
                ServiceEntry {
                    process: "atd".to_string(),
                    units: vec!["atd.service".to_string()],
                },
            ],
            fixed_freq_mhz: 3400,
            shield_cpus: "2-3".to_string(),
            irq_cpu: 0,
            irq_skip: vec!["0".to_string(), "2".to_string()],
            snapshot_path: PathBuf::from("irq_affinity.snapshot"),
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            tools: Tools::default(),
        }
    }
}

impl Config {
    /// Resolve the active configuration: an explicit path must exist, the
    /// default file is used when present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::from_file(fallback);
        }
        info!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(cfg)
    }
}
