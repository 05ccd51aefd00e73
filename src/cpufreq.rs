// CPU frequency pinning. cpupower can exit 0 while applying a change to
// only some cpus (heterogeneous or thermally capped parts), so a
// successful command means nothing until every cpu's sysfs state reads
// back with the exact target. A mismatch is never retried: it signals an
// unreliable tool or unwilling hardware, both benchmarking-validity
// blockers.

use anyhow::{bail, Context, Result};
use log::info;

use crate::config::Config;
use crate::util::{cpu_ids, read_trimmed, run_tool, tool_output};

const FIXED_GOVERNOR: &str = "userspace";
const ADAPTIVE_GOVERNOR: &str = "ondemand";

pub struct CpufreqController<'a> {
    cfg: &'a Config,
}

impl<'a> CpufreqController<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn set_fixed(&self) -> Result<()> {
        let freq = format!("{}MHz", self.cfg.fixed_freq_mhz);
        let out = run_tool(
            &self.cfg.tools.cpupower,
            &["--cpu", "all", "frequency-set", "--freq", freq.as_str()],
        )?;
        if !out.status.success() {
            bail!("frequency-set {} failed: {}", freq, tool_output(&out));
        }
        let cpus = self.verify_frequency()?;
        self.verify_governor(FIXED_GOVERNOR)?;
        info!(
            "pinned {} cpus at {} MHz under the {} governor",
            cpus, self.cfg.fixed_freq_mhz, FIXED_GOVERNOR
        );
        Ok(())
    }

    pub fn reset_adaptive(&self) -> Result<()> {
        let out = run_tool(
            &self.cfg.tools.cpupower,
            &["--cpu", "all", "frequency-set", "--governor", ADAPTIVE_GOVERNOR],
        )?;
        if !out.status.success() {
            bail!(
                "governor-set {} failed: {}",
                ADAPTIVE_GOVERNOR,
                tool_output(&out)
            );
        }
        let cpus = self.verify_governor(ADAPTIVE_GOVERNOR)?;
        info!("restored the {} governor on {} cpus", ADAPTIVE_GOVERNOR, cpus);
        Ok(())
    }

    fn verify_frequency(&self) -> Result<usize> {
        let want_khz = u64::from(self.cfg.fixed_freq_mhz) * 1000;
        let cpus = cpu_ids(&self.cfg.sys_root)?;
        for &cpu in &cpus {
            let path = self
                .cfg
                .sys_root
                .join(format!("devices/system/cpu/cpu{cpu}/cpufreq/scaling_cur_freq"));
            let raw = read_trimmed(&path)?;
            let khz: u64 = raw
                .parse()
                .with_context(|| format!("cannot parse '{}' from {}", raw, path.display()))?;
            if khz != want_khz {
                bail!(
                    "cpu{} runs at {} kHz after frequency-set, expected {} kHz",
                    cpu,
                    khz,
                    want_khz
                );
            }
        }
        Ok(cpus.len())
    }

    fn verify_governor(&self, want: &str) -> Result<usize> {
        let cpus = cpu_ids(&self.cfg.sys_root)?;
        for &cpu in &cpus {
            let path = self
                .cfg
                .sys_root
                .join(format!("devices/system/cpu/cpu{cpu}/cpufreq/scaling_governor"));
            let governor = read_trimmed(&path)?;
            if governor != want {
                bail!(
                    "cpu{} uses the '{}' governor after governor-set, expected '{}'",
                    cpu,
                    governor,
                    want
                );
            }
        }
        Ok(cpus.len())
    }
}
