// CPU shielding through cset. Two states: unshielded and shielded.
// setup() always tears down first so it starts from a known base, and
// every transition is double-checked: the command must succeed AND the
// queried cpuset state must match. cset's exit code alone is not trusted.

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use regex::Regex;

use crate::config::Config;
use crate::util::{run_tool, tool_output};

// cset prints this when no shield exists; removal of a non-existent
// shield is a success for us, not an error.
const INACTIVE_MARKER: &str = "shielding not active";

pub struct ShieldController<'a> {
    cfg: &'a Config,
}

impl<'a> ShieldController<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    /// Drive the host to the unshielded state, wherever it starts from.
    pub fn teardown(&self) -> Result<()> {
        let out = run_tool(&self.cfg.tools.cset, &["shield", "--reset"])?;
        if !out.status.success() {
            // nothing to remove, or a stale half-built shield; the status
            // query below decides whether that matters
            warn!("shield removal: {}", tool_output(&out));
        }
        let status = run_tool(&self.cfg.tools.cset, &["shield"])?;
        let text = tool_output(&status);
        if !text.contains(INACTIVE_MARKER) {
            bail!("shield still active after teardown:\n{}", text);
        }
        info!("shield not active");
        Ok(())
    }

    /// Drive the host to the shielded state: user cpuset over the
    /// configured cores, kernel housekeeping migrated to the system set.
    pub fn setup(&self) -> Result<()> {
        self.teardown()?;

        let cpu_arg = format!("--cpu={}", self.cfg.shield_cpus);
        let out = run_tool(&self.cfg.tools.cset, &["shield", cpu_arg.as_str(), "--kthread=on"])?;
        if !out.status.success() {
            bail!(
                "failed to shield cpus {}:\n{}",
                self.cfg.shield_cpus,
                tool_output(&out)
            );
        }

        let user_tasks = self.task_count(&["shield", "--shield", "--verbose"])?;
        if user_tasks != 0 {
            bail!(
                "user cpuset holds {} task(s) right after shield creation, expected none",
                user_tasks
            );
        }
        let system_tasks = self.task_count(&["shield", "--unshield", "--verbose"])?;
        if system_tasks == 0 {
            bail!("system cpuset is empty after kthread migration");
        }
        info!(
            "shield active on cpus {} (user: 0 tasks, system: {} tasks)",
            self.cfg.shield_cpus, system_tasks
        );
        Ok(())
    }

    fn task_count(&self, args: &[&str]) -> Result<usize> {
        let out = run_tool(&self.cfg.tools.cset, args)?;
        let text = tool_output(&out);
        if !out.status.success() {
            bail!("cset {} failed:\n{}", args.join(" "), text);
        }
        parse_task_count(&text)
            .ok_or_else(|| anyhow!("no task count in cset {} output:\n{}", args.join(" "), text))
    }
}

/// Extract N from cset's `... with N tasks running` status line.
fn parse_task_count(output: &str) -> Option<usize> {
    let re = Regex::new(r"with (\d+) tasks running").ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}
