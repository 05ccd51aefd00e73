// End-to-end set/reset scenarios against a synthetic host: fake /proc and
// /sys trees plus stub systemctl/cpupower/cset executables that record
// their invocations and mutate the fake trees the way the real tools
// mutate the real ones. Exercises the built binary via CARGO_BIN_EXE.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use benchenv::config::{Baseline, Config, ServiceEntry, Tools};

const KERNEL: &str = "6.8.0-benchmark";

struct Host {
    _tmp: tempfile::TempDir,
    cfg: Config,
    cfg_path: PathBuf,
    calls: PathBuf,
}

impl Host {
    fn calls(&self) -> String {
        fs::read_to_string(&self.calls).unwrap_or_default()
    }

    fn read(&self, root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel))
            .unwrap()
            .trim()
            .to_string()
    }

    fn proc_read(&self, rel: &str) -> String {
        self.read(&self.cfg.proc_root, rel)
    }

    fn sys_read(&self, rel: &str) -> String {
        self.read(&self.cfg.sys_root, rel)
    }
}

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A host that matches the default test baseline: 4 cpus, no SMT, turbo
/// off, one NUMA node, adaptive governor, crond running, 3 reroutable
/// interrupts plus the skip-listed timer interrupt.
fn build_host() -> Host {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let proc_root = root.join("proc");
    let sys_root = root.join("sys");
    let bin = root.join("bin");
    let calls = root.join("calls.log");
    fs::create_dir_all(&bin).unwrap();

    // /proc: kernel release, process table, interrupt masks
    fs::create_dir_all(proc_root.join("sys/kernel")).unwrap();
    fs::write(proc_root.join("sys/kernel/osrelease"), format!("{KERNEL}\n")).unwrap();
    for (pid, comm) in [(1, "systemd"), (9, "kthreadd"), (120, "crond")] {
        let dir = proc_root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
    }
    for irq in ["0", "4", "9"] {
        fs::create_dir_all(proc_root.join("irq").join(irq)).unwrap();
    }
    fs::write(proc_root.join("irq/default_smp_affinity"), "f\n").unwrap();
    fs::write(proc_root.join("irq/0/smp_affinity"), "f\n").unwrap();
    fs::write(proc_root.join("irq/4/smp_affinity"), "f\n").unwrap();
    fs::write(proc_root.join("irq/9/smp_affinity"), "3\n").unwrap();

    // /sys: topology, cpufreq, turbo, NUMA
    for cpu in 0..4 {
        let dir = sys_root.join(format!("devices/system/cpu/cpu{cpu}/cpufreq"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("scaling_cur_freq"), "1200000\n").unwrap();
        fs::write(dir.join("scaling_governor"), "ondemand\n").unwrap();
    }
    let cpu0 = sys_root.join("devices/system/cpu/cpu0");
    fs::create_dir_all(cpu0.join("topology")).unwrap();
    fs::write(cpu0.join("topology/thread_siblings_list"), "0\n").unwrap();
    fs::write(cpu0.join("cpufreq/scaling_driver"), "acpi-cpufreq\n").unwrap();
    fs::create_dir_all(sys_root.join("devices/system/cpu/intel_pstate")).unwrap();
    fs::write(sys_root.join("devices/system/cpu/intel_pstate/no_turbo"), "1\n").unwrap();
    fs::create_dir_all(sys_root.join("devices/system/node/node0")).unwrap();

    // stub collaborators
    let systemctl_body = format!(
        "#!/bin/sh\n\
         echo \"systemctl $@\" >> {calls}\n\
         if [ \"$1\" = stop ] && [ \"$2\" = crond.service ]; then rm -rf {proc}/120; fi\n\
         exit 0\n",
        calls = calls.display(),
        proc = proc_root.display()
    );
    let systemctl = write_stub(&bin, "systemctl", &systemctl_body);

    let cpupower = write_stub(
        &bin,
        "cpupower",
        &format!(
            "#!/bin/sh\n\
             echo \"cpupower $@\" >> {calls}\n\
             case \"$*\" in\n\
             *--freq*)\n\
             \tfor d in {sys}/devices/system/cpu/cpu[0-9]*/cpufreq; do\n\
             \t\techo 3400000 > \"$d/scaling_cur_freq\"\n\
             \t\techo userspace > \"$d/scaling_governor\"\n\
             \tdone ;;\n\
             *--governor*)\n\
             \tfor d in {sys}/devices/system/cpu/cpu[0-9]*/cpufreq; do\n\
             \t\techo 1200000 > \"$d/scaling_cur_freq\"\n\
             \t\techo ondemand > \"$d/scaling_governor\"\n\
             \tdone ;;\n\
             esac\n\
             exit 0\n",
            calls = calls.display(),
            sys = sys_root.display()
        ),
    );

    let state = root.join("shield.state");
    let cset = write_stub(
        &bin,
        "cset",
        &format!(
            "#!/bin/sh\n\
             echo \"cset $@\" >> {calls}\n\
             case \"$*\" in\n\
             \"shield --reset\")\n\
             \trm -f {state}\n\
             \techo 'cset: --> deactivating/reseting shielding' ;;\n\
             \"shield --cpu=\"*)\n\
             \ttouch {state}\n\
             \techo 'cset: --> activating shielding on system' ;;\n\
             \"shield --shield --verbose\")\n\
             \techo 'cset: \"user\" cpuset of CPUSPEC(2-3) with 0 tasks running' ;;\n\
             \"shield --unshield --verbose\")\n\
             \techo 'cset: \"system\" cpuset of CPUSPEC(0-1) with 57 tasks running' ;;\n\
             \"shield\")\n\
             \tif [ -e {state} ]; then\n\
             \t\techo 'cset: --> shielding system active with'\n\
             \telse\n\
             \t\techo 'cset: --> shielding not active on system'\n\
             \t\texit 2\n\
             \tfi ;;\n\
             esac\n\
             exit 0\n",
            calls = calls.display(),
            state = state.display()
        ),
    );

    let cfg = Config {
        baseline: Baseline {
            kernel_release: KERNEL.to_string(),
            threads_per_core: 1,
            turbo_boost: false,
            numa_nodes: 1,
            scaling_driver: "acpi-cpufreq".to_string(),
            process_whitelist: vec![
                "systemd".to_string(),
                "kthreadd".to_string(),
                "crond".to_string(),
            ],
        },
        services: vec![ServiceEntry {
            process: "crond".to_string(),
            units: vec!["crond.service".to_string()],
        }],
        fixed_freq_mhz: 3400,
        shield_cpus: "2-3".to_string(),
        irq_cpu: 1,
        irq_skip: vec!["0".to_string()],
        snapshot_path: root.join("irq_affinity.snapshot"),
        proc_root,
        sys_root,
        tools: Tools {
            systemctl: systemctl.display().to_string(),
            cpupower: cpupower.display().to_string(),
            cset: cset.display().to_string(),
        },
    };

    let cfg_path = root.join("benchenv.json");
    fs::write(&cfg_path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

    Host {
        _tmp: tmp,
        cfg,
        cfg_path,
        calls,
    }
}

fn benchenv(host: &Host, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_benchenv"))
        .arg(args[0])
        .args(&args[1..])
        .arg("--config")
        .arg(&host.cfg_path)
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

// SCENARIO A: full `set` on a matching host

#[test]
fn set_prepares_the_whole_environment() {
    let host = build_host();
    let out = benchenv(&host, &["set"]);
    assert!(out.status.success(), "{}", stdout(&out));

    // services: crond stopped via its unit, daemon gone
    let calls = host.calls();
    assert!(calls.contains("systemctl stop crond.service"), "{calls}");
    assert!(!host.cfg.proc_root.join("120").exists());

    // frequency: every cpu pinned under the userspace governor
    for cpu in 0..4 {
        assert_eq!(
            host.sys_read(&format!("devices/system/cpu/cpu{cpu}/cpufreq/scaling_cur_freq")),
            "3400000"
        );
        assert_eq!(
            host.sys_read(&format!("devices/system/cpu/cpu{cpu}/cpufreq/scaling_governor")),
            "userspace"
        );
    }

    // shield created over the configured cores
    assert!(calls.contains("cset shield --cpu=2-3 --kthread=on"), "{calls}");

    // interrupts rerouted to cpu1, originals snapshotted, timer untouched
    assert_eq!(host.proc_read("irq/default_smp_affinity"), "2");
    assert_eq!(host.proc_read("irq/4/smp_affinity"), "2");
    assert_eq!(host.proc_read("irq/9/smp_affinity"), "2");
    assert_eq!(host.proc_read("irq/0/smp_affinity"), "f");
    let snapshot = fs::read_to_string(&host.cfg.snapshot_path).unwrap();
    assert!(snapshot.contains("default_smp_affinity:f"), "{snapshot}");
    assert!(snapshot.contains("/irq/4/smp_affinity:f"), "{snapshot}");
    assert!(snapshot.contains("/irq/9/smp_affinity:3"), "{snapshot}");
    assert!(!snapshot.contains("/irq/0/"), "{snapshot}");

    // subsystems applied in the fixed order
    let stop_at = calls.find("systemctl stop").unwrap();
    let freq_at = calls.find("cpupower").unwrap();
    let shield_at = calls.find("cset shield --cpu").unwrap();
    assert!(stop_at < freq_at && freq_at < shield_at, "{calls}");
}

// SCENARIO B: `reset` undoes everything scenario A did

#[test]
fn reset_restores_the_pre_set_state() {
    let host = build_host();
    assert!(benchenv(&host, &["set"]).status.success());

    let out = benchenv(&host, &["reset"]);
    assert!(out.status.success(), "{}", stdout(&out));

    // interrupt routing restored byte-for-byte, snapshot consumed
    assert_eq!(host.proc_read("irq/default_smp_affinity"), "f");
    assert_eq!(host.proc_read("irq/4/smp_affinity"), "f");
    assert_eq!(host.proc_read("irq/9/smp_affinity"), "3");
    assert!(!host.cfg.snapshot_path.exists());

    // shield removed, adaptive governor back, services restarted
    let calls = host.calls();
    assert!(calls.contains("cset shield --reset"), "{calls}");
    for cpu in 0..4 {
        assert_eq!(
            host.sys_read(&format!("devices/system/cpu/cpu{cpu}/cpufreq/scaling_governor")),
            "ondemand"
        );
    }
    assert!(calls.contains("systemctl start crond.service"), "{calls}");
}

#[test]
fn reset_twice_is_idempotent() {
    let host = build_host();
    assert!(benchenv(&host, &["set"]).status.success());
    assert!(benchenv(&host, &["reset"]).status.success());

    let out = benchenv(&host, &["reset"]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert!(stdout(&out).contains("nothing to restore"), "{}", stdout(&out));
}

// SCENARIO C: opted-out subsystems are skipped, the rest still run

#[test]
fn disable_services_skips_only_the_service_controller() {
    let host = build_host();
    let out = benchenv(&host, &["set", "--disable-services"]);
    assert!(out.status.success(), "{}", stdout(&out));

    let calls = host.calls();
    assert!(!calls.contains("systemctl"), "{calls}");
    assert!(host.cfg.proc_root.join("120").exists());

    // everything else still applied
    assert!(calls.contains("cpupower"), "{calls}");
    assert!(calls.contains("cset shield --cpu=2-3"), "{calls}");
    assert!(host.cfg.snapshot_path.exists());
}

#[test]
fn disable_interrupt_affinity_leaves_routing_alone() {
    let host = build_host();
    let out = benchenv(&host, &["set", "--disable-interrupt-affinity"]);
    assert!(out.status.success(), "{}", stdout(&out));

    assert_eq!(host.proc_read("irq/4/smp_affinity"), "f");
    assert!(!host.cfg.snapshot_path.exists());
}

// SCENARIO D: a failed precondition halts before any mutation

#[test]
fn baseline_mismatch_halts_before_any_side_effect() {
    let mut host = build_host();
    host.cfg.baseline.kernel_release = "6.1.0-other".to_string();
    fs::write(
        &host.cfg_path,
        serde_json::to_string_pretty(&host.cfg).unwrap(),
    )
    .unwrap();

    let out = benchenv(&host, &["set"]);
    assert_eq!(out.status.code(), Some(42));
    let text = stdout(&out);
    assert!(text.contains(KERNEL), "{text}");
    assert!(text.contains("6.1.0-other"), "{text}");

    // no tool ran, no file was written, no process was stopped
    assert!(!host.calls.exists(), "{}", host.calls());
    assert!(!host.cfg.snapshot_path.exists());
    assert!(host.cfg.proc_root.join("120").exists());
    assert_eq!(
        host.sys_read("devices/system/cpu/cpu0/cpufreq/scaling_governor"),
        "ondemand"
    );
    assert_eq!(host.proc_read("irq/4/smp_affinity"), "f");
}

// tolerated vs authoritative failure in service stop

#[test]
fn failing_stop_command_is_tolerated_when_the_process_dies() {
    let host = build_host();
    // systemctl reports failure (canceled in-flight job) but the daemon
    // dies anyway; the post-condition scan is what decides
    let body = format!(
        "#!/bin/sh\n\
         echo \"systemctl $@\" >> {calls}\n\
         if [ \"$1\" = stop ]; then rm -rf {proc}/120; echo 'Job canceled' >&2; exit 1; fi\n\
         exit 0\n",
        calls = host.calls.display(),
        proc = host.cfg.proc_root.display()
    );
    fs::write(Path::new(&host.cfg.tools.systemctl), body).unwrap();

    let out = benchenv(&host, &["set"]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert!(!host.cfg.proc_root.join("120").exists());
}

#[test]
fn surviving_process_after_stop_is_fatal() {
    // stop exits 0 but the daemon stays: exit status is advisory, the
    // process table is authoritative
    let host = build_host();
    let body = format!(
        "#!/bin/sh\necho \"systemctl $@\" >> {calls}\nexit 0\n",
        calls = host.calls.display()
    );
    fs::write(Path::new(&host.cfg.tools.systemctl), body).unwrap();

    let out = benchenv(&host, &["set"]);
    assert_eq!(out.status.code(), Some(42));
    let text = stdout(&out);
    assert!(text.contains("crond"), "{text}");
    assert!(text.contains("still running"), "{text}");

    // halt happened before the later subsystems
    let calls = host.calls();
    assert!(!calls.contains("cpupower"), "{calls}");
    assert!(!host.cfg.snapshot_path.exists());
}

// usage surface

#[test]
fn missing_mode_prints_usage_and_exits_42() {
    let out = Command::new(env!("CARGO_BIN_EXE_benchenv")).output().unwrap();
    assert_eq!(out.status.code(), Some(42));
    assert!(stdout(&out).contains("Usage"), "{}", stdout(&out));
}

#[test]
fn unknown_flag_prints_usage_and_exits_42() {
    let out = Command::new(env!("CARGO_BIN_EXE_benchenv"))
        .args(["set", "--frobnicate"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(42));
}

#[test]
fn help_is_not_a_failure() {
    let out = Command::new(env!("CARGO_BIN_EXE_benchenv"))
        .arg("--help")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("benchmarking"), "{}", stdout(&out));
}
