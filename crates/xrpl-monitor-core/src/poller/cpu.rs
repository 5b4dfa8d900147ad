// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! CPU usage of the rippled process.
//!
//! Three measurement paths, in preference order: the container stats CLI
//! when a container name is configured, native process inspection otherwise,
//! and a raw `/host/proc/<pid>/stat` delta when the collector runs in a
//! container with the host procfs remounted.

use std::path::Path;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::process::Command;
use tracing::{debug, info, warn};
use xrpl_monitor_types::metric::unix_seconds_now;

const PROCESS_NAME: &str = "rippled";
const HOST_PROC: &str = "/host/proc";
const CLI_TIMEOUT: Duration = Duration::from_secs(5);
/// Standard kernel clock tick rate; `SC_CLK_TCK` on every supported target.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

pub struct CpuMonitor {
    docker_container: Option<String>,
    pid: Option<u32>,
    system: System,
    last_process_ticks: Option<u64>,
    last_measurement_time: Option<f64>,
}

impl CpuMonitor {
    pub fn new(docker_container: Option<String>) -> Self {
        info!(
            container = docker_container.as_deref().unwrap_or("native"),
            "cpu monitor initialized"
        );
        Self {
            docker_container,
            pid: None,
            system: System::new(),
            last_process_ticks: None,
            last_measurement_time: None,
        }
    }

    /// Instantaneous CPU percentage, or `None` when the process cannot be
    /// found. The first sample on the proc-file path reports 0.
    pub async fn cpu_percent(&mut self) -> Option<f64> {
        if self.docker_container.is_some() {
            return self.cpu_percent_docker().await;
        }
        self.cpu_percent_native().await
    }

    async fn cpu_percent_docker(&self) -> Option<f64> {
        let container = self.docker_container.as_deref()?;
        let output = run_cli(
            Command::new("docker")
                .args(["stats", container, "--no-stream", "--format", "{{.CPUPerc}}"]),
        )
        .await?;
        output.trim().trim_end_matches('%').parse::<f64>().ok()
    }

    async fn cpu_percent_native(&mut self) -> Option<f64> {
        if self.pid.is_none() {
            self.pid = self.find_pid().await;
        }
        let pid = self.pid?;

        let sys_pid = Pid::from_u32(pid);
        if self.system.refresh_process(sys_pid) {
            if let Some(process) = self.system.process(sys_pid) {
                return Some(process.cpu_usage() as f64);
            }
        }

        // Process invisible to normal inspection: the collector is likely
        // containerized with the host procfs mounted at /host/proc.
        match self.cpu_percent_from_proc_stat(pid) {
            Some(value) => Some(value),
            None => {
                self.pid = None;
                None
            }
        }
    }

    fn cpu_percent_from_proc_stat(&mut self, pid: u32) -> Option<f64> {
        let stat = std::fs::read_to_string(format!("{HOST_PROC}/{pid}/stat")).ok()?;
        let ticks = parse_stat_cpu_ticks(&stat)?;
        let now = unix_seconds_now();
        let percent = delta_percent(
            self.last_process_ticks,
            self.last_measurement_time,
            ticks,
            now,
        );
        self.last_process_ticks = Some(ticks);
        self.last_measurement_time = Some(now);
        Some(percent)
    }

    /// Cores available to rippled: the container quota when one is set,
    /// otherwise the host count.
    pub async fn cpu_cores(&mut self) -> u64 {
        if let Some(container) = self.docker_container.as_deref() {
            if let Some(output) = run_cli(Command::new("docker").args([
                "inspect",
                "-f",
                "{{.HostConfig.NanoCpus}}",
                container,
            ]))
            .await
            {
                if let Ok(nano_cpus) = output.trim().parse::<u64>() {
                    if nano_cpus > 0 {
                        return nano_cpus / 1_000_000_000;
                    }
                }
            }
        }
        self.system.refresh_cpu();
        let cores = self.system.cpus().len() as u64;
        if cores > 0 {
            cores
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() as u64)
                .unwrap_or(1)
        }
    }

    /// Process discovery precedence: container inspect, native process scan,
    /// `pidof`, `pgrep -x`, then a `/host/proc` comm scan.
    async fn find_pid(&mut self) -> Option<u32> {
        if let Some(container) = self.docker_container.as_deref() {
            let output = run_cli(Command::new("docker").args([
                "inspect",
                "-f",
                "{{.State.Pid}}",
                container,
            ]))
            .await?;
            let pid = output.trim().parse::<u32>().ok()?;
            if pid > 0 {
                info!(pid, container, "found rippled pid via container inspect");
                return Some(pid);
            }
            warn!(container, "container reported invalid pid");
            return None;
        }

        self.system.refresh_processes();
        for (pid, process) in self.system.processes() {
            let name_matches = process.name().to_ascii_lowercase().contains(PROCESS_NAME);
            let cmd_matches = process.cmd().iter().any(|arg| arg.contains(PROCESS_NAME));
            if name_matches || cmd_matches {
                info!(pid = pid.as_u32(), "found rippled pid via process scan");
                return Some(pid.as_u32());
            }
        }

        if let Some(output) = run_cli(Command::new("pidof").arg(PROCESS_NAME)).await {
            if let Some(pid) = output.split_whitespace().next().and_then(|p| p.parse().ok()) {
                info!(pid, "found rippled pid via pidof");
                return Some(pid);
            }
        }

        if let Some(output) = run_cli(Command::new("pgrep").args(["-x", PROCESS_NAME])).await {
            if let Some(pid) = output.lines().next().and_then(|p| p.trim().parse().ok()) {
                info!(pid, "found rippled pid via pgrep");
                return Some(pid);
            }
        }

        if let Some(pid) = scan_host_proc(Path::new(HOST_PROC)) {
            info!(pid, "found rippled pid via /host/proc scan");
            return Some(pid);
        }

        warn!("rippled process not found (tried process scan, pidof, pgrep, /host/proc)");
        None
    }
}

/// `Δ(utime+stime+cutime+cstime) / clock_ticks / Δwall · 100`; the first
/// sample has no predecessor and reports 0.
fn delta_percent(
    last_ticks: Option<u64>,
    last_time: Option<f64>,
    ticks: u64,
    now: f64,
) -> f64 {
    match (last_ticks, last_time) {
        (Some(last_ticks), Some(last_time)) if now > last_time => {
            let cpu_seconds = ticks.saturating_sub(last_ticks) as f64 / CLOCK_TICKS_PER_SEC;
            cpu_seconds / (now - last_time) * 100.0
        }
        _ => 0.0,
    }
}

/// Sum of utime, stime, cutime, cstime from a procfs `stat` line, in clock
/// ticks. The command field may contain spaces, so fields are counted from
/// the closing paren.
fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Fields here start at index 0 = state (field 3 of the full line);
    // utime..cstime are full-line fields 14..17.
    let mut total = 0u64;
    for field in fields.get(11..15)? {
        total = total.checked_add(field.parse::<u64>().ok()?)?;
    }
    Some(total)
}

fn scan_host_proc(root: &Path) -> Option<u32> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            if comm.trim() == PROCESS_NAME {
                return Some(pid);
            }
        }
    }
    None
}

async fn run_cli(command: &mut Command) -> Option<String> {
    match tokio::time::timeout(CLI_TIMEOUT, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            debug!(status = ?output.status, "cli command failed");
            None
        }
        Ok(Err(err)) => {
            debug!("cli command error: {err}");
            None
        }
        Err(_) => {
            warn!("cli command timed out");
            None
        }
    }
}
