//! Sweep of transcoder processes leaked by earlier crashes.
//!
//! A supervised process is normally terminated by its owner. If the server
//! itself dies (power loss, SIGKILL, a panic in a runtime thread), children
//! may outlive it. The reaper scans the OS process table and kills every
//! streaming transcoder older than a threshold.

use std::time::Duration;

use sysinfo::System;

use crate::args::STDOUT_TARGET;

/// What the reaper considers an orphan.
#[derive(Debug, Clone)]
pub struct ReaperPolicy {
    /// Executable name of the transcoder (e.g. "ffmpeg").
    pub process_name: String,
    /// Processes younger than this are left alone.
    pub max_age: Duration,
}

/// Minimal view of one process-table entry.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    /// OS process id.
    pub pid: u32,
    /// Executable name.
    pub name: String,
    /// Full command line.
    pub cmd: Vec<String>,
    /// Time since the process started.
    pub run_time: Duration,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    /// Number of processes that matched the transcoder signature.
    pub candidates: usize,
    /// Processes that were killed.
    pub killed: Vec<u32>,
    /// Orphans that could not be killed (permissions, already gone).
    pub failed: Vec<u32>,
}

fn strip_exe(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

impl ReaperPolicy {
    /// Whether `process` looks like one of our streaming transcoders.
    pub fn is_transcoder(&self, process: &ProcessSnapshot) -> bool {
        strip_exe(&process.name).eq_ignore_ascii_case(strip_exe(&self.process_name))
            && process.cmd.iter().any(|arg| arg == STDOUT_TARGET)
    }

    /// Pick the pids to kill from a process-table snapshot.
    pub fn select_orphans(&self, processes: &[ProcessSnapshot], own_pid: u32) -> Vec<u32> {
        processes
            .iter()
            .filter(|p| p.pid != own_pid)
            .filter(|p| self.is_transcoder(p))
            .filter(|p| p.run_time > self.max_age)
            .map(|p| p.pid)
            .collect()
    }
}

/// Kills leaked transcoder processes.
#[derive(Debug, Clone)]
pub struct OrphanReaper {
    policy: ReaperPolicy,
}

impl OrphanReaper {
    /// Create a reaper with the given policy.
    pub fn new(policy: ReaperPolicy) -> Self {
        Self { policy }
    }

    /// Scan the process table once and kill every orphan found.
    ///
    /// Blocking: reads `/proc` (or the platform equivalent). Call it from
    /// `spawn_blocking` inside async code.
    pub fn sweep(&self) -> ReapReport {
        let mut system = System::new();
        system.refresh_processes();

        let snapshots: Vec<ProcessSnapshot> = system
            .processes()
            .values()
            .map(|p| ProcessSnapshot {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cmd: p.cmd().to_vec(),
                run_time: Duration::from_secs(p.run_time()),
            })
            .collect();

        let candidates = snapshots
            .iter()
            .filter(|p| self.policy.is_transcoder(p))
            .count();
        let orphans = self.policy.select_orphans(&snapshots, std::process::id());

        let mut report = ReapReport {
            candidates,
            ..Default::default()
        };

        for pid in orphans {
            let killed = system
                .process(sysinfo::Pid::from_u32(pid))
                .map(|p| p.kill())
                .unwrap_or(false);
            if killed {
                tracing::warn!(pid, "Killed orphaned transcoder process");
                report.killed.push(pid);
            } else {
                tracing::warn!(pid, "Failed to kill orphaned transcoder process");
                report.failed.push(pid);
            }
        }

        tracing::debug!(
            candidates = report.candidates,
            killed = report.killed.len(),
            "Orphan sweep complete"
        );
        report
    }
}
