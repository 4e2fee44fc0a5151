//! The real `/proc`-backed [`ProcReader`](crate::resolve::ProcReader),
//! used by the daemon; tests exercise the resolution logic against an
//! in-memory fake instead.

use std::fs;

use crate::resolve::ProcReader;

pub struct RealProcReader;

impl ProcReader for RealProcReader {
    fn ppid(&self, pid: i32) -> Option<i32> {
        status_field(pid, "PPid")?.trim().parse().ok()
    }

    fn cmdline(&self, pid: i32) -> Option<String> {
        let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let parts: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        Some(parts.join(" "))
    }

    fn nspid(&self, pid: i32) -> Option<Vec<i32>> {
        let field = status_field(pid, "NSpid")?;
        field.split_whitespace().map(|s| s.parse().ok()).collect()
    }

    fn ns_pid_link(&self, pid: i32) -> Option<String> {
        fs::read_link(format!("/proc/{pid}/ns/pid"))
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }
}

fn status_field(pid: i32, field: &str) -> Option<String> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix(field) {
            if let Some(value) = rest.strip_prefix(':') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
