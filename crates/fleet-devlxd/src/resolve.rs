//! `find_container_for_pid` (spec §4.3 "Instance resolution"): a two-phase
//! walk from the caller's PID to the container instance it belongs to.
//!
//! Both phases are defined against a [`ProcReader`] trait rather than raw
//! `/proc` reads, so the monitor-walk and namespace-walk fallback logic can
//! be unit tested against an in-memory fake instead of real process state.

use std::collections::BTreeMap;

use fleet_api_types::instance::InstanceType;
use thiserror::Error;

/// Every failure collapses to this single variant before it reaches the
/// guest (spec §4.3: "never surfaces the specific failure reason to the
/// guest... maps every failure to a generic 'not in container' error").
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not in container")]
pub struct NotInContainer;

const MONITOR_CMDLINE_PREFIX: &str = "[lxc monitor]";

/// Reads the process-tree facts both resolution phases need.
pub trait ProcReader: Send + Sync {
    /// The parent PID of `pid`, or `None` if unreadable.
    fn ppid(&self, pid: i32) -> Option<i32>;
    /// The process's command line, as a single space-joined string.
    fn cmdline(&self, pid: i32) -> Option<String>;
    /// The `NSpid` entries for `pid`: the PID as seen from each nested PID
    /// namespace the process lives in, outermost first.
    fn nspid(&self, pid: i32) -> Option<Vec<i32>>;
    /// The resolved target of `/proc/<pid>/ns/pid`, used for namespace
    /// equality comparisons.
    fn ns_pid_link(&self, pid: i32) -> Option<String>;
}

/// One running container instance on this member, as known to the
/// namespace-walk fallback.
pub struct RunningInstance {
    pub project: String,
    pub name: String,
    pub init_pid: i32,
}

/// Looks up instance metadata by name, for the monitor-walk phase, and
/// lists running containers, for the namespace-walk fallback.
pub trait InstanceDirectory: Send + Sync {
    fn instance_type(&self, project: &str, name: &str) -> Option<InstanceType>;
    fn running_instances(&self) -> Vec<RunningInstance>;
}

/// Resolves the caller's PID to the `(project, name)` of the container
/// instance it runs inside, or fails generically.
pub fn find_container_for_pid(
    proc: &dyn ProcReader,
    directory: &dyn InstanceDirectory,
    caller_pid: i32,
) -> Result<(String, String), NotInContainer> {
    if let Some(found) = monitor_walk(proc, directory, caller_pid) {
        return Ok(found);
    }
    namespace_walk(proc, directory, caller_pid)
}

/// Phase 1: walk upward from `caller_pid` looking for an `[lxc monitor]`
/// ancestor that lives in the root PID namespace.
fn monitor_walk(
    proc: &dyn ProcReader,
    directory: &dyn InstanceDirectory,
    caller_pid: i32,
) -> Option<(String, String)> {
    let mut pid = caller_pid;
    while pid > 1 {
        let cmdline = proc.cmdline(pid)?;
        let nspid = proc.nspid(pid)?;
        if cmdline.starts_with(MONITOR_CMDLINE_PREFIX) && nspid.len() == 1 && nspid[0] == pid {
            let (project, instance) = parse_monitor_cmdline(&cmdline)?;
            match directory.instance_type(&project, &instance) {
                Some(InstanceType::Container) => return Some((project, instance)),
                _ => return None,
            }
        }
        pid = proc.ppid(pid)?;
    }
    None
}

fn parse_monitor_cmdline(cmdline: &str) -> Option<(String, String)> {
    let token = cmdline.split_whitespace().last()?;
    match token.split_once('_') {
        Some((project, instance)) => Some((project.to_string(), instance.to_string())),
        None => Some(("default".to_string(), token.to_string())),
    }
}

/// Phase 2: match the caller's PID-namespace link against every running
/// container's init PID namespace link.
fn namespace_walk(
    proc: &dyn ProcReader,
    directory: &dyn InstanceDirectory,
    caller_pid: i32,
) -> Result<(String, String), NotInContainer> {
    let caller_ns = proc.ns_pid_link(caller_pid).ok_or(NotInContainer)?;
    let mut by_ns: BTreeMap<String, (String, String)> = BTreeMap::new();
    for instance in directory.running_instances() {
        if let Some(ns) = proc.ns_pid_link(instance.init_pid) {
            by_ns.insert(ns, (instance.project, instance.name));
        }
    }
    by_ns.get(&caller_ns).cloned().ok_or(NotInContainer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProc {
        ppid: HashMap<i32, i32>,
        cmdline: HashMap<i32, String>,
        nspid: HashMap<i32, Vec<i32>>,
        ns_link: HashMap<i32, String>,
    }

    impl ProcReader for FakeProc {
        fn ppid(&self, pid: i32) -> Option<i32> {
            self.ppid.get(&pid).copied()
        }
        fn cmdline(&self, pid: i32) -> Option<String> {
            self.cmdline.get(&pid).cloned()
        }
        fn nspid(&self, pid: i32) -> Option<Vec<i32>> {
            self.nspid.get(&pid).cloned()
        }
        fn ns_pid_link(&self, pid: i32) -> Option<String> {
            self.ns_link.get(&pid).cloned()
        }
    }

    struct FakeDirectory {
        types: HashMap<(String, String), InstanceType>,
        running: Vec<(String, String, i32)>,
    }

    impl InstanceDirectory for FakeDirectory {
        fn instance_type(&self, project: &str, name: &str) -> Option<InstanceType> {
            self.types.get(&(project.to_string(), name.to_string())).copied()
        }
        fn running_instances(&self) -> Vec<RunningInstance> {
            self.running
                .iter()
                .map(|(project, name, pid)| RunningInstance {
                    project: project.clone(),
                    name: name.clone(),
                    init_pid: *pid,
                })
                .collect()
        }
    }

    #[test]
    fn monitor_walk_resolves_named_project_and_instance() {
        let mut proc = FakeProc::default();
        // caller (pid 50) -> exec wrapper (pid 40) -> monitor (pid 30, root ns)
        proc.ppid.insert(50, 40);
        proc.ppid.insert(40, 30);
        proc.cmdline.insert(50, "bash".into());
        proc.cmdline.insert(40, "some-exec-helper".into());
        proc.cmdline.insert(30, "[lxc monitor] /var/lib/lxd proj_c1".into());
        proc.nspid.insert(50, vec![1]);
        proc.nspid.insert(40, vec![1]);
        proc.nspid.insert(30, vec![30]);

        let directory = FakeDirectory {
            types: HashMap::from([(("proj".into(), "c1".into()), InstanceType::Container)]),
            running: vec![],
        };

        let result = find_container_for_pid(&proc, &directory, 50).unwrap();
        assert_eq!(result, ("proj".to_string(), "c1".to_string()));
    }

    #[test]
    fn monitor_walk_defaults_project_to_default_without_underscore() {
        let mut proc = FakeProc::default();
        proc.ppid.insert(10, 5);
        proc.cmdline.insert(10, "app".into());
        proc.cmdline.insert(5, "[lxc monitor] /var/lib/lxd c1".into());
        proc.nspid.insert(10, vec![1]);
        proc.nspid.insert(5, vec![5]);

        let directory = FakeDirectory {
            types: HashMap::from([(("default".into(), "c1".into()), InstanceType::Container)]),
            running: vec![],
        };

        let result = find_container_for_pid(&proc, &directory, 10).unwrap();
        assert_eq!(result, ("default".to_string(), "c1".to_string()));
    }

    #[test]
    fn monitor_not_in_root_ns_is_ignored() {
        let mut proc = FakeProc::default();
        proc.ppid.insert(10, 1);
        proc.cmdline.insert(10, "[lxc monitor] /var/lib/lxd proj_c1".into());
        // nspid has two entries: not in the root PID namespace.
        proc.nspid.insert(10, vec![10, 1]);

        let directory = FakeDirectory { types: HashMap::new(), running: vec![] };
        let result = find_container_for_pid(&proc, &directory, 10);
        assert!(result.is_err());
    }

    #[test]
    fn namespace_walk_fallback_matches_by_ns_link() {
        let mut proc = FakeProc::default();
        proc.ppid.insert(99, 1);
        proc.cmdline.insert(99, "bash".into());
        proc.nspid.insert(99, vec![1]);
        proc.ns_link.insert(99, "pid:[123]".into());
        proc.ns_link.insert(200, "pid:[123]".into());

        let directory = FakeDirectory {
            types: HashMap::new(),
            running: vec![("proj".into(), "c2".into(), 200)],
        };

        let result = find_container_for_pid(&proc, &directory, 99).unwrap();
        assert_eq!(result, ("proj".to_string(), "c2".to_string()));
    }

    #[test]
    fn unresolved_pid_yields_generic_error() {
        let proc = FakeProc::default();
        let directory = FakeDirectory { types: HashMap::new(), running: vec![] };
        let result = find_container_for_pid(&proc, &directory, 12345);
        assert_eq!(result, Err(NotInContainer));
    }

    #[test]
    fn walk_is_bounded_at_pid_one() {
        let mut proc = FakeProc::default();
        proc.ppid.insert(2, 1);
        proc.cmdline.insert(2, "bash".into());
        proc.nspid.insert(2, vec![1]);
        let directory = FakeDirectory { types: HashMap::new(), running: vec![] };
        // pid 1's ppid is intentionally absent; the loop must stop without
        // panicking once pid reaches 1, not try to look it up.
        let result = find_container_for_pid(&proc, &directory, 2);
        assert!(result.is_err());
    }
}
