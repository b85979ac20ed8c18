//! Process discovery: which provider processes exist and which of them are ours.
use std::{ffi::OsStr, io, path::Path, process::Command};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::{config::ProcessListerKind, environ, environ::OwnershipTag};

/// A process found in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessRecord {
    pub pid: u32,
    pub uid: u32,
}

/// Lists processes by executable name.
pub trait ProcessLister: Send + Sync {
    /// Returns every process running `exe_name`, in enumeration order.
    ///
    /// Never fails: an unavailable listing facility yields an empty list.
    fn list(&self, exe_name: &str) -> Vec<ProcessRecord>;
}

/// Parses `ps -o pid,uid --no-headers` output.
///
/// Lines that do not hold two integers are skipped with a warning; blank lines are
/// ignored silently.
pub fn parse_ps_output(output: &str) -> Vec<ProcessRecord> {
    let mut records = Vec::new();
    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let parsed = match (fields.next(), fields.next()) {
            (Some(pid), Some(uid)) => pid.parse::<u32>().ok().zip(uid.parse::<u32>().ok()),
            _ => None,
        };

        match parsed {
            Some((pid, uid)) => records.push(ProcessRecord { pid, uid }),
            None => warn!("strange line in ps output: {line}"),
        }
    }
    records
}

/// Lists processes through procps' `ps -C`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsLister;

impl ProcessLister for PsLister {
    fn list(&self, exe_name: &str) -> Vec<ProcessRecord> {
        // `ps` exits non-zero when nothing matches; only the output matters.
        match Command::new("ps")
            .args(["-o", "pid,uid", "--no-headers", "-C", exe_name])
            .output()
        {
            Ok(output) => parse_ps_output(&String::from_utf8_lossy(&output.stdout)),
            Err(err) => {
                warn!("unable to list processes named {exe_name}: {err}");
                Vec::new()
            }
        }
    }
}

/// Whether a process runs `exe_name`.
///
/// The kernel truncates `name` to 15 bytes, so the executable path and `argv[0]` are
/// checked as well.
fn runs_executable(
    name: &OsStr,
    exe: Option<&Path>,
    argv0: Option<&OsStr>,
    exe_name: &str,
) -> bool {
    let wanted = OsStr::new(exe_name);
    name == wanted
        || exe.and_then(Path::file_name) == Some(wanted)
        || argv0.and_then(|arg| Path::new(arg).file_name()) == Some(wanted)
}

/// Lists processes through `sysinfo`, for systems without procps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoLister;

impl ProcessLister for SysinfoLister {
    fn list(&self, exe_name: &str) -> Vec<ProcessRecord> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let mut records: Vec<ProcessRecord> = system
            .processes()
            .values()
            .filter(|process| {
                runs_executable(
                    process.name(),
                    process.exe(),
                    process.cmd().first().map(|arg| arg.as_os_str()),
                    exe_name,
                )
            })
            .filter_map(|process| {
                let Some(uid) = process.user_id() else {
                    debug!("no owner known for pid {}", process.pid());
                    return None;
                };
                Some(ProcessRecord {
                    pid: process.pid().as_u32(),
                    uid: **uid,
                })
            })
            .collect();
        // The process map is unordered; keep results deterministic.
        records.sort_by_key(|record| record.pid);
        records
    }
}

/// Builds the lister selected in the configuration.
pub fn lister_for(kind: ProcessListerKind) -> Box<dyn ProcessLister> {
    match kind {
        ProcessListerKind::Ps => Box::new(PsLister),
        ProcessListerKind::Sysinfo => Box::new(SysinfoLister),
    }
}

/// Operating system view used by the supervisor.
pub trait ProcessTable: Send {
    /// Lists processes running `exe_name`.
    fn scan(&self, exe_name: &str) -> Vec<ProcessRecord>;
    /// Reads the ownership tag from the environment of `pid`, if readable.
    fn resolve_tag(&self, pid: u32) -> Option<String>;
    /// The uid this supervisor runs as.
    fn current_uid(&self) -> u32;
    /// Kills `pid` with SIGKILL.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// The live process table of this machine.
pub struct SystemProcesses {
    lister: Box<dyn ProcessLister>,
}

impl SystemProcesses {
    pub fn new(kind: ProcessListerKind) -> Self {
        Self {
            lister: lister_for(kind),
        }
    }
}

impl ProcessTable for SystemProcesses {
    fn scan(&self, exe_name: &str) -> Vec<ProcessRecord> {
        self.lister.list(exe_name)
    }

    fn resolve_tag(&self, pid: u32) -> Option<String> {
        environ::resolve_tag(pid)
    }

    fn current_uid(&self) -> u32 {
        nix::unistd::getuid().as_raw()
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        match signal::kill(Pid::from_raw(pid), Some(Signal::SIGKILL)) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from_raw_os_error(err as i32)),
        }
    }
}

/// Keeps the records owned by our uid, preserving order.
///
/// With `require_env_match`, a record is also dropped unless its environment carries
/// exactly `tag`.
pub fn filter_owned(
    table: &dyn ProcessTable,
    tag: &OwnershipTag,
    records: &[ProcessRecord],
    require_env_match: bool,
) -> Vec<ProcessRecord> {
    let uid = table.current_uid();
    records
        .iter()
        .filter(|record| record.uid == uid)
        .filter(|record| {
            !require_env_match
                || table.resolve_tag(record.pid).as_deref() == Some(tag.as_str())
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROVIDER_EXE_NAME;
    use std::collections::HashMap;

    struct FakeTable {
        uid: u32,
        tags: HashMap<u32, String>,
    }

    impl ProcessTable for FakeTable {
        fn scan(&self, _exe_name: &str) -> Vec<ProcessRecord> {
            Vec::new()
        }

        fn resolve_tag(&self, pid: u32) -> Option<String> {
            self.tags.get(&pid).cloned()
        }

        fn current_uid(&self) -> u32 {
            self.uid
        }

        fn kill(&self, _pid: u32) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(pid: u32, uid: u32) -> ProcessRecord {
        ProcessRecord { pid, uid }
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let output = "  101  1000\ngarbage\n\n 202 x\n303 0\n404\n  505   1000  \n";
        let records = parse_ps_output(output);
        assert_eq!(
            records,
            vec![record(101, 1000), record(303, 0), record(505, 1000)]
        );
    }

    #[test]
    fn parse_of_empty_output_is_empty() {
        assert!(parse_ps_output("").is_empty());
        assert!(parse_ps_output("\n   \n").is_empty());
    }

    #[test]
    fn filter_without_env_match_keeps_own_uid() {
        let table = FakeTable {
            uid: 1000,
            tags: HashMap::new(),
        };
        let tag = OwnershipTag::new("box", std::path::Path::new("/cfg"));
        let records = [record(1, 1000), record(2, 0), record(3, 1000), record(4, 1001)];

        let owned = filter_owned(&table, &tag, &records, false);
        assert_eq!(owned, vec![record(1, 1000), record(3, 1000)]);
    }

    #[test]
    fn filter_with_env_match_requires_tag() {
        let tag = OwnershipTag::new("box", std::path::Path::new("/cfg"));
        let table = FakeTable {
            uid: 1000,
            tags: HashMap::from([
                (1, "box:/other".to_string()),
                (3, tag.as_str().to_string()),
                (5, tag.as_str().to_string()),
                (6, tag.as_str().to_string()),
            ]),
        };
        let records = [
            record(5, 1000),
            record(1, 1000),
            record(2, 1000),
            record(6, 0),
            record(3, 1000),
        ];

        let owned = filter_owned(&table, &tag, &records, true);
        assert_eq!(owned, vec![record(5, 1000), record(3, 1000)]);
    }

    #[test]
    fn ps_lister_does_not_fail_for_unknown_names() {
        assert!(PsLister.list("chartsup-no-such-exe").is_empty());
    }

    #[test]
    fn sysinfo_lister_does_not_fail_for_unknown_names() {
        assert!(SysinfoLister.list("chartsup-no-such-exe").is_empty());
    }

    #[test]
    fn long_executable_names_match_despite_truncated_comm() {
        let exe = Path::new("/opt/provider/bin/AvnavOchartsProvider");
        assert!(runs_executable(
            OsStr::new("AvnavOchartsPro"),
            Some(exe),
            None,
            "AvnavOchartsProvider"
        ));
        assert!(runs_executable(
            OsStr::new("AvnavOchartsPro"),
            None,
            Some(OsStr::new("./AvnavOchartsProvider")),
            "AvnavOchartsProvider"
        ));
        assert!(runs_executable(OsStr::new("oeserverd"), None, None, "oeserverd"));
        assert!(!runs_executable(
            OsStr::new("AvnavOchartsPro"),
            Some(Path::new("/bin/sh")),
            Some(OsStr::new("/bin/sh")),
            "AvnavOchartsProvider"
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sysinfo_lister_finds_provider_with_long_name() {
        use std::{os::unix::fs::PermissionsExt, process::Child, thread, time::Duration};

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(PROVIDER_EXE_NAME);
        std::fs::copy("/bin/sleep", &exe).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        // A freshly written binary can briefly be busy while other tests fork.
        let mut child: Option<Child> = None;
        for _ in 0..50 {
            match Command::new(&exe).arg("30").spawn() {
                Ok(spawned) => {
                    child = Some(spawned);
                    break;
                }
                Err(err) if err.raw_os_error() == Some(nix::libc::ETXTBSY) => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(err) => panic!("failed to spawn {}: {err}", exe.display()),
            }
        }
        let mut child = child.expect("executable stayed busy");
        let pid = child.id();

        let mut found = false;
        for _ in 0..50 {
            if SysinfoLister
                .list(PROVIDER_EXE_NAME)
                .iter()
                .any(|record| record.pid == pid)
            {
                found = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        let _ = child.kill();
        let _ = child.wait();
        assert!(found, "pid {pid} not listed under {PROVIDER_EXE_NAME}");
    }
}
