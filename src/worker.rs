//! Spawning the provider and draining its output.
use std::{
    borrow::Cow,
    collections::HashMap,
    env,
    ffi::OsString,
    io::{self, BufRead, BufReader},
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use tracing::{debug, info, warn};

use crate::{constants::OWNERSHIP_ENV_KEY, environ::OwnershipTag, error::LaunchError};

/// Notification sent once a launched provider has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: u32,
    /// Exit status, if the child could be reaped.
    pub status: Option<ExitStatus>,
}

/// A provider process launched by this supervisor.
///
/// Dropping the handle does not kill the process.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pid: u32,
    pub command_line: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub environment: HashMap<String, String>,
    exited: Option<Receiver<WorkerExit>>,
}

impl WorkerHandle {
    /// Builds a handle whose exit is reported on `exited`.
    pub fn new(
        pid: u32,
        command_line: Vec<String>,
        environment: HashMap<String, String>,
        exited: Receiver<WorkerExit>,
    ) -> Self {
        Self {
            pid,
            command_line,
            environment,
            exited: Some(exited),
        }
    }

    /// Returns the exit notification if the process has ended, without blocking.
    pub fn try_exit(&mut self) -> Option<WorkerExit> {
        let receiver = self.exited.as_ref()?;
        match receiver.try_recv() {
            Ok(exit) => {
                self.exited = None;
                Some(exit)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.exited = None;
                Some(WorkerExit {
                    pid: self.pid,
                    status: None,
                })
            }
        }
    }
}

/// Appends `dir` to an inherited `PATH` value.
pub fn extended_path(inherited: Option<OsString>, dir: &Path) -> OsString {
    match inherited {
        Some(path) if !path.is_empty() => {
            let mut parts: Vec<_> = env::split_paths(&path).collect();
            parts.push(dir.to_path_buf());
            env::join_paths(parts).unwrap_or_else(|_| {
                let mut joined = path.clone();
                joined.push(":");
                joined.push(dir.as_os_str());
                joined
            })
        }
        _ => dir.as_os_str().to_os_string(),
    }
}

/// One raw output line as text, without its line ending. Invalid UTF-8 is replaced.
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(text) => Cow::Borrowed(text.trim_end_matches(['\n', '\r'])),
        Cow::Owned(text) => Cow::Owned(text.trim_end_matches(['\n', '\r']).to_string()),
    }
}

/// Logs every output line of the provider until the stream closes, then reaps the child
/// and reports its exit.
fn drain_output(
    reader: impl io::Read,
    mut child: Child,
    pid: u32,
    exited: mpsc::Sender<WorkerExit>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => info!(target: "provider", "PROVIDEROUT: {}", decode_line(&line)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                debug!("provider output stream of pid {pid} failed: {err}");
                break;
            }
        }
    }

    let status = match child.wait() {
        Ok(status) => {
            info!("provider process {pid} exited with {status}");
            Some(status)
        }
        Err(err) => {
            warn!("unable to reap provider process {pid}: {err}");
            None
        }
    };
    let _ = exited.send(WorkerExit { pid, status });
}

/// Spawns the provider with the ownership tag in its environment and `exe_dir` appended
/// to `PATH`.
///
/// Stdout and stderr share one pipe, drained line by line on a dedicated thread for the
/// lifetime of the child so it never blocks on a full pipe.
pub fn launch(
    command_line: Vec<String>,
    tag: &OwnershipTag,
    exe_dir: &Path,
) -> Result<WorkerHandle, LaunchError> {
    let (program, args) = command_line.split_first().ok_or(LaunchError::EmptyCommand)?;

    let path = extended_path(env::var_os("PATH"), exe_dir);
    let environment = HashMap::from([
        (OWNERSHIP_ENV_KEY.to_string(), tag.as_str().to_string()),
        ("PATH".to_string(), path.to_string_lossy().into_owned()),
    ]);

    let (reader, writer) = io::pipe().map_err(LaunchError::OutputPipe)?;
    let writer_err = writer.try_clone().map_err(LaunchError::OutputPipe)?;

    info!("starting provider with command {}", command_line.join(" "));
    let child = {
        let mut command = Command::new(program);
        command
            .args(args)
            .env(OWNERSHIP_ENV_KEY, tag.as_str())
            .env("PATH", &path)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err)
            // Own process group: a terminal Ctrl-C aimed at us must not reach the provider.
            .process_group(0);
        // `command` owns the write ends; dropping it at the end of this block leaves the
        // child as the only writer so the reader sees EOF when it exits.
        command.spawn().map_err(|source| LaunchError::Spawn {
            command: command_line.join(" "),
            source,
        })?
    };

    let pid = child.id();
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("provider-output-{pid}"))
        .spawn(move || drain_output(reader, child, pid, tx))
        .map_err(LaunchError::OutputPipe)?;

    Ok(WorkerHandle::new(pid, command_line, environment, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_exit(handle: &mut WorkerHandle) -> WorkerExit {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(exit) = handle.try_exit() {
                return exit;
            }
            if Instant::now() >= deadline {
                panic!("provider {} did not exit", handle.pid);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn path_is_appended_not_replaced() {
        let path = extended_path(Some("/usr/bin:/bin".into()), Path::new("/opt/provider/bin"));
        assert_eq!(path, OsString::from("/usr/bin:/bin:/opt/provider/bin"));
    }

    #[test]
    fn missing_path_becomes_exe_dir() {
        assert_eq!(
            extended_path(None, Path::new("/opt/bin")),
            OsString::from("/opt/bin")
        );
        assert_eq!(
            extended_path(Some(OsString::new()), Path::new("/opt/bin")),
            OsString::from("/opt/bin")
        );
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let tag = OwnershipTag::new("h", Path::new("/c"));
        assert!(matches!(
            launch(Vec::new(), &tag, Path::new("/tmp")),
            Err(LaunchError::EmptyCommand)
        ));
    }

    #[test]
    fn spawn_failure_is_a_launch_error() {
        let tag = OwnershipTag::new("h", Path::new("/c"));
        let result = launch(
            vec!["/nonexistent/chartsup-provider".into()],
            &tag,
            Path::new("/tmp"),
        );
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }

    #[test]
    fn launched_process_carries_tag_and_reports_exit() {
        let tag = OwnershipTag::new("testhost", Path::new("/cfg"));
        let mut handle = launch(
            vec![
                "/bin/sh".into(),
                "-c".into(),
                "echo out; echo err 1>&2; test \"$AVNAV_PROVIDER\" = testhost:/cfg".into(),
            ],
            &tag,
            Path::new("/opt/provider/bin"),
        )
        .unwrap();

        assert_eq!(
            handle.environment.get(OWNERSHIP_ENV_KEY).map(String::as_str),
            Some("testhost:/cfg")
        );
        assert!(handle.environment["PATH"].ends_with("/opt/provider/bin"));

        let exit = wait_for_exit(&mut handle);
        assert_eq!(exit.pid, handle.pid);
        assert!(exit.status.expect("reaped").success());
        assert!(handle.try_exit().is_none(), "exit is reported once");
    }

    #[test]
    fn provider_runs_in_its_own_process_group() {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::{Pid, getpgid},
        };

        let tag = OwnershipTag::new("h", Path::new("/c"));
        let mut handle = launch(
            vec!["/bin/sh".into(), "-c".into(), "sleep 5".into()],
            &tag,
            Path::new("/tmp"),
        )
        .unwrap();

        let child = Pid::from_raw(handle.pid as i32);
        let child_group = getpgid(Some(child)).unwrap();
        let own_group = getpgid(None).unwrap();
        assert_eq!(child_group, child, "provider leads its own group");
        assert_ne!(child_group, own_group);

        kill(child, Signal::SIGKILL).unwrap();
        wait_for_exit(&mut handle);
    }

    #[test]
    fn output_lines_are_decoded_lossily() {
        assert_eq!(decode_line(b"tile ready\n"), "tile ready");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(
            decode_line(b"bad \xff\xfe bytes\n"),
            "bad \u{FFFD}\u{FFFD} bytes"
        );
    }

    #[test]
    fn undecodable_output_does_not_end_draining() {
        let tag = OwnershipTag::new("h", Path::new("/c"));
        let mut handle = launch(
            vec![
                "/bin/sh".into(),
                "-c".into(),
                "printf 'bad \\377\\376 bytes\\nfine\\n'; i=0; while [ $i -lt 5000 ]; do echo line $i; i=$((i+1)); done".into(),
            ],
            &tag,
            Path::new("/tmp"),
        )
        .unwrap();

        let exit = wait_for_exit(&mut handle);
        assert!(exit.status.expect("reaped").success());
    }

    #[test]
    fn chatty_process_does_not_stall() {
        let tag = OwnershipTag::new("h", Path::new("/c"));
        let mut handle = launch(
            vec![
                "/bin/sh".into(),
                "-c".into(),
                "i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done".into(),
            ],
            &tag,
            Path::new("/tmp"),
        )
        .unwrap();

        let exit = wait_for_exit(&mut handle);
        assert!(exit.status.expect("reaped").success());
    }
}
