//! Child process execution with captured output and a hard deadline.
//!
//! [`run_captured`] spawns a command in its own process group, feeds stdin
//! from a writer thread, drains stdout and stderr on reader threads so a full
//! pipe never stalls the child, and polls for exit. Once the child exits, times
//! out, or is cancelled, the whole process group is killed, so shell wrappers
//! cannot leave orphaned grandchildren behind. Output collection is bounded by
//! a short grace period in case a descendant escaped the group while holding
//! the pipes open.

use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::audit::CancelFlag;
use crate::dispatch::{ExecutionFailure, KILLED_EXIT_CODE};

const PROCESS_TARGET: &str = "tackle_plugins::process";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output readers may keep draining after the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessOutput {
    pub(crate) exit_code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

/// Runs `command` to completion, killing it after `timeout` or once `cancel`
/// is raised.
pub(crate) fn run_captured(
    mut command: Command,
    stdin_data: Vec<u8>,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<ProcessOutput, ExecutionFailure> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = command.spawn().map_err(|error| ExecutionFailure::Spawn {
        program: program.clone(),
        source: Arc::new(error),
    })?;
    debug!(target: PROCESS_TARGET, program = %program, pid = child.id(), "process spawned");

    if let Some(mut stdin) = child.stdin.take() {
        thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe early.
            if let Err(error) = stdin.write_all(&stdin_data)
                && error.kind() != io::ErrorKind::BrokenPipe
            {
                warn!(target: PROCESS_TARGET, %error, "failed to write process stdin");
            }
        });
    }
    let stdout_reader = child.stdout.take().map(Drain::spawn);
    let stderr_reader = child.stderr.take().map(Drain::spawn);

    let waited = wait_with_deadline(&mut child, timeout, cancel);
    if matches!(waited, Wait::Exited(_)) {
        kill_group(&child);
    }
    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let stdout = Drain::collect(stdout_reader, drain_deadline);
    let stderr = Drain::collect(stderr_reader, drain_deadline);

    match waited {
        Wait::Exited(status) => {
            let exit_code = status.code().unwrap_or(KILLED_EXIT_CODE);
            debug!(target: PROCESS_TARGET, program = %program, exit_code, "process exited");
            Ok(ProcessOutput {
                exit_code,
                stdout,
                stderr,
            })
        }
        Wait::TimedOut => Err(ExecutionFailure::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            stdout,
            stderr,
        }),
        Wait::Cancelled => Err(ExecutionFailure::Cancelled),
        Wait::Failed(error) => Err(ExecutionFailure::io(program, error)),
    }
}

enum Wait {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    Failed(io::Error),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration, cancel: &CancelFlag) -> Wait {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Wait::Exited(status),
            Ok(None) if cancel.is_cancelled() => {
                debug!(target: PROCESS_TARGET, pid = child.id(), "process cancelled, killing");
                terminate(child);
                return Wait::Cancelled;
            }
            Ok(None) if start.elapsed() > timeout => {
                warn!(
                    target: PROCESS_TARGET,
                    pid = child.id(),
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "process timed out, killing"
                );
                terminate(child);
                return Wait::TimedOut;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => {
                terminate(child);
                return Wait::Failed(error);
            }
        }
    }
}

/// Kills the child's process group and reaps the child.
fn terminate(child: &mut Child) {
    if !kill_group(child) {
        drop(child.kill());
    }
    drop(child.wait());
}

/// Sends `SIGKILL` to the child's process group.
///
/// The group outlives its leader while any member is alive, so this also
/// reaches descendants after the child itself has been reaped.
fn kill_group(child: &Child) -> bool {
    let Ok(pid) = i32::try_from(child.id()) else {
        return false;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(errno) => {
            debug!(target: PROCESS_TARGET, pid, %errno, "process group kill failed");
            false
        }
    }
}

/// An output stream read to EOF on a background thread.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    finished: Receiver<()>,
}

impl Drain {
    fn spawn(mut stream: impl Read + Send + 'static) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (done, finished) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(chunk.iter().take(read)),
                }
            }
            drop(done.send(()));
        });
        Self { buffer, finished }
    }

    /// Returns what was read once the stream closes or `deadline` passes.
    fn collect(drain: Option<Self>, deadline: Instant) -> String {
        let Some(stream) = drain else {
            return String::new();
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if stream.finished.recv_timeout(remaining).is_err() {
            warn!(
                target: PROCESS_TARGET,
                "output stream still open after the process ended, truncating"
            );
        }
        let bytes = stream.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
