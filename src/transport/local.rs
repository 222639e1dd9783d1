//! Local subprocess execution with timeout.

use super::ExecOutput;
use crate::core::error::{Result, ViperError};
use crate::core::types::TIMEOUT_EXIT_CODE;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Spawn `argv` directly (no shell) and capture stdout/stderr.
///
/// Pipes are drained on reader threads while the child runs. The child leads
/// its own process group; on timeout the whole group is killed, the readers
/// are left behind, and the outcome carries [`TIMEOUT_EXIT_CODE`] with the
/// timeout message as stderr.
pub fn exec_local(argv: &[String], timeout: Option<Duration>) -> Result<ExecOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ViperError::Input("generated empty command".to_string()))?;

    debug!(program = %program, "spawning child process");
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);
    let mut child = command
        .spawn()
        .map_err(|source| ViperError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || drain(stdout));
    let stderr_handle = thread::spawn(move || drain(stderr));

    let (status, timed_out) = match timeout {
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => (status, false),
            None => {
                warn!(program = %program, timeout_secs = limit.as_secs(), "command timed out, killing");
                kill_group(&child);
                child.kill()?;
                (child.wait()?, true)
            }
        },
        None => (child.wait()?, false),
    };

    if timed_out {
        // Output is discarded; a descendant that left the group may still
        // hold the pipes open, so the readers are not joined.
        drop(stdout_handle);
        drop(stderr_handle);
        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
        return Ok(ExecOutput {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("command {:?} timed out after {} seconds", argv, secs),
            timed_out: true,
        });
    }

    let stdout = join(stdout_handle)?;
    let stderr = join(stderr_handle)?;

    debug!(exit_code = ?status.code(), "command finished");
    Ok(ExecOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        timed_out: false,
    })
}

/// SIGKILL every process in the child's group. Best effort: the direct child
/// is killed separately.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let group = format!("-{}", child.id());
    match Command::new("sh")
        .args(["-c", "kill -s KILL -- \"$1\"", "kill", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(pgid = child.id(), ?status, "process group kill reported failure"),
        Err(e) => warn!(pgid = child.id(), error = %e, "cannot kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn drain<R: Read>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn join(handle: thread::JoinHandle<std::io::Result<String>>) -> Result<String> {
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(ViperError::Worker("output reader thread panicked".to_string())),
    }
}
