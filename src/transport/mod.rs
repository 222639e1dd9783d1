//! Process transport: spawn a resolved argv and capture its outcome.
//!
//! Remote access is the command factory's concern (it can emit `ssh ...`);
//! the transport only ever runs local subprocesses.

pub mod local;

use crate::core::error::Result;
use std::time::Duration;

/// Output from executing a command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execute an argv, killing it once `timeout` elapses.
pub fn exec_command(argv: &[String], timeout: Option<Duration>) -> Result<ExecOutput> {
    local::exec_local(argv, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_transport_exec_output_success() {
        let ok = ExecOutput { exit_code: 0, stdout: "ok".into(), stderr: "".into(), timed_out: false };
        assert!(ok.success());
        let fail = ExecOutput { exit_code: 1, stdout: "".into(), stderr: "err".into(), timed_out: false };
        assert!(!fail.success());
        let sig = ExecOutput { exit_code: -1, stdout: "".into(), stderr: "killed".into(), timed_out: false };
        assert!(!sig.success());
    }

    #[test]
    fn test_transport_exec_delegates() {
        let out = exec_command(&argv(&["echo", "query-test"]), None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "query-test");
    }
}
