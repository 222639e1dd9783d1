//! Core records: hosts, tasks, runners and task results.
//!
//! All records are immutable values. Each one has a JSON record form; tasks
//! carry their callables as symbolic paths that are resolved through the
//! [`Registry`] on decode.

use super::error::{Result, ViperError};
use super::items::Item;
use super::registry::{CommandFactory, OutputProcessor, PostHook, PreHook, Registry, Symbol};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Free-form metadata attached to hosts and tasks.
pub type Meta = BTreeMap<String, Value>;

fn hash_meta<H: Hasher>(meta: &Meta, state: &mut H) {
    for (k, v) in meta {
        k.hash(state);
        v.to_string().hash(state);
    }
}

// ============================================================================
// Hosts
// ============================================================================

/// An addressable target machine. Equality and hashing use `ip` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    /// Network address (IP or DNS)
    pub ip: String,

    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub domain: Option<String>,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    #[serde(default)]
    pub login_name: Option<String>,

    /// Path to a credential (private key)
    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default)]
    pub meta: Meta,
}

fn default_port() -> u16 {
    22
}

impl Host {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            hostname: None,
            domain: None,
            port: default_port(),
            login_name: None,
            identity_file: None,
            meta: Meta::new(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_login(mut self, login_name: impl Into<String>) -> Self {
        self.login_name = Some(login_name.into());
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// `hostname.domain`, failing when either part is unset.
    pub fn fqdn(&self) -> Result<String> {
        match (&self.hostname, &self.domain) {
            (Some(h), Some(d)) => Ok(format!("{}.{}", h, d)),
            (None, None) => Err(ViperError::Input(format!(
                "{}: hostname and domain not set",
                self.ip
            ))),
            (None, Some(_)) => Err(ViperError::Input(format!("{}: hostname not set", self.ip))),
            (Some(_), None) => Err(ViperError::Input(format!("{}: domain not set", self.ip))),
        }
    }

    /// Bind a task to this host.
    pub fn task(&self, task: &Task, args: &[String]) -> Runner {
        Runner::new(self.clone(), task.clone(), args.to_vec())
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
    }
}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ip.cmp(&other.ip)
    }
}

impl Item for Host {
    const KIND: &'static str = "Host";

    fn from_record(record: Value, _registry: &Registry) -> Result<Self> {
        serde_json::from_value(record).map_err(|e| ViperError::decode(Self::KIND, e))
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// A named, reusable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// Label (not unique)
    pub name: String,

    /// Generates the argv for `(host, args)`
    pub command_factory: Symbol<dyn CommandFactory>,

    /// Seconds before the process is killed
    pub timeout: Option<u64>,

    /// Extra attempts allowed after a failed one
    pub retry: u32,

    pub stdout_processor: Option<Symbol<dyn OutputProcessor>>,

    pub stderr_processor: Option<Symbol<dyn OutputProcessor>>,

    pub pre_run: Option<Symbol<dyn PreHook>>,

    pub post_run: Option<Symbol<dyn PostHook>>,

    pub meta: Meta,
}

/// Task record with callables still in symbolic form.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskRecord {
    name: String,
    command_factory: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    retry: u32,
    #[serde(default)]
    stdout_processor: Option<String>,
    #[serde(default)]
    stderr_processor: Option<String>,
    #[serde(default)]
    pre_run: Option<String>,
    #[serde(default)]
    post_run: Option<String>,
    #[serde(default)]
    meta: Meta,
}

impl TaskRecord {
    fn resolve(self, registry: &Registry) -> Result<Task> {
        let processor = |p: Option<String>| p.map(|p| registry.processor(&p)).transpose();
        Ok(Task {
            name: self.name,
            command_factory: registry.command(&self.command_factory)?,
            timeout: self.timeout,
            retry: self.retry,
            stdout_processor: processor(self.stdout_processor)?,
            stderr_processor: processor(self.stderr_processor)?,
            pre_run: self.pre_run.map(|p| registry.pre_hook(&p)).transpose()?,
            post_run: self.post_run.map(|p| registry.post_hook(&p)).transpose()?,
            meta: self.meta,
        })
    }
}

impl Task {
    pub fn new(name: impl Into<String>, command_factory: Symbol<dyn CommandFactory>) -> Self {
        Self {
            name: name.into(),
            command_factory,
            timeout: None,
            retry: 0,
            stdout_processor: None,
            stderr_processor: None,
            pre_run: None,
            post_run: None,
            meta: Meta::new(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stdout_processor(mut self, p: Symbol<dyn OutputProcessor>) -> Self {
        self.stdout_processor = Some(p);
        self
    }

    pub fn with_stderr_processor(mut self, p: Symbol<dyn OutputProcessor>) -> Self {
        self.stderr_processor = Some(p);
        self
    }

    pub fn with_pre_run(mut self, hook: Symbol<dyn PreHook>) -> Self {
        self.pre_run = Some(hook);
        self
    }

    pub fn with_post_run(mut self, hook: Symbol<dyn PostHook>) -> Self {
        self.post_run = Some(hook);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    fn decode(record: Value, registry: &Registry) -> Result<Self> {
        let raw: TaskRecord =
            serde_json::from_value(record).map_err(|e| ViperError::decode(Self::KIND, e))?;
        raw.resolve(registry)
    }
}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.command_factory.hash(state);
        self.timeout.hash(state);
        self.retry.hash(state);
        self.stdout_processor.hash(state);
        self.stderr_processor.hash(state);
        self.pre_run.hash(state);
        self.post_run.hash(state);
        hash_meta(&self.meta, state);
    }
}

impl Item for Task {
    const KIND: &'static str = "Task";

    fn from_record(record: Value, registry: &Registry) -> Result<Self> {
        Self::decode(record, registry)
    }
}

// ============================================================================
// Runners
// ============================================================================

/// One (host, task, args) binding: the unit that actually executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Runner {
    pub host: Host,
    pub task: Task,
    pub args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RunnerRecord {
    host: Value,
    task: Value,
    #[serde(default)]
    args: Vec<String>,
}

impl Runner {
    pub fn new(host: Host, task: Task, args: Vec<String>) -> Self {
        Self { host, task, args }
    }
}

impl PartialOrd for Runner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Runner {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.host, &self.task.name, &self.args).cmp(&(&other.host, &other.task.name, &other.args))
    }
}

impl Item for Runner {
    const KIND: &'static str = "Runner";

    fn from_record(record: Value, registry: &Registry) -> Result<Self> {
        let raw: RunnerRecord =
            serde_json::from_value(record).map_err(|e| ViperError::decode(Self::KIND, e))?;
        Ok(Self {
            host: Host::from_record(raw.host, registry)?,
            task: Task::from_record(raw.task, registry)?,
            args: raw.args,
        })
    }
}

// ============================================================================
// Results
// ============================================================================

/// Exit status recorded when the process was killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 123;

/// The immutable record of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Correlation id shared by every attempt of one `run()` call
    pub trigger_time: f64,
    pub task: Task,
    pub host: Host,
    pub args: Vec<String>,
    /// Resolved argv
    pub command: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub start: f64,
    pub end: f64,
    /// Zero-based attempt number
    pub retry: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskResultRecord {
    trigger_time: f64,
    task: Value,
    host: Value,
    #[serde(default)]
    args: Vec<String>,
    command: Vec<String>,
    stdout: String,
    stderr: String,
    returncode: i32,
    start: f64,
    end: f64,
    retry: u32,
}

impl TaskResult {
    pub fn ok(&self) -> bool {
        self.returncode == 0
    }

    pub fn errored(&self) -> bool {
        self.returncode != 0
    }

    /// Attempts still available after this one.
    pub fn retry_left(&self) -> u32 {
        self.task.retry.saturating_sub(self.retry)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// A fresh runner for the same binding, discarding the outcome.
    pub fn runner(&self) -> Runner {
        Runner::new(self.host.clone(), self.task.clone(), self.args.clone())
    }
}

impl PartialEq for TaskResult {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_time.to_bits() == other.trigger_time.to_bits()
            && self.task == other.task
            && self.host == other.host
            && self.args == other.args
            && self.command == other.command
            && self.stdout == other.stdout
            && self.stderr == other.stderr
            && self.returncode == other.returncode
            && self.start.to_bits() == other.start.to_bits()
            && self.end.to_bits() == other.end.to_bits()
            && self.retry == other.retry
    }
}

impl Eq for TaskResult {}

impl Hash for TaskResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trigger_time.to_bits().hash(state);
        self.task.hash(state);
        self.host.hash(state);
        self.args.hash(state);
        self.command.hash(state);
        self.stdout.hash(state);
        self.stderr.hash(state);
        self.returncode.hash(state);
        self.start.to_bits().hash(state);
        self.end.to_bits().hash(state);
        self.retry.hash(state);
    }
}

impl Item for TaskResult {
    const KIND: &'static str = "TaskResult";

    fn from_record(record: Value, registry: &Registry) -> Result<Self> {
        let raw: TaskResultRecord =
            serde_json::from_value(record).map_err(|e| ViperError::decode(Self::KIND, e))?;
        let task = Task::from_record(raw.task, registry)?;
        if raw.end < raw.start {
            return Err(ViperError::decode(
                Self::KIND,
                format!("end {} is before start {}", raw.end, raw.start),
            ));
        }
        if raw.retry > task.retry {
            return Err(ViperError::decode(
                Self::KIND,
                format!("retry {} exceeds task budget {}", raw.retry, task.retry),
            ));
        }
        Ok(Self {
            trigger_time: raw.trigger_time,
            task,
            host: Host::from_record(raw.host, registry)?,
            args: raw.args,
            command: raw.command,
            stdout: raw.stdout,
            stderr: raw.stderr,
            returncode: raw.returncode,
            start: raw.start,
            end: raw.end,
            retry: raw.retry,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn echo_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_command("test.echo_ip", |h: &Host, args: &[String]| {
            let mut argv = vec!["echo".to_string(), h.ip.clone()];
            argv.extend(args.iter().cloned());
            Ok(argv)
        });
        reg.register_processor("test.strip", |s: &str| s.trim().to_string());
        reg
    }

    pub(crate) fn echo_task(reg: &Registry) -> Task {
        Task::new("print IP address", reg.command("test.echo_ip").unwrap())
    }

    pub(crate) fn sample_result(reg: &Registry, trigger: f64, ip: &str, retry: u32) -> TaskResult {
        TaskResult {
            trigger_time: trigger,
            task: echo_task(reg).with_retry(3),
            host: Host::new(ip),
            args: vec!["bar".to_string()],
            command: vec!["foo".to_string()],
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            returncode: 0,
            start: trigger + 0.1 + retry as f64,
            end: trigger + 0.2 + retry as f64,
            retry,
        }
    }

    #[test]
    fn test_host_defaults_and_record() {
        let h = Host::new("1.1.1.1");
        assert_eq!(h.port, 22);
        assert_eq!(
            h.to_record(),
            json!({
                "ip": "1.1.1.1",
                "hostname": null,
                "domain": null,
                "port": 22,
                "login_name": null,
                "identity_file": null,
                "meta": {},
            })
        );
    }

    #[test]
    fn test_host_equality_by_address() {
        let a = Host::new("1.1.1.1").with_hostname("a");
        let b = Host::new("1.1.1.1").with_hostname("b").with_port(2222);
        assert_eq!(a, b);
        assert_ne!(a, Host::new("2.2.2.2"));
    }

    #[test]
    fn test_host_fqdn() {
        let err = Host::new("1.1.1.1").fqdn().unwrap_err();
        assert!(err.to_string().contains("hostname and domain"));
        let err = Host::new("1.1.1.1").with_hostname("host1").fqdn().unwrap_err();
        assert!(err.to_string().contains("domain not set"));
        let err = Host::new("1.1.1.1").with_domain("example.com").fqdn().unwrap_err();
        assert!(err.to_string().contains("hostname not set"));
        let h = Host::new("1.1.1.1").with_hostname("host1").with_domain("example.com");
        assert_eq!(h.fqdn().unwrap(), "host1.example.com");
    }

    #[test]
    fn test_host_decode_missing_ip() {
        let reg = Registry::new();
        let err = Host::from_record(json!({}), &reg).unwrap_err();
        assert!(err.to_string().contains("invalid record for Host"));
    }

    #[test]
    fn test_host_roundtrip_with_meta() {
        let reg = Registry::new();
        let h = Host::new("10.0.0.1")
            .with_hostname("web1")
            .with_login("root")
            .with_meta("provider", "aws");
        let back = Host::from_record(h.to_record(), &reg).unwrap();
        assert_eq!(back.hostname.as_deref(), Some("web1"));
        assert_eq!(back.meta["provider"], json!("aws"));
    }

    #[test]
    fn test_task_record_uses_paths() {
        let reg = echo_registry();
        let task = echo_task(&reg).with_stdout_processor(reg.processor("test.strip").unwrap());
        assert_eq!(
            task.to_record(),
            json!({
                "name": "print IP address",
                "command_factory": "test.echo_ip",
                "timeout": null,
                "retry": 0,
                "stdout_processor": "test.strip",
                "stderr_processor": null,
                "pre_run": null,
                "post_run": null,
                "meta": {},
            })
        );
        assert_eq!(Task::from_record(task.to_record(), &reg).unwrap(), task);
    }

    #[test]
    fn test_task_decode_partial_record() {
        let reg = echo_registry();
        let task = Task::from_record(
            json!({"name": "print IP address", "command_factory": "test.echo_ip"}),
            &reg,
        )
        .unwrap();
        assert_eq!(task, echo_task(&reg));
    }

    #[test]
    fn test_task_decode_unresolved_factory() {
        let reg = Registry::new();
        let err = Task::from_record(json!({"name": "x", "command_factory": "nope.cmd"}), &reg)
            .unwrap_err();
        assert!(matches!(err, ViperError::Resolution(_)));
    }

    #[test]
    fn test_runner_roundtrip() {
        let reg = echo_registry();
        let runner = Host::new("1.1.1.1").task(&echo_task(&reg), &["x".to_string()]);
        let record = runner.to_record();
        assert_eq!(record["host"]["ip"], json!("1.1.1.1"));
        assert_eq!(record["task"]["command_factory"], json!("test.echo_ip"));
        assert_eq!(Runner::from_record(record, &reg).unwrap(), runner);
    }

    #[test]
    fn test_result_roundtrip_and_helpers() {
        let reg = echo_registry();
        let r = sample_result(&reg, 1.0, "1.1.1.1", 1);
        assert!(r.ok());
        assert!(!r.errored());
        assert_eq!(r.retry_left(), 2);
        assert!(r.duration() > 0.0);
        assert_eq!(TaskResult::from_record(r.to_record(), &reg).unwrap(), r);
        assert_eq!(r.runner(), Runner::new(r.host.clone(), r.task.clone(), r.args.clone()));
    }

    #[test]
    fn test_result_decode_rejects_broken_invariants() {
        let reg = echo_registry();
        let mut record = sample_result(&reg, 1.0, "1.1.1.1", 0).to_record();
        record["end"] = json!(0.5);
        assert!(TaskResult::from_record(record, &reg).is_err());

        let mut record = sample_result(&reg, 1.0, "1.1.1.1", 0).to_record();
        record["retry"] = json!(9);
        let err = TaskResult::from_record(record, &reg).unwrap_err();
        assert!(err.to_string().contains("exceeds task budget"));
    }
}
