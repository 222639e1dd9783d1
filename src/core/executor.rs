//! Execution: the per-attempt runner protocol and the batch worker pool.
//!
//! One attempt is validate → pre-run hook → spawn → output processors →
//! persist → post-run hook. A non-zero exit (or timeout) is retried while the
//! task's retry budget lasts; every attempt of one run shares a trigger time.

use super::config::ViperConfig;
use super::error::{Result, ViperError};
use super::items::Items;
use super::state::Store;
use super::types::{Host, Runner, Task, TaskResult};
use crate::transport;
use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Current time as Unix epoch seconds.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn check_strings(what: &str, values: &[String]) -> Result<()> {
    match values.iter().find(|v| v.contains('\0')) {
        Some(bad) => Err(ViperError::Input(format!(
            "{} {:?} contains a NUL byte",
            what, bad
        ))),
        None => Ok(()),
    }
}

impl Runner {
    /// Validate the arguments and generate the argv for this binding.
    pub fn command(&self) -> Result<Vec<String>> {
        check_strings("argument", &self.args)?;
        let argv = self
            .task
            .command_factory
            .get()
            .command(&self.host, &self.args)?;
        match argv.first() {
            None => return Err(ViperError::Input("generated empty command".to_string())),
            Some(program) if program.is_empty() => {
                return Err(ViperError::Input(
                    "generated command has an empty program name".to_string(),
                ))
            }
            Some(_) => {}
        }
        check_strings("command part", &argv)?;
        Ok(argv)
    }

    /// Run with a fresh trigger time.
    pub fn run(&self, store: &Store) -> Result<TaskResult> {
        self.run_at(store, now_epoch())
    }

    /// Run, retrying failed attempts under one trigger time. Returns the
    /// last attempt.
    #[instrument(skip_all, fields(host = %self.host.ip, task = %self.task.name))]
    pub fn run_at(&self, store: &Store, trigger_time: f64) -> Result<TaskResult> {
        let mut retry = 0;
        loop {
            let result = self.attempt(store, trigger_time, retry)?;
            if result.ok() || result.retry_left() == 0 {
                return Ok(result);
            }
            warn!(
                returncode = result.returncode,
                retry,
                retry_left = result.retry_left(),
                "attempt failed, retrying"
            );
            retry += 1;
        }
    }

    fn attempt(&self, store: &Store, trigger_time: f64, retry: u32) -> Result<TaskResult> {
        let command = self.command()?;
        if let Some(hook) = &self.task.pre_run {
            debug!(hook = hook.path(), "pre-run hook");
            hook.get().before(self)?;
        }

        let start = now_epoch();
        let output = transport::exec_command(&command, self.task.timeout.map(Duration::from_secs))?;
        let end = now_epoch().max(start);

        let stdout = match &self.task.stdout_processor {
            Some(p) => p.get().process(&output.stdout),
            None => output.stdout,
        };
        let stderr = match &self.task.stderr_processor {
            Some(p) => p.get().process(&output.stderr),
            None => output.stderr,
        };

        let result = TaskResult {
            trigger_time,
            task: self.task.clone(),
            host: self.host.clone(),
            args: self.args.clone(),
            command,
            stdout,
            stderr,
            returncode: output.exit_code,
            start,
            end,
            retry,
        };
        let saved = store.save(&result)?;
        debug!(id = saved.id(), returncode = result.returncode, retry, "attempt recorded");

        if let Some(hook) = &self.task.post_run {
            debug!(hook = hook.path(), "post-run hook");
            hook.get().after(&result)?;
        }
        Ok(result)
    }
}

impl Host {
    /// Bind `task` to this host and run it.
    pub fn run_task(&self, store: &Store, task: &Task, args: &[String]) -> Result<TaskResult> {
        self.task(task, args).run(store)
    }
}

/// A runner of a batch that failed with an error instead of a result.
#[derive(Debug)]
pub struct BatchFailure {
    pub runner: Runner,
    pub error: ViperError,
}

/// Everything a batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Items<TaskResult>,
    pub failures: Vec<BatchFailure>,
}

impl Items<Runner> {
    /// Run every runner under one trigger time, dropping (and logging) the
    /// ones that fail with an error.
    ///
    /// Starts its own runtime when `max_workers > 1`, so it must not be
    /// called from inside an async context.
    pub fn run(&self, store: &Store, max_workers: usize) -> Result<Items<TaskResult>> {
        let outcome = self.run_collect(store, max_workers)?;
        for failure in &outcome.failures {
            error!(
                host = %failure.runner.host.ip,
                task = %failure.runner.task.name,
                kind = ?failure.error.kind(),
                "runner failed: {}",
                failure.error
            );
        }
        Ok(outcome.results)
    }

    /// Run with the pool size configured by `viper.yaml` / `VIPER_MAX_WORKERS`.
    pub fn run_configured(&self, store: &Store, config: &ViperConfig) -> Result<Items<TaskResult>> {
        self.run(store, config.max_workers)
    }

    /// Like [`run`](Self::run) but hands back the failures.
    #[instrument(skip_all, fields(runners = self.len(), max_workers = max_workers))]
    pub fn run_collect(&self, store: &Store, max_workers: usize) -> Result<BatchOutcome> {
        let trigger_time = now_epoch();
        info!(trigger_time, "batch started");

        let outcomes: Vec<Outcome> = if max_workers <= 1 {
            self.iter()
                .map(|r| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| r.run_at(store, trigger_time)))
                        .unwrap_or_else(|payload| Err(panicked(payload)));
                    (r.clone(), outcome)
                })
                .collect()
        } else {
            run_pool(self.all(), store, trigger_time, max_workers)?
        };

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (runner, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(error) => failures.push(BatchFailure { runner, error }),
            }
        }
        info!(succeeded = results.len(), failed = failures.len(), "batch finished");
        Ok(BatchOutcome {
            results: Items::from_items(results),
            failures,
        })
    }
}

type Outcome = (Runner, Result<TaskResult>);

/// A runner that panicked becomes a `Worker` failure of its batch.
fn panicked(payload: Box<dyn Any + Send>) -> ViperError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ViperError::Worker(format!("runner panicked: {}", message))
}

/// At most `max_workers` runners in flight; completions collected in any order.
fn run_pool(
    runners: &[Runner],
    store: &Store,
    trigger_time: f64,
    max_workers: usize,
) -> Result<Vec<Outcome>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(max_workers)
        .thread_name("viper-worker")
        .build()?;

    let outcomes = runtime.block_on(async {
        let sem = Arc::new(Semaphore::new(max_workers));
        let mut futs: FuturesUnordered<_> = FuturesUnordered::new();

        for runner in runners {
            let runner = runner.clone();
            let store = store.clone();
            let sem = sem.clone();

            futs.push(async move {
                let outcome = match sem.acquire_owned().await {
                    Ok(permit) => {
                        let worker = runner.clone();
                        tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            worker.run_at(&store, trigger_time)
                        })
                        .await
                        .unwrap_or_else(|e| {
                            Err(if e.is_panic() {
                                panicked(e.into_panic())
                            } else {
                                ViperError::Worker(e.to_string())
                            })
                        })
                    }
                    Err(_) => Err(ViperError::Worker("semaphore closed unexpectedly".into())),
                };
                (runner, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(runners.len());
        while let Some(outcome) = futs.next().await {
            outcomes.push(outcome);
        }
        outcomes
    });
    Ok(outcomes)
}
