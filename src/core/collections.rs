//! Collection types and the operations specific to each item kind.

use super::error::{Result, ViperError};
use super::items::Items;
use super::state::{HistoryQuery, Store};
use super::types::{Host, Runner, Task, TaskResult};
use indexmap::IndexMap;
use std::path::Path;

pub type Hosts = Items<Host>;
pub type Tasks = Items<Task>;
pub type Runners = Items<Runner>;
pub type TaskResults = Items<TaskResult>;

// ============================================================================
// Hosts
// ============================================================================

impl Items<Host> {
    /// Hosts from whitespace-separated addresses.
    pub fn from_addresses(text: &str) -> Self {
        Self::from_items(text.split_whitespace().map(Host::new))
    }

    /// Load a whitespace-separated address list.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ViperError::Input(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(Self::from_addresses(&content))
    }

    /// Bind `task` to every host.
    pub fn task(&self, task: &Task, args: &[String]) -> Runners {
        self.iter().map(|h| h.task(task, args)).collect()
    }

    pub fn run_task(
        &self,
        store: &Store,
        task: &Task,
        args: &[String],
        max_workers: usize,
    ) -> Result<TaskResults> {
        self.task(task, args).run(store, max_workers)
    }
}

impl Host {
    /// Stored results for this address, newest first.
    pub fn results(&self, store: &Store) -> Result<TaskResults> {
        TaskResults::by_host(store, self)
    }
}

// ============================================================================
// Runners
// ============================================================================

impl Items<Runner> {
    pub fn hosts(&self) -> Hosts {
        self.iter().map(|r| r.host.clone()).collect()
    }
}

impl Runner {
    /// Stored results for this host address and task name, newest first.
    pub fn results(&self, store: &Store) -> Result<TaskResults> {
        TaskResults::by_runner(store, self)
    }
}

// ============================================================================
// Results
// ============================================================================

impl Items<TaskResult> {
    pub fn hosts(&self) -> Hosts {
        self.iter().map(|r| r.host.clone()).collect()
    }

    /// Fresh runners for every distinct binding.
    pub fn runners(&self) -> Runners {
        self.iter().map(TaskResult::runner).collect()
    }

    /// The authoritative outcome per `(trigger_time, host)`: the attempt
    /// with the highest retry count.
    pub fn final_results(&self) -> Self {
        let mut groups: IndexMap<(u64, &Host), &TaskResult> = IndexMap::new();
        for result in self.iter() {
            let key = (result.trigger_time.to_bits(), &result.host);
            if !matches!(groups.get(&key), Some(kept) if kept.retry >= result.retry) {
                groups.insert(key, result);
            }
        }
        groups.into_values().cloned().collect()
    }

    /// Run the bindings again as a new batch.
    pub fn re_run(&self, store: &Store, max_workers: usize) -> Result<Self> {
        self.runners().run(store, max_workers)
    }

    /// Distinct trigger times, ascending.
    pub fn triggers(&self) -> Vec<f64> {
        let mut triggers: Vec<f64> = self.iter().map(|r| r.trigger_time).collect();
        triggers.sort_by(f64::total_cmp);
        triggers.dedup_by(|a, b| a.to_bits() == b.to_bits());
        triggers
    }

    /// Every stored result, newest first; `final_only` keeps final attempts.
    pub fn from_history(store: &Store, final_only: bool) -> Result<Self> {
        let history = store.history(&HistoryQuery::default())?;
        Ok(if final_only {
            history.final_results()
        } else {
            history
        })
    }

    pub fn by_host(store: &Store, host: &Host) -> Result<Self> {
        store.history(&HistoryQuery::default().for_host(host.ip.as_str()))
    }

    pub fn by_task(store: &Store, task: &Task) -> Result<Self> {
        store.history(&HistoryQuery::default().for_task(task.name.as_str()))
    }

    pub fn by_runner(store: &Store, runner: &Runner) -> Result<Self> {
        store.history(
            &HistoryQuery::default()
                .for_host(runner.host.ip.as_str())
                .for_task(runner.task.name.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::items::WhereCondition;
    use crate::core::types::tests::{echo_registry, echo_task, sample_result};
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("history.sqlite3"), Arc::new(echo_registry()));
        store.init(false).unwrap();
        (dir, store)
    }

    fn failed(mut r: TaskResult) -> TaskResult {
        r.returncode = 1;
        r
    }

    #[test]
    fn test_hosts_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        std::fs::write(&path, "1.1.1.1 2.2.2.2\n\n  1.1.1.1\t1.2.3.4\n").unwrap();
        let hosts = Hosts::from_file(&path).unwrap();
        let ips: Vec<&str> = hosts.iter().map(|h| h.ip.as_str()).collect();
        assert_eq!(ips, vec!["1.1.1.1", "2.2.2.2", "1.2.3.4"]);
    }

    #[test]
    fn test_hosts_from_missing_file() {
        let err = Hosts::from_file(Path::new("/nonexistent/hosts.txt")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_hosts_where_ip() {
        let hosts = Hosts::from_addresses("1.1.1.1 2.2.2.2 1.2.3.4");
        let exact = hosts.where_field("ip", WhereCondition::Is, &["1.1.1.1"]);
        assert_eq!(exact, Hosts::from_addresses("1.1.1.1"));
        let prefixed = hosts.where_field("ip", WhereCondition::StartsWith, &["1."]);
        assert_eq!(prefixed, Hosts::from_addresses("1.1.1.1 1.2.3.4"));
    }

    #[test]
    fn test_hosts_task_and_back() {
        let reg = echo_registry();
        let hosts = Hosts::from_addresses("1.1.1.1 2.2.2.2");
        let runners = hosts.task(&echo_task(&reg), &["x".to_string()]);
        assert_eq!(runners.len(), 2);
        assert!(runners.iter().all(|r| r.args == vec!["x".to_string()]));
        assert_eq!(runners.hosts(), hosts);
    }

    #[test]
    fn test_hosts_run_task() {
        let (_dir, store) = store();
        let task = echo_task(store.registry());
        let hosts = Hosts::from_addresses("1.1.1.1 2.2.2.2 3.3.3.3");
        let results = hosts.run_task(&store, &task, &[], 2).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.hosts(), hosts);
        assert_eq!(results.triggers().len(), 1);
    }

    #[test]
    fn test_results_final_keeps_last_attempt() {
        let reg = echo_registry();
        let first_try = failed(sample_result(&reg, 1.0, "1.1.1.1", 0));
        let second_try = sample_result(&reg, 1.0, "1.1.1.1", 1);
        let next_batch = sample_result(&reg, 2.0, "1.1.1.1", 0);
        let results =
            TaskResults::from_items([first_try, second_try.clone(), next_batch.clone()]);
        let finals = results.final_results();
        assert_eq!(finals, TaskResults::from_items([second_try, next_batch]));
    }

    #[test]
    fn test_results_final_independent_of_order() {
        let reg = echo_registry();
        let results = TaskResults::from_items([
            sample_result(&reg, 1.0, "1.1.1.1", 2),
            sample_result(&reg, 1.0, "2.2.2.2", 0),
            sample_result(&reg, 1.0, "1.1.1.1", 0),
            sample_result(&reg, 1.0, "1.1.1.1", 1),
        ]);
        let finals = results.final_results();
        assert_eq!(finals.len(), 2);
        let kept = finals.find_one(|r| r.host.ip == "1.1.1.1").unwrap();
        assert_eq!(kept.retry, 2);
    }

    #[test]
    fn test_results_runners_and_triggers() {
        let reg = echo_registry();
        let results = TaskResults::from_items([
            sample_result(&reg, 2.0, "1.1.1.1", 0),
            sample_result(&reg, 1.0, "1.1.1.1", 0),
            sample_result(&reg, 1.0, "1.1.1.1", 1),
        ]);
        assert_eq!(results.runners().len(), 1);
        assert_eq!(results.triggers(), vec![1.0, 2.0]);
        assert_eq!(results.hosts().len(), 1);
    }

    #[test]
    fn test_results_from_history() {
        let (_dir, store) = store();
        let reg = store.registry();
        store.save(&failed(sample_result(reg, 1.0, "1.1.1.1", 0))).unwrap();
        store.save(&sample_result(reg, 1.0, "1.1.1.1", 1)).unwrap();
        store.save(&sample_result(reg, 5.0, "2.2.2.2", 0)).unwrap();

        let all = TaskResults::from_history(&store, false).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.first().map(|r| r.trigger_time), Some(5.0));

        let finals = TaskResults::from_history(&store, true).unwrap();
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(TaskResult::ok));
    }

    #[test]
    fn test_results_history_lookups() {
        let (_dir, store) = store();
        let task = echo_task(store.registry());
        let host = Host::new("1.1.1.1");
        host.run_task(&store, &task, &[]).unwrap();
        Host::new("2.2.2.2").run_task(&store, &task, &[]).unwrap();

        assert_eq!(host.results(&store).unwrap().len(), 1);
        assert_eq!(TaskResults::by_task(&store, &task).unwrap().len(), 2);
        let runner = host.task(&task, &[]);
        let by_runner = runner.results(&store).unwrap();
        assert_eq!(by_runner.len(), 1);
        assert_eq!(by_runner.first().map(|r| r.runner()), Some(runner));
    }

    #[test]
    fn test_results_re_run() {
        let (_dir, store) = store();
        let task = echo_task(store.registry());
        let first = Hosts::from_addresses("1.1.1.1 2.2.2.2")
            .run_task(&store, &task, &[], 1)
            .unwrap();
        let again = first.re_run(&store, 2).unwrap();
        assert_eq!(again.runners(), first.runners());
        assert_eq!(store.count().unwrap(), 4);
    }
}
