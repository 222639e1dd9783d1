//! Symbol registry: named command factories, output processors, hooks and filters.
//!
//! Tasks are persisted with symbolic paths in place of behavior. The registry
//! is populated at startup and turns those paths back into callables.

use super::error::{Result, ViperError};
use super::items::Item;
use super::types::{Host, Runner, TaskResult};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Builds the argv for a host and the runner's positional arguments.
pub trait CommandFactory: Send + Sync {
    fn command(&self, host: &Host, args: &[String]) -> Result<Vec<String>>;
}

/// Rewrites captured stdout or stderr.
pub trait OutputProcessor: Send + Sync {
    fn process(&self, text: &str) -> String;
}

/// Runs before the process is spawned.
pub trait PreHook: Send + Sync {
    fn before(&self, runner: &Runner) -> Result<()>;
}

/// Runs after the result has been persisted.
pub trait PostHook: Send + Sync {
    fn after(&self, result: &TaskResult) -> Result<()>;
}

impl<F> CommandFactory for F
where
    F: Fn(&Host, &[String]) -> Result<Vec<String>> + Send + Sync,
{
    fn command(&self, host: &Host, args: &[String]) -> Result<Vec<String>> {
        self(host, args)
    }
}

impl<F> OutputProcessor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn process(&self, text: &str) -> String {
        self(text)
    }
}

impl<F> PreHook for F
where
    F: Fn(&Runner) -> Result<()> + Send + Sync,
{
    fn before(&self, runner: &Runner) -> Result<()> {
        self(runner)
    }
}

impl<F> PostHook for F
where
    F: Fn(&TaskResult) -> Result<()> + Send + Sync,
{
    fn after(&self, result: &TaskResult) -> Result<()> {
        self(result)
    }
}

/// Item predicate resolved by name; receives the item and extra arguments.
pub type FilterFn<T> = Arc<dyn Fn(&T, &[String]) -> bool + Send + Sync>;

/// A callable paired with the path it was registered under.
///
/// Equality, hashing and serialization use the path only.
pub struct Symbol<F: ?Sized> {
    path: String,
    func: Arc<F>,
}

impl<F: ?Sized> Symbol<F> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get(&self) -> &F {
        &self.func
    }
}

impl<F: ?Sized> Clone for Symbol<F> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Symbol<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.path)
    }
}

impl<F: ?Sized> PartialEq for Symbol<F> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<F: ?Sized> Eq for Symbol<F> {}

impl<F: ?Sized> Hash for Symbol<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl<F: ?Sized> Serialize for Symbol<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

enum Entry {
    Command(Arc<dyn CommandFactory>),
    Processor(Arc<dyn OutputProcessor>),
    PreHook(Arc<dyn PreHook>),
    PostHook(Arc<dyn PostHook>),
    Filter(Arc<dyn Any + Send + Sync>),
}

impl Entry {
    fn label(&self) -> &'static str {
        match self {
            Self::Command(_) => "command factory",
            Self::Processor(_) => "output processor",
            Self::PreHook(_) => "pre-run hook",
            Self::PostHook(_) => "post-run hook",
            Self::Filter(_) => "filter",
        }
    }
}

/// Path → callable lookup table.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.entries.keys().collect();
        paths.sort();
        f.debug_struct("Registry").field("paths", &paths).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Register a command factory. Re-registering a path replaces it.
    pub fn register_command<F>(&mut self, path: &str, func: F) -> Symbol<dyn CommandFactory>
    where
        F: Fn(&Host, &[String]) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        let func: Arc<dyn CommandFactory> = Arc::new(func);
        self.entries
            .insert(path.to_string(), Entry::Command(Arc::clone(&func)));
        Symbol {
            path: path.to_string(),
            func,
        }
    }

    pub fn register_processor<F>(&mut self, path: &str, func: F) -> Symbol<dyn OutputProcessor>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let func: Arc<dyn OutputProcessor> = Arc::new(func);
        self.entries
            .insert(path.to_string(), Entry::Processor(Arc::clone(&func)));
        Symbol {
            path: path.to_string(),
            func,
        }
    }

    pub fn register_pre_hook<F>(&mut self, path: &str, func: F) -> Symbol<dyn PreHook>
    where
        F: Fn(&Runner) -> Result<()> + Send + Sync + 'static,
    {
        let func: Arc<dyn PreHook> = Arc::new(func);
        self.entries
            .insert(path.to_string(), Entry::PreHook(Arc::clone(&func)));
        Symbol {
            path: path.to_string(),
            func,
        }
    }

    pub fn register_post_hook<F>(&mut self, path: &str, func: F) -> Symbol<dyn PostHook>
    where
        F: Fn(&TaskResult) -> Result<()> + Send + Sync + 'static,
    {
        let func: Arc<dyn PostHook> = Arc::new(func);
        self.entries
            .insert(path.to_string(), Entry::PostHook(Arc::clone(&func)));
        Symbol {
            path: path.to_string(),
            func,
        }
    }

    /// Register a named filter for one item type.
    pub fn register_filter<T, F>(&mut self, path: &str, func: F)
    where
        T: Item,
        F: Fn(&T, &[String]) -> bool + Send + Sync + 'static,
    {
        let func: FilterFn<T> = Arc::new(func);
        self.entries
            .insert(path.to_string(), Entry::Filter(Arc::new(func)));
    }

    fn lookup(&self, path: &str) -> Result<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| ViperError::Resolution(path.to_string()))
    }

    fn wrong_kind(path: &str, found: &Entry, wanted: &str) -> ViperError {
        ViperError::Input(format!(
            "{:?} is a {}, not a {}",
            path,
            found.label(),
            wanted
        ))
    }

    pub fn command(&self, path: &str) -> Result<Symbol<dyn CommandFactory>> {
        match self.lookup(path)? {
            Entry::Command(func) => Ok(Symbol {
                path: path.to_string(),
                func: Arc::clone(func),
            }),
            other => Err(Self::wrong_kind(path, other, "command factory")),
        }
    }

    pub fn processor(&self, path: &str) -> Result<Symbol<dyn OutputProcessor>> {
        match self.lookup(path)? {
            Entry::Processor(func) => Ok(Symbol {
                path: path.to_string(),
                func: Arc::clone(func),
            }),
            other => Err(Self::wrong_kind(path, other, "output processor")),
        }
    }

    pub fn pre_hook(&self, path: &str) -> Result<Symbol<dyn PreHook>> {
        match self.lookup(path)? {
            Entry::PreHook(func) => Ok(Symbol {
                path: path.to_string(),
                func: Arc::clone(func),
            }),
            other => Err(Self::wrong_kind(path, other, "pre-run hook")),
        }
    }

    pub fn post_hook(&self, path: &str) -> Result<Symbol<dyn PostHook>> {
        match self.lookup(path)? {
            Entry::PostHook(func) => Ok(Symbol {
                path: path.to_string(),
                func: Arc::clone(func),
            }),
            other => Err(Self::wrong_kind(path, other, "post-run hook")),
        }
    }

    /// Resolve a filter registered for item type `T`.
    pub fn filter<T: Item>(&self, path: &str) -> Result<FilterFn<T>> {
        match self.lookup(path)? {
            Entry::Filter(any) => any.downcast_ref::<FilterFn<T>>().cloned().ok_or_else(|| {
                ViperError::Input(format!("{:?} is not a filter for {}", path, T::KIND))
            }),
            other => Err(Self::wrong_kind(path, other, "filter")),
        }
    }
}
