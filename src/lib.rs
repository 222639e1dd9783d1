//! Viper: infrastructure automation execution engine.
//!
//! Bind tasks to hosts, run them as local subprocesses (sequentially or on a
//! bounded worker pool), retry failures, and keep every attempt in an
//! append-only SQLite history.

pub mod cli;
pub mod core;
pub mod logging;
pub mod transport;

pub use crate::core::collections::{Hosts, Runners, TaskResults, Tasks};
pub use crate::core::config::ViperConfig;
pub use crate::core::error::{ErrorKind, Result, ViperError};
pub use crate::core::executor::{BatchFailure, BatchOutcome};
pub use crate::core::items::{Item, Items, WhereCondition};
pub use crate::core::registry::{CommandFactory, OutputProcessor, PostHook, PreHook, Registry, Symbol};
pub use crate::core::state::{HistoryQuery, SaveOutcome, Store, StoredRecord};
pub use crate::core::types::{Host, Runner, Task, TaskResult};
