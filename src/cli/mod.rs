//! CLI subcommands over the result store: init, history, show.
//!
//! Records are printed in their stored form; task callables stay as paths,
//! so no symbols need to be registered to inspect a database.

use crate::core::config::ViperConfig;
use crate::core::error::{Result, ViperError};
use crate::core::registry::Registry;
use crate::core::state::{HistoryQuery, Store, StoredRecord};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the result database schema
    Init {
        /// Database path (default: config db_url)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Drop existing history first
        #[arg(long)]
        force: bool,
    },

    /// Print stored results as JSON lines, newest first
    History {
        /// Database path (default: config db_url)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Only results for this host address
        #[arg(long)]
        host: Option<String>,

        /// Only results for this task name
        #[arg(long)]
        task: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Print one stored result as JSON
    Show {
        /// Result id
        id: i64,

        /// Database path (default: config db_url)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, config: &ViperConfig) -> Result<()> {
    match cmd {
        Commands::Init { db, force } => cmd_init(&open_store(db, config), force),
        Commands::History {
            db,
            host,
            task,
            limit,
        } => {
            let query = HistoryQuery { host, task, limit };
            cmd_history(&open_store(db, config), &query)
        }
        Commands::Show { id, db } => cmd_show(&open_store(db, config), id),
    }
}

/// `--db` wins over the configured database.
fn open_store(db: Option<PathBuf>, config: &ViperConfig) -> Store {
    let registry = Arc::new(Registry::new());
    match db {
        Some(path) => Store::new(path, registry),
        None => Store::from_config(config, registry),
    }
}

fn to_json(record: &StoredRecord) -> Result<String> {
    serde_json::to_string(record).map_err(|e| ViperError::Input(format!("cannot encode record: {}", e)))
}

fn cmd_init(store: &Store, force: bool) -> Result<()> {
    store.init(force)?;
    println!("Initialized result store at {}", store.path().display());
    Ok(())
}

fn history_lines(store: &Store, query: &HistoryQuery) -> Result<Vec<String>> {
    store
        .records(query)?
        .iter()
        .map(to_json)
        .collect()
}

fn cmd_history(store: &Store, query: &HistoryQuery) -> Result<()> {
    for line in history_lines(store, query)? {
        println!("{}", line);
    }
    Ok(())
}

fn show_record(store: &Store, id: i64) -> Result<String> {
    let record = store
        .record(id)?
        .ok_or_else(|| ViperError::Input(format!("no result with id {}", id)))?;
    serde_json::to_string_pretty(&record)
        .map_err(|e| ViperError::Input(format!("cannot encode record: {}", e)))
}

fn cmd_show(store: &Store, id: i64) -> Result<()> {
    println!("{}", show_record(store, id)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::tests::{echo_registry, sample_result};
    use std::path::Path;

    fn raw_store(db: &Path) -> Store {
        open_store(Some(db.to_path_buf()), &ViperConfig::default())
    }

    fn seeded_store(dir: &Path) -> Store {
        let db = dir.join("cli.sqlite3");
        let reg = Arc::new(echo_registry());
        let store = Store::new(&db, reg.clone());
        store.init(false).unwrap();
        store.save(&sample_result(&reg, 1.0, "1.1.1.1", 0)).unwrap();
        store.save(&sample_result(&reg, 2.0, "2.2.2.2", 0)).unwrap();
        store.save(&sample_result(&reg, 3.0, "1.1.1.1", 0)).unwrap();
        raw_store(&db)
    }

    #[test]
    fn test_cli_init() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("new.sqlite3");
        let store = raw_store(&db);
        cmd_init(&store, false).unwrap();
        assert!(db.exists());
        let err = cmd_init(&store, false).unwrap_err();
        assert!(matches!(err, ViperError::AlreadyExists(_)));
        cmd_init(&store, true).unwrap();
    }

    #[test]
    fn test_cli_dispatch_uses_config_db() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViperConfig {
            db_url: dir.path().join("configured.sqlite3"),
            max_workers: 0,
        };
        dispatch(
            Commands::Init {
                db: None,
                force: false,
            },
            &config,
        )
        .unwrap();
        assert!(config.db_url.exists());
    }

    #[test]
    fn test_cli_db_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViperConfig {
            db_url: dir.path().join("configured.sqlite3"),
            max_workers: 0,
        };
        let flag = dir.path().join("flag.sqlite3");
        assert_eq!(open_store(Some(flag.clone()), &config).path(), flag.as_path());
        assert_eq!(open_store(None, &config).path(), config.db_url.as_path());
    }

    #[test]
    fn test_cli_history_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let all = history_lines(&store, &HistoryQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        let newest: serde_json::Value = serde_json::from_str(&all[0]).unwrap();
        assert_eq!(newest["trigger_time"], serde_json::json!(3.0));
        assert!(newest["hash"].as_str().unwrap().starts_with("blake3:"));

        let host_only = history_lines(&store, &HistoryQuery::default().for_host("2.2.2.2")).unwrap();
        assert_eq!(host_only.len(), 1);

        let limited = history_lines(&store, &HistoryQuery::default().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_cli_history_without_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = raw_store(&dir.path().join("none.sqlite3"));
        let err = history_lines(&store, &HistoryQuery::default()).unwrap_err();
        assert!(matches!(err, ViperError::Store(_)));
    }

    #[test]
    fn test_cli_show() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let text = show_record(&store, 1).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], serde_json::json!(1));
        assert_eq!(value["host"]["ip"], serde_json::json!("1.1.1.1"));

        let err = show_record(&store, 99).unwrap_err();
        assert!(err.to_string().contains("no result with id 99"));
    }
}
