//! Core engine: records, containers, registry, execution and the result store.

pub mod collections;
pub mod config;
pub mod error;
pub mod executor;
pub mod hasher;
pub mod items;
pub mod registry;
pub mod state;
pub mod types;
