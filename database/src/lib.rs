//! Persistent block store: a RocksDB-backed content-addressed map from low
//! hash to block body and derived metadata, with atomic multi-family batches.

pub mod cache;
pub mod db;
pub mod errors;
pub mod stores;

pub use db::Database;
pub use errors::{DbError, DbResult};
pub use stores::{BlockStore, ChainMeta, ChangeSet, MetaStore, SCHEMA_VERSION};
