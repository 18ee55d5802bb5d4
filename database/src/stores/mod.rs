pub mod block_store;
pub mod meta_store;

pub use block_store::{BlockStore, ChangeSet};
pub use meta_store::{ChainMeta, MetaStore, SCHEMA_VERSION};
