use crate::db::{Database, CF_META};
use crate::errors::DbResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use xdag_core::Hash256;

/// Current on-disk layout version.
pub const SCHEMA_VERSION: u16 = 1;

const META_KEY: &[u8] = b"chain";

/// Chain-level metadata. Tip changes are committed in the same write batch
/// as the block mutations that caused them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMeta {
    pub schema_version: u16,
    pub network_id: u32,
    pub genesis_hashlow: Hash256,
    pub tip_hashlow: Hash256,
    pub tip_height: u64,
}

pub struct MetaStore {
    db: Arc<Database>,
}

impl MetaStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn load(&self) -> DbResult<Option<ChainMeta>> {
        match self.db.get(CF_META, META_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self, meta: &ChainMeta) -> DbResult<()> {
        self.db.put(CF_META, META_KEY, &bincode::serialize(meta)?)
    }
}

pub(crate) fn meta_key() -> &'static [u8] {
    META_KEY
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Database::open(tmp.path()).unwrap());
        let store = MetaStore::new(db);
        assert!(store.load().unwrap().is_none());

        let meta = ChainMeta {
            schema_version: SCHEMA_VERSION,
            network_id: 2,
            genesis_hashlow: Hash256::from_le_u64([0, 1, 1, 1]),
            tip_hashlow: Hash256::from_le_u64([0, 2, 2, 2]),
            tip_height: 42,
        };
        store.store(&meta).unwrap();
        assert_eq!(store.load().unwrap(), Some(meta));
    }
}
