use crate::cache::LruCache;
use crate::db::{Database, CF_BLOCKS, CF_HEIGHTS, CF_INFO, CF_META};
use crate::errors::{DbError, DbResult};
use crate::stores::meta_store::{meta_key, ChainMeta};
use rocksdb::{Direction, IteratorMode};
use std::sync::Arc;
use xdag_core::{Block, BlockFlags, BlockInfo, Hash256};

/// A set of ledger mutations committed as one atomic batch.
///
/// Reorgs stage every info rewrite, height-index change and the tip update
/// here so readers never observe a partially applied reorganisation.
#[derive(Default)]
pub struct ChangeSet {
    pub blocks: Vec<(Hash256, Vec<u8>)>,
    pub infos: Vec<BlockInfo>,
    pub heights_put: Vec<(u64, Hash256)>,
    pub heights_delete: Vec<u64>,
    pub meta: Option<ChainMeta>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.infos.is_empty()
            && self.heights_put.is_empty()
            && self.heights_delete.is_empty()
            && self.meta.is_none()
    }

    pub fn put_block(&mut self, block: &Block, info: BlockInfo) {
        self.blocks.push((info.hashlow, block.encode().to_vec()));
        self.infos.push(info);
    }
}

/// Content-addressed block store, keyed by low hash across three column
/// families (`blocks`, `info`, `heights`).
pub struct BlockStore {
    db: Arc<Database>,
    info_cache: LruCache<Hash256, BlockInfo>,
}

impl BlockStore {
    pub fn new(db: Arc<Database>, cache_size: usize) -> Self {
        Self {
            db,
            info_cache: LruCache::new(cache_size),
        }
    }

    /// Persists the raw block and its derived info in one batch; either both
    /// are visible on the next read or neither.
    pub fn put_block(&self, block: &Block, info: &BlockInfo) -> DbResult<()> {
        let key = info.hashlow;
        let mut batch = self.db.batch();
        self.db
            .batch_put(&mut batch, CF_BLOCKS, key.as_ref(), &block.encode())?;
        self.db
            .batch_put(&mut batch, CF_INFO, key.as_ref(), &bincode::serialize(info)?)?;
        self.db.write_batch(batch)?;
        self.info_cache.insert(key, info.clone());
        Ok(())
    }

    pub fn get_block(&self, hashlow: &Hash256) -> DbResult<Option<Block>> {
        match self.db.get(CF_BLOCKS, hashlow.as_ref())? {
            Some(bytes) => {
                let block = Block::decode(&bytes)
                    .map_err(|_| DbError::CorruptRecord(format!("blocks/{hashlow}")))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn get_info(&self, hashlow: &Hash256) -> DbResult<Option<BlockInfo>> {
        if let Some(info) = self.info_cache.get(hashlow) {
            return Ok(Some(info));
        }
        match self.db.get(CF_INFO, hashlow.as_ref())? {
            Some(bytes) => {
                let info: BlockInfo = bincode::deserialize(&bytes)?;
                self.info_cache.insert(*hashlow, info.clone());
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hashlow: &Hash256) -> DbResult<bool> {
        if self.info_cache.get(hashlow).is_some() {
            return Ok(true);
        }
        self.db.exists(CF_INFO, hashlow.as_ref())
    }

    /// Rewrites a single info row.
    pub fn put_info(&self, info: &BlockInfo) -> DbResult<()> {
        self.db
            .put(CF_INFO, info.hashlow.as_ref(), &bincode::serialize(info)?)?;
        self.info_cache.insert(info.hashlow, info.clone());
        Ok(())
    }

    /// Atomic flag mutation; the whole info row (flags and links together)
    /// is replaced in one write.
    pub fn update_flags(
        &self,
        hashlow: &Hash256,
        mutate: impl FnOnce(&mut BlockFlags),
    ) -> DbResult<()> {
        let Some(mut info) = self.get_info(hashlow)? else {
            return Err(DbError::CorruptRecord(format!("info/{hashlow}")));
        };
        mutate(&mut info.flags);
        self.put_info(&info)
    }

    /// Low hash of the main block at `height`, if elected.
    pub fn main_hash_at(&self, height: u64) -> DbResult<Option<Hash256>> {
        match self.db.get(CF_HEIGHTS, &height.to_be_bytes())? {
            Some(bytes) => Ok(Some(Hash256::try_from_slice(&bytes).map_err(|_| {
                DbError::CorruptRecord(format!("heights/{height}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Main-chain infos for heights in `[from, to]`, ascending. The heights
    /// family is keyed big-endian so RocksDB iteration order is height order.
    pub fn iterate_by_height(&self, from: u64, to: u64) -> DbResult<Vec<BlockInfo>> {
        let start = from.to_be_bytes();
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(CF_HEIGHTS, IteratorMode::From(&start, Direction::Forward))?
        {
            let (key, value) = item?;
            let height = u64::from_be_bytes(
                key.as_ref()
                    .try_into()
                    .map_err(|_| DbError::CorruptRecord("heights key".into()))?,
            );
            if height > to {
                break;
            }
            let hashlow = Hash256::try_from_slice(&value)
                .map_err(|_| DbError::CorruptRecord(format!("heights/{height}")))?;
            let info = self
                .get_info(&hashlow)?
                .ok_or_else(|| DbError::CorruptRecord(format!("info/{hashlow}")))?;
            out.push(info);
        }
        Ok(out)
    }

    /// Commits a staged change set as one write batch.
    pub fn commit(&self, changes: ChangeSet) -> DbResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut batch = self.db.batch();
        for (hashlow, bytes) in &changes.blocks {
            self.db
                .batch_put(&mut batch, CF_BLOCKS, hashlow.as_ref(), bytes)?;
        }
        for info in &changes.infos {
            self.db.batch_put(
                &mut batch,
                CF_INFO,
                info.hashlow.as_ref(),
                &bincode::serialize(info)?,
            )?;
        }
        for height in &changes.heights_delete {
            self.db
                .batch_delete(&mut batch, CF_HEIGHTS, &height.to_be_bytes())?;
        }
        for (height, hashlow) in &changes.heights_put {
            self.db
                .batch_put(&mut batch, CF_HEIGHTS, &height.to_be_bytes(), hashlow.as_ref())?;
        }
        if let Some(meta) = &changes.meta {
            self.db
                .batch_put(&mut batch, CF_META, meta_key(), &bincode::serialize(meta)?)?;
        }
        self.db.write_batch(batch)?;
        for info in changes.infos {
            self.info_cache.insert(info.hashlow, info);
        }
        Ok(())
    }

    pub fn block_count(&self) -> DbResult<u64> {
        let mut count = 0u64;
        for item in self.db.iterator(CF_BLOCKS, IteratorMode::Start)? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
