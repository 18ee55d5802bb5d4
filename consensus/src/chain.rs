use crate::errors::{ChainError, ChainResult};
use crate::orphans::OrphanPool;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use xdag_core::difficulty::{better_candidate, block_diff};
use xdag_core::{
    Block, BlockError, BlockFlags, BlockInfo, Hash256, Network, XAmount, XdagStats,
    MAX_TIMESTAMP_DRIFT_MS,
};
use xdag_crypto::recover_compressed;
use xdag_database::{BlockStore, ChainMeta, ChangeSet, MetaStore, SCHEMA_VERSION};

/// Outcome of feeding one block into the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResult {
    /// Admitted and applied; `released_orphans` counts parked blocks that
    /// this one unblocked and that were applied in the same pass.
    Applied {
        hashlow: Hash256,
        released_orphans: usize,
    },
    /// Parked until the listed links arrive.
    Orphaned { missing: Vec<Hash256> },
    AlreadyKnown,
}

enum AdmitOutcome {
    Applied(Hash256),
    Orphaned(Vec<Hash256>),
    AlreadyKnown,
}

/// The DAG ledger engine.
///
/// Owned by the single consensus thread: every admission, election and store
/// mutation is serialised through `&mut self`. Other threads read the store
/// behind its own synchronisation and may lag by at most one committed batch.
pub struct Dagchain {
    pub(crate) store: Arc<BlockStore>,
    pub(crate) meta: ChainMeta,
    pub(crate) orphans: OrphanPool,
    /// Best election candidate per epoch, by cumulative difficulty.
    pub(crate) epoch_best: BTreeMap<u64, (Hash256, U256)>,
    pub(crate) pretop: Option<Hash256>,
    pub(crate) network: Network,
    pub(crate) nblocks: u64,
}

impl Dagchain {
    /// Opens the chain, creating and persisting the genesis block on first
    /// boot. Refuses stores written by another network or schema.
    pub fn bootstrap(
        store: Arc<BlockStore>,
        meta_store: &MetaStore,
        network: Network,
    ) -> ChainResult<Self> {
        let meta = match meta_store.load()? {
            Some(meta) => {
                if meta.network_id != network.id() {
                    return Err(ChainError::Meta(format!(
                        "store belongs to network id {}, node runs {}",
                        meta.network_id,
                        network.id()
                    )));
                }
                if meta.schema_version != SCHEMA_VERSION {
                    return Err(ChainError::Meta(format!(
                        "schema version {} unsupported (expected {})",
                        meta.schema_version, SCHEMA_VERSION
                    )));
                }
                meta
            }
            None => {
                let genesis = network.genesis_block();
                let hash = genesis.hash();
                let hashlow = hash.low();
                let mut flags = BlockFlags::APPLIED | BlockFlags::MAIN_CHAIN | BlockFlags::SAVED;
                if genesis.remark().is_some() {
                    flags.insert(BlockFlags::REMARK);
                }
                let info = BlockInfo {
                    height: 0,
                    difficulty: block_diff(&hash),
                    ref_link: None,
                    max_diff_link: None,
                    fee: XAmount::ZERO,
                    hash,
                    hashlow,
                    amount: XAmount::ZERO,
                    timestamp: genesis.timestamp,
                    flags,
                    remark: genesis.remark().copied(),
                };
                let meta = ChainMeta {
                    schema_version: SCHEMA_VERSION,
                    network_id: network.id(),
                    genesis_hashlow: hashlow,
                    tip_hashlow: hashlow,
                    tip_height: 0,
                };
                let mut changes = ChangeSet::default();
                changes.put_block(&genesis, info);
                changes.heights_put.push((0, hashlow));
                changes.meta = Some(meta.clone());
                store.commit(changes)?;
                meta
            }
        };
        let nblocks = store.block_count()?;
        Ok(Self {
            store,
            meta,
            orphans: OrphanPool::new(),
            epoch_best: BTreeMap::new(),
            pretop: None,
            network,
            nblocks,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tip(&self) -> Hash256 {
        self.meta.tip_hashlow
    }

    pub fn tip_height(&self) -> u64 {
        self.meta.tip_height
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn get_block(&self, hashlow: &Hash256) -> ChainResult<Option<Block>> {
        Ok(self.store.get_block(hashlow)?)
    }

    pub fn get_info(&self, hashlow: &Hash256) -> ChainResult<Option<BlockInfo>> {
        Ok(self.store.get_info(hashlow)?)
    }

    /// Low hash of the main block at `height`, if any.
    pub fn main_block_at(&self, height: u64) -> ChainResult<Option<Hash256>> {
        Ok(self.store.main_hash_at(height)?)
    }

    /// Balance of an address block. Only applied blocks hold balances.
    pub fn balance(&self, hashlow: &Hash256) -> ChainResult<Option<XAmount>> {
        Ok(self
            .store
            .get_info(hashlow)?
            .filter(BlockInfo::is_applied)
            .map(|info| info.amount))
    }

    pub fn stats(&self) -> ChainResult<XdagStats> {
        let tip_diff = self
            .store
            .get_info(&self.meta.tip_hashlow)?
            .map(|info| info.difficulty)
            .unwrap_or_default();
        Ok(XdagStats {
            nblocks: self.nblocks,
            total_nblocks: self.nblocks,
            nmain: self.meta.tip_height,
            total_nmain: self.meta.tip_height,
            tip_diff,
            tip_hashlow: self.meta.tip_hashlow,
        })
    }

    /// Runs the admission pipeline on `block`, then drains every orphan the
    /// new block (transitively) unblocks.
    pub fn try_connect(&mut self, block: Block, now_ms: u64) -> ChainResult<ImportResult> {
        let hashlow = match self.admit_one(block, now_ms)? {
            AdmitOutcome::AlreadyKnown => return Ok(ImportResult::AlreadyKnown),
            AdmitOutcome::Orphaned(missing) => return Ok(ImportResult::Orphaned { missing }),
            AdmitOutcome::Applied(hashlow) => hashlow,
        };

        let mut released = 0usize;
        let mut queue: VecDeque<Block> = self.orphans.release(&hashlow).into();
        while let Some(orphan) = queue.pop_front() {
            match self.admit_one(orphan, now_ms) {
                Ok(AdmitOutcome::Applied(applied)) => {
                    released += 1;
                    queue.extend(self.orphans.release(&applied));
                }
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(%err, "dropping released orphan"),
            }
        }
        Ok(ImportResult::Applied {
            hashlow,
            released_orphans: released,
        })
    }

    /// One pass of the admission pipeline: syntax, links, signatures,
    /// arithmetic, difficulty, then the atomic apply.
    fn admit_one(&mut self, block: Block, now_ms: u64) -> Result<AdmitOutcome, ChainError> {
        let hash = block.hash();
        let hashlow = hash.low();

        if self.store.has_block(&hashlow)? || self.orphans.contains(&hashlow) {
            return Ok(AdmitOutcome::AlreadyKnown);
        }

        // re-encode through the codec so wire and local blocks face the same
        // composition rules
        Block::decode(&block.encode())?;

        if block.timestamp > now_ms + MAX_TIMESTAMP_DRIFT_MS {
            return Err(BlockError::TimestampInFuture {
                timestamp: block.timestamp,
                now: now_ms,
                max_drift_ms: MAX_TIMESTAMP_DRIFT_MS,
            }
            .into());
        }

        // link resolution
        let mut targets: Vec<Hash256> = Vec::new();
        for (link, _) in block.links() {
            if !targets.contains(&link.link) {
                targets.push(link.link);
            }
        }
        let mut missing = Vec::new();
        for target in &targets {
            if !self.store.has_block(target)? {
                missing.push(*target);
            }
        }
        if !missing.is_empty() {
            self.orphans.park(block, missing.clone(), now_ms);
            return Ok(AdmitOutcome::Orphaned(missing));
        }

        let mut link_infos: HashMap<Hash256, BlockInfo> = HashMap::new();
        for target in &targets {
            let info = self
                .store
                .get_info(target)?
                .ok_or_else(|| ChainError::Reorg(format!("info missing for stored {target}")))?;
            if info.timestamp >= block.timestamp {
                return Err(BlockError::LinkNotOlder.into());
            }
            link_infos.insert(*target, info);
        }

        self.check_signatures(&block)?;
        let fee = self.check_arithmetic(&block, &link_infos)?;

        // difficulty: own work plus the best cumulative path among the links
        let own_diff = block_diff(&hash);
        let mut max_link: Option<(Hash256, U256)> = None;
        for (target, info) in &link_infos {
            let replace = match &max_link {
                None => true,
                Some((best_hash, best_diff)) => {
                    better_candidate(info.difficulty, target, *best_diff, best_hash)
                }
            };
            if replace {
                max_link = Some((*target, info.difficulty));
            }
        }
        let cumulative = match &max_link {
            Some((_, link_diff)) => own_diff.saturating_add(*link_diff),
            None => own_diff,
        };

        // apply: balance deltas and the new block land in one batch
        let mut flags = BlockFlags::APPLIED | BlockFlags::SAVED | BlockFlags::EXTRA;
        if block.remark().is_some() {
            flags.insert(BlockFlags::REMARK);
        }
        let info = BlockInfo {
            height: 0,
            difficulty: cumulative,
            ref_link: None,
            max_diff_link: max_link.map(|(h, _)| h),
            fee,
            hash,
            hashlow,
            amount: XAmount::ZERO,
            timestamp: block.timestamp,
            flags,
            remark: block.remark().copied(),
        };

        let mut changes = ChangeSet::default();
        self.stage_balance_deltas(&block, link_infos, &mut changes)?;
        changes.put_block(&block, info);
        self.store.commit(changes)?;
        self.nblocks += 1;

        self.record_candidate(hashlow, cumulative, block.epoch())?;

        Ok(AdmitOutcome::Applied(hashlow))
    }

    /// Every in-signature must recover a key published by the linked input;
    /// every out-signature must recover a key published by this block.
    fn check_signatures(&self, block: &Block) -> ChainResult<()> {
        let has_in_sigs = block.in_signatures().next().is_some();
        let has_out_sigs = block.out_signatures().next().is_some();
        let has_inputs = block.inputs().next().is_some();
        if !has_inputs && !has_out_sigs && !has_in_sigs {
            return Ok(());
        }

        let digest = block.signing_digest();
        let in_sigs: Vec<_> = block.in_signatures().collect();

        for input in block.inputs() {
            let linked = self
                .store
                .get_block(&input.link)?
                .ok_or_else(|| ChainError::Reorg(format!("body missing for {}", input.link)))?;
            let authorized = linked.public_keys().any(|pk| {
                let compressed = pk.compressed();
                in_sigs
                    .iter()
                    .any(|sig| recover_compressed(&digest, sig, &compressed))
            });
            if !authorized {
                return Err(BlockError::InvalidSignature.into());
            }
        }

        if has_out_sigs {
            let own_keys: Vec<_> = block.public_keys().collect();
            if own_keys.is_empty() {
                return Err(BlockError::MissingPublicKey.into());
            }
            for sig in block.out_signatures() {
                let matched = own_keys
                    .iter()
                    .any(|pk| recover_compressed(&digest, sig, &pk.compressed()));
                if !matched {
                    return Err(BlockError::InvalidSignature.into());
                }
            }
        }

        Ok(())
    }

    /// Inputs must cover outputs; the difference is the fee and must match
    /// the header's declaration. Returns the fee.
    fn check_arithmetic(
        &self,
        block: &Block,
        link_infos: &HashMap<Hash256, BlockInfo>,
    ) -> ChainResult<XAmount> {
        let mut in_sum: u128 = 0;
        let mut out_sum: u128 = 0;
        let mut debits: HashMap<Hash256, u128> = HashMap::new();
        for (link, is_input) in block.links() {
            if is_input {
                in_sum += link.amount.raw() as u128;
                *debits.entry(link.link).or_default() += link.amount.raw() as u128;
            } else {
                out_sum += link.amount.raw() as u128;
            }
        }
        if in_sum > u64::MAX as u128 || out_sum > u64::MAX as u128 {
            return Err(BlockError::AmountOverflow.into());
        }
        if out_sum > in_sum {
            return Err(BlockError::OutputsExceedInputs.into());
        }
        let fee = XAmount::from_raw((in_sum - out_sum) as u64);
        if block.fee != fee {
            return Err(BlockError::FeeMismatch {
                declared: block.fee,
                computed: fee,
            }
            .into());
        }

        for (target, debit) in debits {
            let available = link_infos
                .get(&target)
                .map(|info| info.amount)
                .unwrap_or(XAmount::ZERO);
            if (available.raw() as u128) < debit {
                return Err(BlockError::InsufficientFunds {
                    needed: XAmount::from_raw(debit as u64),
                    available,
                }
                .into());
            }
        }
        Ok(fee)
    }

    /// Debits every input link and credits every output link, staging the
    /// rewritten infos. Availability was verified by `check_arithmetic`.
    fn stage_balance_deltas(
        &self,
        block: &Block,
        mut link_infos: HashMap<Hash256, BlockInfo>,
        changes: &mut ChangeSet,
    ) -> ChainResult<()> {
        let mut touched: HashSet<Hash256> = HashSet::new();
        for (link, is_input) in block.links() {
            let info = link_infos
                .get_mut(&link.link)
                .ok_or_else(|| ChainError::Reorg(format!("unresolved link {}", link.link)))?;
            if is_input {
                info.amount = info
                    .amount
                    .checked_sub(link.amount)
                    .ok_or(BlockError::AmountOverflow)?;
            } else {
                info.amount = info.amount.saturating_add(link.amount);
            }
            touched.insert(link.link);
        }
        for target in touched {
            if let Some(info) = link_infos.remove(&target) {
                changes.infos.push(info);
            }
        }
        Ok(())
    }

    /// Tracks the block as an election candidate for its epoch and keeps the
    /// PRETOP marker on the best candidate of the newest epoch.
    fn record_candidate(
        &mut self,
        hashlow: Hash256,
        cumulative: U256,
        epoch: u64,
    ) -> ChainResult<()> {
        let replace = match self.epoch_best.get(&epoch) {
            None => true,
            Some((best_hash, best_diff)) => {
                better_candidate(cumulative, &hashlow, *best_diff, best_hash)
            }
        };
        if !replace {
            return Ok(());
        }
        self.epoch_best.insert(epoch, (hashlow, cumulative));

        let newest_best = self
            .epoch_best
            .iter()
            .next_back()
            .map(|(_, (hash, _))| *hash);
        if newest_best != self.pretop {
            if let Some(old) = self.pretop.take() {
                if self.store.has_block(&old)? {
                    self.store
                        .update_flags(&old, |f| f.remove(BlockFlags::PRETOP))?;
                }
            }
            if let Some(new) = newest_best {
                self.store
                    .update_flags(&new, |f| f.insert(BlockFlags::PRETOP))?;
            }
            self.pretop = newest_best;
        }
        Ok(())
    }
}
