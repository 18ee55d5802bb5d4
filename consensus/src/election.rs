use crate::chain::Dagchain;
use crate::errors::{ChainError, ChainResult};
use crate::reward::main_block_reward;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use xdag_core::{BlockFlags, BlockInfo, Hash256, XAmount};
use xdag_database::{BlockStore, ChangeSet};

impl Dagchain {
    /// Second-boundary tick: expires stale orphans, then elects the best
    /// candidate of every epoch that has closed. Returns how many candidates
    /// were adopted onto the main chain.
    pub fn epoch_tick(&mut self, now_ms: u64) -> ChainResult<usize> {
        let expired = self.orphans.expire(now_ms);
        if expired > 0 {
            debug!(expired, "discarded stale orphans");
        }

        let open_epoch = now_ms / 1_000;
        let closing: Vec<u64> = self.epoch_best.range(..open_epoch).map(|(e, _)| *e).collect();
        let mut adopted = 0usize;
        for epoch in closing {
            let (candidate, _) = self
                .epoch_best
                .remove(&epoch)
                .expect("epoch key taken from range");
            if self.try_elect(candidate)? {
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    /// Attempts to adopt `candidate` as the new tip. The candidate wins iff
    /// its cumulative difficulty beats the current tip's; adoption reverts
    /// the abandoned segment and applies the new one, all in one batch.
    fn try_elect(&mut self, candidate: Hash256) -> ChainResult<bool> {
        let Some(cand_info) = self.store.get_info(&candidate)? else {
            return Ok(false);
        };
        if cand_info.is_main() || !cand_info.is_applied() {
            return Ok(false);
        }
        let tip_info = self
            .store
            .get_info(&self.meta.tip_hashlow)?
            .ok_or_else(|| ChainError::Reorg("tip info missing".into()))?;
        if cand_info.difficulty <= tip_info.difficulty {
            return Ok(false);
        }

        // walk the max-difficulty chain back to the current spine
        let mut path: Vec<BlockInfo> = Vec::new();
        let mut cursor = cand_info;
        let fork = loop {
            if cursor.on_main_chain() {
                break cursor;
            }
            let next = cursor.max_diff_link.ok_or_else(|| {
                ChainError::Reorg(format!(
                    "max-diff chain of {candidate} ends off the spine at {}",
                    cursor.hashlow
                ))
            })?;
            path.push(cursor);
            cursor = self
                .store
                .get_info(&next)?
                .ok_or_else(|| ChainError::Reorg(format!("max-diff link {next} missing")))?;
        };
        if path.is_empty() {
            return Ok(false);
        }

        let mut overlay: HashMap<Hash256, BlockInfo> = HashMap::new();
        let mut changes = ChangeSet::default();

        // revert the abandoned segment, fork.height+1 up to the old tip
        let old_tip_height = self.meta.tip_height;
        for height in fork.height + 1..=old_tip_height {
            let main_hashlow = self.store.main_hash_at(height)?.ok_or_else(|| {
                ChainError::Reorg(format!("height index has no main block at {height}"))
            })?;
            self.revert_main(height, main_hashlow, &mut overlay)?;
            changes.heights_delete.push(height);
        }

        // apply the new segment in ascending height order
        path.reverse();
        let mut height = fork.height;
        for step in &path {
            height += 1;
            self.apply_main(height, step.hashlow, &mut overlay)?;
            changes.heights_put.push((height, step.hashlow));
        }

        let reverted = old_tip_height.saturating_sub(fork.height);
        info!(
            tip = %candidate,
            height,
            reverted,
            applied = path.len(),
            "main chain advanced"
        );

        let mut meta = self.meta.clone();
        meta.tip_hashlow = candidate;
        meta.tip_height = height;
        changes.meta = Some(meta.clone());
        changes.infos = overlay.into_values().collect();
        self.store.commit(changes)?;
        self.meta = meta;
        if self.pretop == Some(candidate) {
            self.pretop = None;
        }
        Ok(true)
    }

    /// Takes `main_hashlow` off the main chain: gives back its settled fees,
    /// strips its coinbase, clears MAIN and marks UNWIND.
    fn revert_main(
        &self,
        height: u64,
        main_hashlow: Hash256,
        overlay: &mut HashMap<Hash256, BlockInfo>,
    ) -> ChainResult<()> {
        let fees = self.unsettle_fees(main_hashlow, overlay)?;
        let mut info = staged_info(&self.store, overlay, &main_hashlow)?;
        if !info.is_main() || info.height != height {
            return Err(ChainError::Reorg(format!(
                "block {main_hashlow} at height {height} is not the expected main block"
            )));
        }
        let reward = main_block_reward(height).saturating_add(fees);
        info.amount = info.amount.checked_sub(reward).ok_or_else(|| {
            ChainError::Reorg(format!("coinbase underflow reverting {main_hashlow}"))
        })?;
        info.flags.remove(BlockFlags::MAIN | BlockFlags::MAIN_CHAIN);
        info.flags.insert(BlockFlags::UNWIND);
        info.height = 0;
        overlay.insert(main_hashlow, info);
        Ok(())
    }

    /// Promotes a block to main at `height`: settles the fees of its
    /// unreferenced past, credits the coinbase and flags the spine bits.
    fn apply_main(
        &self,
        height: u64,
        main_hashlow: Hash256,
        overlay: &mut HashMap<Hash256, BlockInfo>,
    ) -> ChainResult<()> {
        let fees = self.settle_fees(main_hashlow, overlay)?;
        let mut info = staged_info(&self.store, overlay, &main_hashlow)?;
        let reward = main_block_reward(height).saturating_add(fees);
        info.amount = info.amount.saturating_add(reward);
        info.flags.insert(BlockFlags::MAIN | BlockFlags::MAIN_CHAIN);
        info.flags
            .remove(BlockFlags::UNWIND | BlockFlags::EXTRA | BlockFlags::PRETOP);
        info.height = height;
        overlay.insert(main_hashlow, info);
        Ok(())
    }

    /// Walks the link closure of the new main block, claiming every applied
    /// block not yet settled under a main block. Claimed blocks get MAIN_REF
    /// and `ref_link`; their fees accrue to the main block's reward.
    fn settle_fees(
        &self,
        main_hashlow: Hash256,
        overlay: &mut HashMap<Hash256, BlockInfo>,
    ) -> ChainResult<XAmount> {
        let mut fees = XAmount::ZERO;
        let mut visited: HashSet<Hash256> = HashSet::new();
        let mut stack = self.links_of(&main_hashlow)?;
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let mut info = staged_info(&self.store, overlay, &next)?;
            if !info.is_applied()
                || info.is_main()
                || info.on_main_chain()
                || info.flags.contains(BlockFlags::MAIN_REF)
            {
                continue;
            }
            info.flags.insert(BlockFlags::MAIN_REF);
            info.ref_link = Some(main_hashlow);
            fees = fees.saturating_add(info.fee);
            overlay.insert(next, info);
            stack.extend(self.links_of(&next)?);
        }
        Ok(fees)
    }

    /// Inverse of `settle_fees`: releases every block settled under
    /// `main_hashlow` and returns the fee total being handed back.
    fn unsettle_fees(
        &self,
        main_hashlow: Hash256,
        overlay: &mut HashMap<Hash256, BlockInfo>,
    ) -> ChainResult<XAmount> {
        let mut fees = XAmount::ZERO;
        let mut visited: HashSet<Hash256> = HashSet::new();
        let mut stack = self.links_of(&main_hashlow)?;
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let mut info = staged_info(&self.store, overlay, &next)?;
            if info.ref_link != Some(main_hashlow) || !info.flags.contains(BlockFlags::MAIN_REF) {
                continue;
            }
            info.flags.remove(BlockFlags::MAIN_REF);
            info.ref_link = None;
            fees = fees.saturating_add(info.fee);
            overlay.insert(next, info);
            stack.extend(self.links_of(&next)?);
        }
        Ok(fees)
    }

    fn links_of(&self, hashlow: &Hash256) -> ChainResult<Vec<Hash256>> {
        let block = self
            .store
            .get_block(hashlow)?
            .ok_or_else(|| ChainError::Reorg(format!("body missing for {hashlow}")))?;
        Ok(block.links().map(|(link, _)| link.link).collect())
    }
}

fn staged_info(
    store: &BlockStore,
    overlay: &HashMap<Hash256, BlockInfo>,
    hashlow: &Hash256,
) -> ChainResult<BlockInfo> {
    if let Some(info) = overlay.get(hashlow) {
        return Ok(info.clone());
    }
    store
        .get_info(hashlow)?
        .ok_or_else(|| ChainError::Reorg(format!("info missing for {hashlow}")))
}
