use std::collections::{HashMap, HashSet};
use xdag_core::{Block, Hash256};

/// How long a parked block may wait for its links before it is discarded.
pub const ORPHAN_TTL_MS: u64 = 10 * 60 * 1_000;

struct OrphanEntry {
    block: Block,
    missing: HashSet<Hash256>,
    parked_at: u64,
}

/// Blocks whose links are not yet all resolvable, keyed by each missing
/// dependency. The pool owns its blocks until they re-enter the admission
/// pipeline; entries expire after [`ORPHAN_TTL_MS`] to bound memory.
#[derive(Default)]
pub struct OrphanPool {
    entries: HashMap<Hash256, OrphanEntry>,
    waiting_on: HashMap<Hash256, Vec<Hash256>>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hashlow: &Hash256) -> bool {
        self.entries.contains_key(hashlow)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parks a block under each of its missing dependencies.
    pub fn park(&mut self, block: Block, missing: Vec<Hash256>, now_ms: u64) {
        let hashlow = block.hashlow();
        if self.entries.contains_key(&hashlow) {
            return;
        }
        for dep in &missing {
            self.waiting_on.entry(*dep).or_default().push(hashlow);
        }
        self.entries.insert(
            hashlow,
            OrphanEntry {
                block,
                missing: missing.into_iter().collect(),
                parked_at: now_ms,
            },
        );
    }

    /// Called when `dep` becomes available; returns every block whose last
    /// missing dependency this was. Returned blocks leave the pool.
    pub fn release(&mut self, dep: &Hash256) -> Vec<Block> {
        let Some(waiters) = self.waiting_on.remove(dep) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        for waiter in waiters {
            let Some(entry) = self.entries.get_mut(&waiter) else {
                continue;
            };
            entry.missing.remove(dep);
            if entry.missing.is_empty() {
                let entry = self.entries.remove(&waiter).expect("entry checked above");
                ready.push(entry.block);
            }
        }
        ready
    }

    /// Drops entries older than the TTL; returns how many were discarded.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let dead: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.parked_at) >= ORPHAN_TTL_MS)
            .map(|(h, _)| *h)
            .collect();
        for hashlow in &dead {
            if let Some(entry) = self.entries.remove(hashlow) {
                for dep in entry.missing {
                    if let Some(waiters) = self.waiting_on.get_mut(&dep) {
                        waiters.retain(|w| w != hashlow);
                        if waiters.is_empty() {
                            self.waiting_on.remove(&dep);
                        }
                    }
                }
            }
        }
        dead.len()
    }
}
