use crate::hash::Hash256;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Chain counters exchanged between peers.
///
/// `n*` fields count what this node holds; `total_*` track the network-wide
/// maxima learned from peers and drive the sync decision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdagStats {
    pub nblocks: u64,
    pub total_nblocks: u64,
    pub nmain: u64,
    pub total_nmain: u64,
    pub tip_diff: U256,
    pub tip_hashlow: Hash256,
}

impl XdagStats {
    /// Folds a remote report in, keeping every total at its observed maximum.
    pub fn merge_remote(&mut self, remote: &XdagStats) {
        self.total_nblocks = self
            .total_nblocks
            .max(remote.total_nblocks)
            .max(remote.nblocks);
        self.total_nmain = self.total_nmain.max(remote.total_nmain).max(remote.nmain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_maxima() {
        let mut local = XdagStats {
            nblocks: 10,
            total_nblocks: 10,
            nmain: 4,
            total_nmain: 4,
            ..Default::default()
        };
        let remote = XdagStats {
            nblocks: 50,
            total_nblocks: 60,
            nmain: 20,
            total_nmain: 20,
            ..Default::default()
        };
        local.merge_remote(&remote);
        assert_eq!(local.total_nblocks, 60);
        assert_eq!(local.total_nmain, 20);
        // local holdings are untouched
        assert_eq!(local.nblocks, 10);
        assert_eq!(local.nmain, 4);
    }
}
