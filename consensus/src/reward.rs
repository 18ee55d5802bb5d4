use xdag_core::XAmount;

/// Main blocks earning the full initial reward.
pub const INITIAL_SCHEDULE_LEN: u64 = 1_017_323;

/// Halving period after the initial schedule runs out.
pub const HALVING_PERIOD: u64 = 2_097_152;

/// Reward of the first schedule, 1024 XDAG.
pub const INITIAL_REWARD: XAmount = XAmount::of_xdag(1024);

/// Coinbase reward for the main block at `height`. Height 0 is the genesis
/// spine root and earns nothing.
pub fn main_block_reward(height: u64) -> XAmount {
    if height == 0 {
        return XAmount::ZERO;
    }
    if height <= INITIAL_SCHEDULE_LEN {
        return INITIAL_REWARD;
    }
    let halvings = 1 + (height - INITIAL_SCHEDULE_LEN - 1) / HALVING_PERIOD;
    INITIAL_REWARD.halved(halvings)
}

/// Total coinbase issued for a chain whose tip is at `tip_height`.
pub fn supply_at(tip_height: u64) -> XAmount {
    (1..=tip_height).map(main_block_reward).sum()
}
