//! Referral chains: a user's ancestor referrers, nearest first, cut off at
//! depth eight.

use serde::Serialize;

use crate::types::UserId;

/// Number of ancestor levels that can earn commission.
pub const CHAIN_DEPTH: usize = 8;

/// The ordered ancestors of one user. `levels[0]` is the direct referrer
/// (level 1), `levels[7]` is level 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferralChain {
    pub user_id: UserId,
    pub levels: [Option<UserId>; CHAIN_DEPTH],
}

impl ReferralChain {
    /// The chain of a user who registered without a referrer.
    pub fn root(user_id: UserId) -> Self {
        Self {
            user_id,
            levels: [None; CHAIN_DEPTH],
        }
    }

    /// Builds the chain of `user_id`, referred by the owner of
    /// `referrer_chain`: the referrer becomes level 1 and every ancestor of the
    /// referrer moves down one level. The referrer's level 8 falls off.
    pub fn descend_from(user_id: UserId, referrer_chain: &ReferralChain) -> Self {
        let mut levels = [None; CHAIN_DEPTH];
        levels[0] = Some(referrer_chain.user_id);
        levels[1..].copy_from_slice(&referrer_chain.levels[..CHAIN_DEPTH - 1]);
        Self { user_id, levels }
    }

    /// Rebuilds a chain from stored levels. Missing trailing levels are empty,
    /// extra levels are ignored.
    pub fn from_levels(user_id: UserId, stored: &[Option<UserId>]) -> Self {
        let mut levels = [None; CHAIN_DEPTH];
        for (slot, value) in levels.iter_mut().zip(stored) {
            *slot = *value;
        }
        Self { user_id, levels }
    }

    /// The direct referrer.
    pub fn referrer(&self) -> Option<UserId> {
        self.levels[0]
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }

    /// Populated `(level, ancestor)` pairs, levels numbered from 1.
    pub fn ancestors(&self) -> impl Iterator<Item = (usize, UserId)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|id| (i + 1, id)))
    }
}
