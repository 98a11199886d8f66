//! Purchase tiers and the one-way referral unlock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::money;
use crate::settings::TierSettings;
use crate::types::{User, UserId};

/// Prefix of every issued referral code.
pub const REFERRAL_CODE_PREFIX: &str = "REF";
const REFERRAL_CODE_HASH_LEN: usize = 8;

/// Purchase-volume bracket, serialized as 1, 2 or 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub enum PurchaseTier {
    Tier1,
    Tier2,
    Tier3,
}

impl PurchaseTier {
    pub const ALL: [PurchaseTier; 3] = [PurchaseTier::Tier1, PurchaseTier::Tier2, PurchaseTier::Tier3];

    /// The tier a lifetime total falls into.
    pub fn for_total(total_purchase_amount: Decimal, settings: &TierSettings) -> Self {
        if total_purchase_amount >= settings.tier3_min_purchase {
            PurchaseTier::Tier3
        } else if total_purchase_amount >= settings.tier2_min_purchase {
            PurchaseTier::Tier2
        } else {
            PurchaseTier::Tier1
        }
    }

    pub fn number(self) -> u8 {
        match self {
            PurchaseTier::Tier1 => 1,
            PurchaseTier::Tier2 => 2,
            PurchaseTier::Tier3 => 3,
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl From<PurchaseTier> for u8 {
    fn from(tier: PurchaseTier) -> u8 {
        tier.number()
    }
}

/// Outcome of adding one purchase to a user's lifetime total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseRecord {
    /// Lifetime total including this purchase.
    pub new_total: Decimal,
    pub tier_before: PurchaseTier,
    pub tier_after: PurchaseTier,
    /// True only on the purchase that flips `referral_unlocked`.
    pub just_unlocked: bool,
    /// Issued on unlock, then kept for good.
    pub referral_code: Option<String>,
}

/// Adds `purchase_amount` to the user's lifetime total and applies the unlock
/// transition. The caller persists `user` afterwards, under the same lock it
/// was read with.
///
/// `purchase_amount` must already exclude shipping and tax.
pub fn record_purchase(
    user: &mut User,
    purchase_amount: Decimal,
    settings: &TierSettings,
    now: DateTime<Utc>,
) -> Result<PurchaseRecord, EngineError> {
    if purchase_amount < Decimal::ZERO {
        return Err(EngineError::InvalidPurchaseAmount(purchase_amount));
    }

    let tier_before = PurchaseTier::for_total(user.total_purchase_amount, settings);
    let new_total = money::add(user.total_purchase_amount, purchase_amount, "purchase total")?;
    let tier_after = PurchaseTier::for_total(new_total, settings);

    let just_unlocked = !user.referral_unlocked && new_total >= settings.unlock_threshold;

    user.total_purchase_amount = new_total;
    user.referral_unlocked = user.referral_unlocked || just_unlocked;
    if user.referral_unlocked && user.referral_code.is_none() {
        user.referral_code = Some(referral_code_for(user.id, now));
    }
    let referral_code = user.referral_code.clone();

    Ok(PurchaseRecord {
        new_total,
        tier_before,
        tier_after,
        just_unlocked,
        referral_code,
    })
}

/// Derives a referral code from the user id and issue time. Collisions are
/// possible in principle; the store's unique index is the final arbiter.
pub fn referral_code_for(user_id: UserId, issued_at: DateTime<Utc>) -> String {
    let nanos = issued_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| issued_at.timestamp_micros());
    let digest = Sha256::digest(format!("{user_id}:{nanos}").as_bytes());
    let hex = format!("{:x}", digest);
    format!(
        "{}{}",
        REFERRAL_CODE_PREFIX,
        hex[..REFERRAL_CODE_HASH_LEN].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn fresh_user() -> User {
        User::new(7, None, at(0))
    }

    #[test]
    fn tier_boundaries() {
        let s = TierSettings::default();
        assert_eq!(PurchaseTier::for_total(Decimal::from(4999), &s), PurchaseTier::Tier1);
        assert_eq!(PurchaseTier::for_total(Decimal::from(5000), &s), PurchaseTier::Tier2);
        assert_eq!(PurchaseTier::for_total(Decimal::new(999999, 2), &s), PurchaseTier::Tier2);
        assert_eq!(PurchaseTier::for_total(Decimal::from(10000), &s), PurchaseTier::Tier3);
    }

    #[test]
    fn crossing_the_threshold_unlocks_once() {
        let s = TierSettings::default();
        let mut user = fresh_user();

        let first = record_purchase(&mut user, Decimal::from(3000), &s, at(1)).unwrap();
        assert!(!first.just_unlocked);
        assert!(!user.referral_unlocked);
        assert_eq!(first.tier_after, PurchaseTier::Tier1);

        let second = record_purchase(&mut user, Decimal::from(2000), &s, at(2)).unwrap();
        assert!(second.just_unlocked);
        assert!(user.referral_unlocked);
        assert_eq!(second.tier_before, PurchaseTier::Tier1);
        assert_eq!(second.tier_after, PurchaseTier::Tier2);

        for i in 0..5 {
            let later = record_purchase(&mut user, Decimal::from(100), &s, at(3 + i)).unwrap();
            assert!(!later.just_unlocked);
            assert!(user.referral_unlocked);
        }
        assert_eq!(user.total_purchase_amount, Decimal::from(5500));
    }

    #[test]
    fn referral_code_is_issued_once_on_unlock() {
        let s = TierSettings::default();
        let mut user = fresh_user();
        let locked = record_purchase(&mut user, Decimal::from(10), &s, at(1)).unwrap();
        assert_eq!(locked.referral_code, None);

        let first = record_purchase(&mut user, Decimal::from(5000), &s, at(2)).unwrap();
        let second = record_purchase(&mut user, Decimal::from(10), &s, at(99)).unwrap();
        let code = first.referral_code.unwrap();
        assert_eq!(second.referral_code.as_deref(), Some(code.as_str()));
        assert!(code.starts_with(REFERRAL_CODE_PREFIX));
        assert_eq!(code.len(), REFERRAL_CODE_PREFIX.len() + 8);
    }

    #[test]
    fn referral_code_derivation_is_deterministic() {
        assert_eq!(referral_code_for(1, at(42)), referral_code_for(1, at(42)));
        assert_ne!(referral_code_for(1, at(42)), referral_code_for(2, at(42)));
    }

    #[test]
    fn negative_amount_is_rejected_without_mutation() {
        let mut user = fresh_user();
        let err = record_purchase(&mut user, Decimal::from(-1), &TierSettings::default(), at(1));
        assert!(matches!(err, Err(EngineError::InvalidPurchaseAmount(_))));
        assert_eq!(user, fresh_user());
    }

    #[test]
    fn lifetime_total_overflow_leaves_user_untouched() {
        let mut user = fresh_user();
        user.total_purchase_amount = Decimal::MAX;
        let before = user.clone();
        let err = record_purchase(&mut user, Decimal::ONE, &TierSettings::default(), at(1));
        assert!(matches!(err, Err(EngineError::AmountOverflow(_))));
        assert_eq!(user, before);
    }
}
