//! Business settings, read as raw key/value maps and parsed into typed values.
//!
//! Every numeric setting arrives as a string. A missing or unparsable value
//! falls back to its default; only structural problems (an unknown commission
//! model, inverted tier thresholds) are rejected.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;
use crate::tier::PurchaseTier;

pub type SettingsMap = HashMap<String, String>;

/// Category of the tier-scoped settings rows.
pub const TIERS_CATEGORY: &str = "tiers";
/// Category of everything else.
pub const GENERAL_CATEGORY: &str = "general";

pub const KEY_GATEWAY_FEE_PERCENT: &str = "gateway_fee_percent";
pub const KEY_COMMISSION_MODEL: &str = "commission_model";
pub const KEY_UNLOCK_THRESHOLD: &str = "referral_unlock_threshold";
pub const KEY_LEVEL1_PERCENT: &str = "level1_commission_percent";
pub const KEY_LEVEL2TO8_PERCENT: &str = "level2to8_commission_percent";
pub const KEY_OPTION1_LEVEL1_PERCENT: &str = "option1_level1_commission_percent";
pub const KEY_OPTION1_LEVEL2TO8_PERCENT: &str = "option1_level2to8_commission_percent";
pub const KEY_TIER2_MIN_PURCHASE: &str = "tier2_min_purchase";
pub const KEY_TIER3_MIN_PURCHASE: &str = "tier3_min_purchase";
pub const KEY_TIER1_DISCOUNT_PERCENT: &str = "tier1_discount_percent";
pub const KEY_TIER2_MAX_DISCOUNT_PERCENT: &str = "tier2_max_discount_percent";
pub const KEY_TIER3_DISCOUNT_PERCENT: &str = "tier3_discount_percent";

/// The raw settings as read from the settings store.
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    /// Uncategorized keys.
    pub general: SettingsMap,
    /// Keys stored under the `tiers` category.
    pub tiers: SettingsMap,
}

impl SettingsSnapshot {
    fn general(&self, key: &str) -> Option<&str> {
        self.general.get(key).map(String::as_str)
    }

    /// Tier-scoped keys may also be stored uncategorized.
    fn tiered(&self, key: &str) -> Option<&str> {
        self.tiers
            .get(key)
            .or_else(|| self.general.get(key))
            .map(String::as_str)
    }
}

/// How an already unlocked buyer's purchases are commissioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionModel {
    /// Dedicated flat percentages for subsequent purchases.
    Option1,
    /// Percentages keyed by the buyer's current tier.
    Option2,
}

impl FromStr for CommissionModel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "option1" => Ok(CommissionModel::Option1),
            "option2" => Ok(CommissionModel::Option2),
            other => Err(EngineError::Settings(format!(
                "unknown commission model {:?}",
                other
            ))),
        }
    }
}

/// The percentage paid to the direct referrer and to each of levels 2 to 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelPercentages {
    pub level1: Decimal,
    pub level2to8: Decimal,
}

impl LevelPercentages {
    pub fn new(level1: Decimal, level2to8: Decimal) -> Self {
        Self { level1, level2to8 }
    }

    /// The percentage paid at `level` (1-based).
    pub fn for_level(&self, level: usize) -> Decimal {
        if level == 1 { self.level1 } else { self.level2to8 }
    }
}

/// Unlock threshold, tier boundaries and discount rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierSettings {
    pub unlock_threshold: Decimal,
    pub tier2_min_purchase: Decimal,
    pub tier3_min_purchase: Decimal,
    pub tier1_discount_percent: Decimal,
    pub tier2_max_discount_percent: Decimal,
    pub tier3_discount_percent: Decimal,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            unlock_threshold: Decimal::from(5000),
            tier2_min_purchase: Decimal::from(5000),
            tier3_min_purchase: Decimal::from(10000),
            tier1_discount_percent: Decimal::from(15),
            tier2_max_discount_percent: Decimal::from(30),
            tier3_discount_percent: Decimal::from(30),
        }
    }
}

/// Typed settings for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommissionSettings {
    pub gateway_fee_percent: Decimal,
    pub commission_model: CommissionModel,
    /// Scenario A percentages.
    pub flat: LevelPercentages,
    /// Scenario B under `option1`; absent until provisioned.
    pub option1_subsequent: Option<LevelPercentages>,
    /// Scenario B under `option2`, indexed by tier.
    pub tiered: [LevelPercentages; 3],
    pub tiers: TierSettings,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        let flat = LevelPercentages::new(Decimal::from(30), Decimal::from(5));
        Self {
            gateway_fee_percent: Decimal::from(3),
            commission_model: CommissionModel::Option2,
            flat,
            option1_subsequent: None,
            tiered: [flat; 3],
            tiers: TierSettings::default(),
        }
    }
}

impl CommissionSettings {
    /// Parses a raw snapshot, read once per unit of work.
    pub fn from_snapshot(snapshot: &SettingsSnapshot) -> Result<Self, EngineError> {
        let defaults = Self::default();

        let commission_model = match snapshot.general(KEY_COMMISSION_MODEL) {
            Some(raw) => raw.parse()?,
            None => defaults.commission_model,
        };

        let flat = LevelPercentages::new(
            decimal_or(snapshot.general(KEY_LEVEL1_PERCENT), KEY_LEVEL1_PERCENT, defaults.flat.level1),
            decimal_or(
                snapshot.general(KEY_LEVEL2TO8_PERCENT),
                KEY_LEVEL2TO8_PERCENT,
                defaults.flat.level2to8,
            ),
        );

        let option1_subsequent = match (
            parse_decimal(snapshot.general(KEY_OPTION1_LEVEL1_PERCENT), KEY_OPTION1_LEVEL1_PERCENT),
            parse_decimal(
                snapshot.general(KEY_OPTION1_LEVEL2TO8_PERCENT),
                KEY_OPTION1_LEVEL2TO8_PERCENT,
            ),
        ) {
            (Some(level1), Some(level2to8)) => Some(LevelPercentages::new(level1, level2to8)),
            _ => None,
        };

        let mut tiered = [flat; 3];
        for tier in PurchaseTier::ALL {
            let n = tier.number();
            let l1_key = format!("tier{n}_level1_commission_percent");
            let l2_key = format!("tier{n}_level2to8_commission_percent");
            tiered[tier.index()] = LevelPercentages::new(
                decimal_or(snapshot.tiered(&l1_key), &l1_key, flat.level1),
                decimal_or(snapshot.tiered(&l2_key), &l2_key, flat.level2to8),
            );
        }

        let d = &defaults.tiers;
        let tiers = TierSettings {
            unlock_threshold: decimal_or(
                snapshot.general(KEY_UNLOCK_THRESHOLD),
                KEY_UNLOCK_THRESHOLD,
                d.unlock_threshold,
            ),
            tier2_min_purchase: decimal_or(
                snapshot.tiered(KEY_TIER2_MIN_PURCHASE),
                KEY_TIER2_MIN_PURCHASE,
                d.tier2_min_purchase,
            ),
            tier3_min_purchase: decimal_or(
                snapshot.tiered(KEY_TIER3_MIN_PURCHASE),
                KEY_TIER3_MIN_PURCHASE,
                d.tier3_min_purchase,
            ),
            tier1_discount_percent: decimal_or(
                snapshot.tiered(KEY_TIER1_DISCOUNT_PERCENT),
                KEY_TIER1_DISCOUNT_PERCENT,
                d.tier1_discount_percent,
            ),
            tier2_max_discount_percent: decimal_or(
                snapshot.tiered(KEY_TIER2_MAX_DISCOUNT_PERCENT),
                KEY_TIER2_MAX_DISCOUNT_PERCENT,
                d.tier2_max_discount_percent,
            ),
            tier3_discount_percent: decimal_or(
                snapshot.tiered(KEY_TIER3_DISCOUNT_PERCENT),
                KEY_TIER3_DISCOUNT_PERCENT,
                d.tier3_discount_percent,
            ),
        };

        if tiers.tier3_min_purchase <= tiers.tier2_min_purchase {
            return Err(EngineError::Settings(format!(
                "{} ({}) must be greater than {} ({})",
                KEY_TIER3_MIN_PURCHASE,
                tiers.tier3_min_purchase,
                KEY_TIER2_MIN_PURCHASE,
                tiers.tier2_min_purchase
            )));
        }

        Ok(Self {
            gateway_fee_percent: decimal_or(
                snapshot.general(KEY_GATEWAY_FEE_PERCENT),
                KEY_GATEWAY_FEE_PERCENT,
                defaults.gateway_fee_percent,
            ),
            commission_model,
            flat,
            option1_subsequent,
            tiered,
            tiers,
        })
    }

    /// Scenario B percentages for a buyer currently in `tier`.
    pub fn subsequent_percentages(&self, tier: PurchaseTier) -> Result<LevelPercentages, EngineError> {
        match self.commission_model {
            CommissionModel::Option2 => Ok(self.tiered[tier.index()]),
            CommissionModel::Option1 => self.option1_subsequent.ok_or_else(|| {
                EngineError::Settings(format!(
                    "commission model option1 requires {} and {}",
                    KEY_OPTION1_LEVEL1_PERCENT, KEY_OPTION1_LEVEL2TO8_PERCENT
                ))
            }),
        }
    }
}

fn parse_decimal(raw: Option<&str>, key: &str) -> Option<Decimal> {
    let raw = raw?;
    match Decimal::from_str(raw.trim()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = raw, error = %e, "unparsable setting, using default");
            None
        }
    }
}

fn decimal_or(raw: Option<&str>, key: &str, default: Decimal) -> Decimal {
    parse_decimal(raw, key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_map(pairs: &[(&str, &str)]) -> SettingsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn snapshot(general: &[(&str, &str)], tiers: &[(&str, &str)]) -> SettingsSnapshot {
        SettingsSnapshot {
            general: to_map(general),
            tiers: to_map(tiers),
        }
    }

    #[test]
    fn empty_snapshot_yields_defaults() {
        let settings = CommissionSettings::from_snapshot(&SettingsSnapshot::default()).unwrap();
        assert_eq!(settings, CommissionSettings::default());
        assert_eq!(settings.gateway_fee_percent, Decimal::from(3));
        assert_eq!(settings.flat, LevelPercentages::new(Decimal::from(30), Decimal::from(5)));
        assert_eq!(settings.tiers.unlock_threshold, Decimal::from(5000));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let s = snapshot(&[(KEY_GATEWAY_FEE_PERCENT, "three"), (KEY_LEVEL1_PERCENT, " 25 ")], &[]);
        let settings = CommissionSettings::from_snapshot(&s).unwrap();
        assert_eq!(settings.gateway_fee_percent, Decimal::from(3));
        assert_eq!(settings.flat.level1, Decimal::from(25));
    }

    #[test]
    fn tier_table_reads_tier_category() {
        let s = snapshot(
            &[],
            &[
                ("tier3_level1_commission_percent", "20"),
                ("tier3_level2to8_commission_percent", "2.5"),
            ],
        );
        let settings = CommissionSettings::from_snapshot(&s).unwrap();
        let t3 = settings.subsequent_percentages(PurchaseTier::Tier3).unwrap();
        assert_eq!(t3, LevelPercentages::new(Decimal::from(20), Decimal::new(25, 1)));
        // tiers without their own entries inherit the flat table
        let t2 = settings.subsequent_percentages(PurchaseTier::Tier2).unwrap();
        assert_eq!(t2, settings.flat);
    }

    #[test]
    fn option1_without_its_table_is_rejected_at_use() {
        let s = snapshot(&[(KEY_COMMISSION_MODEL, "option1")], &[]);
        let settings = CommissionSettings::from_snapshot(&s).unwrap();
        let err = settings.subsequent_percentages(PurchaseTier::Tier3).unwrap_err();
        assert!(matches!(err, EngineError::Settings(_)));
    }

    #[test]
    fn option1_with_its_table() {
        let s = snapshot(
            &[
                (KEY_COMMISSION_MODEL, "Option1"),
                (KEY_OPTION1_LEVEL1_PERCENT, "12"),
                (KEY_OPTION1_LEVEL2TO8_PERCENT, "2"),
            ],
            &[],
        );
        let settings = CommissionSettings::from_snapshot(&s).unwrap();
        assert_eq!(
            settings.subsequent_percentages(PurchaseTier::Tier2).unwrap(),
            LevelPercentages::new(Decimal::from(12), Decimal::from(2))
        );
    }

    #[test]
    fn unknown_model_and_inverted_thresholds_are_errors() {
        let s = snapshot(&[(KEY_COMMISSION_MODEL, "option9")], &[]);
        assert!(CommissionSettings::from_snapshot(&s).is_err());

        let s = snapshot(&[], &[(KEY_TIER2_MIN_PURCHASE, "10000"), (KEY_TIER3_MIN_PURCHASE, "10000")]);
        assert!(matches!(
            CommissionSettings::from_snapshot(&s),
            Err(EngineError::Settings(_))
        ));
    }
}
