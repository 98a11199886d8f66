//! Currency arithmetic on caller-supplied amounts.
//!
//! Prices and quantities have no upper bound, so every operation that can
//! leave `Decimal`'s range is checked and reported as
//! [`EngineError::AmountOverflow`] instead of panicking.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::EngineError;

/// Rounds a currency amount to cents, half away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub(crate) fn add(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, EngineError> {
    a.checked_add(b).ok_or(EngineError::AmountOverflow(what))
}

pub(crate) fn sub(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, EngineError> {
    a.checked_sub(b).ok_or(EngineError::AmountOverflow(what))
}

/// `amount * percent / 100`. The rate is taken first so that a large amount
/// only overflows when the result itself does not fit.
pub(crate) fn percent_of(
    amount: Decimal,
    percent: Decimal,
    what: &'static str,
) -> Result<Decimal, EngineError> {
    amount
        .checked_mul(percent / Decimal::ONE_HUNDRED)
        .ok_or(EngineError::AmountOverflow(what))
}

/// Sums amounts, failing on the first overflow.
pub(crate) fn sum<'a>(
    amounts: impl IntoIterator<Item = &'a Decimal>,
    what: &'static str,
) -> Result<Decimal, EngineError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| add(acc, *amount, what))
}
