//! Fixed-point monetary amounts and percentage rates.
//!
//! All ledger arithmetic is done on integer cents. Rates are stored in
//! hundredths of a percent, so `12.5%` is `Percent(1250)`.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Monetary amount in the smallest currency unit (cents).
///
/// Signed so that balance deltas and drift reports can be expressed directly.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole currency units (e.g. `Money::from_units(10)` is 10.00).
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Price times quantity, `None` on overflow.
    pub fn checked_mul_qty(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Sum of caller-supplied amounts, `None` on overflow.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// `self - other`, floored at zero.
    pub fn saturating_sub_floor(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }

    /// Apply a percentage, rounding half away from zero to the cent.
    pub fn percent(self, rate: Percent) -> Money {
        let scaled = self.0 as i128 * rate.basis_points() as i128;
        let divisor = Percent::SCALE as i128;
        let quotient = scaled / divisor;
        let remainder = scaled % divisor;
        let rounded = if remainder.abs() * 2 >= divisor {
            quotient + scaled.signum()
        } else {
            quotient
        };
        Money(rounded as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parses decimal strings such as `"12"`, `"12.5"`, `"-0.01"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cents = parse_fixed(s.trim(), 2)
            .ok_or_else(|| DomainError::validation(format!("invalid money amount: {s:?}")))?;
        Ok(Money(cents))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

/// A percentage stored in hundredths of a percent (basis points of 1%).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(u32);

impl ValueObject for Percent {}

impl Percent {
    pub const ZERO: Percent = Percent(0);

    /// 100% expressed in the internal scale.
    const SCALE: u32 = 10_000;

    pub const fn from_basis_points(bp: u32) -> Self {
        Self(bp)
    }

    pub const fn whole(percent: u32) -> Self {
        Self(percent * 100)
    }

    pub const fn basis_points(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Rates above 100% make no sense for tax or discount.
    pub fn ensure_at_most_hundred(self, field: &str) -> Result<(), DomainError> {
        if self.0 > Self::SCALE {
            return Err(DomainError::validation(format!(
                "{field} cannot exceed 100%"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Percent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_end_matches('%');
        let bp = parse_fixed(raw, 2)
            .filter(|v| *v >= 0 && *v <= u32::MAX as i64)
            .ok_or_else(|| DomainError::validation(format!("invalid percentage: {s:?}")))?;
        Ok(Percent(bp as u32))
    }
}

/// Parse a decimal string into an integer scaled by `10^scale`.
///
/// Rejects more fractional digits than `scale`.
fn parse_fixed(s: &str, scale: u32) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > scale as usize {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let int_value: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut frac_value: i64 = if frac_part.is_empty() { 0 } else { frac_part.parse().ok()? };
    for _ in frac_part.len()..scale as usize {
        frac_value *= 10;
    }
    let factor = 10i64.checked_pow(scale)?;
    let magnitude = int_value.checked_mul(factor)?.checked_add(frac_value)?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_cents(100_000).to_string(), "1000.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-50).to_string(), "-0.50");
    }

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_cents(1200));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!("0.01".parse::<Money>().unwrap(), Money::from_cents(1));
        assert_eq!("-3.10".parse::<Money>().unwrap(), Money::from_cents(-310));
        assert!("1.234".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        // 18% of 0.25 = 0.045 -> 0.05
        assert_eq!(Money::from_cents(25).percent(Percent::whole(18)), Money::from_cents(5));
        // 18% of 0.22 = 0.0396 -> 0.04
        assert_eq!(Money::from_cents(22).percent(Percent::whole(18)), Money::from_cents(4));
        // 12.5% of 110.00 = 13.75
        assert_eq!(
            Money::from_units(110).percent(Percent::from_basis_points(1250)),
            Money::from_cents(1375)
        );
        assert_eq!(Money::from_cents(-25).percent(Percent::whole(18)), Money::from_cents(-5));
    }

    #[test]
    fn checked_sum_reports_overflow() {
        let near_max = Money::from_cents(i64::MAX - 1);
        assert_eq!(Money::checked_sum([near_max, near_max]), None);
        assert_eq!(Money::checked_sum([]), Some(Money::ZERO));
        assert_eq!(near_max.checked_sub(Money::from_cents(-2)), None);
    }

    #[test]
    fn percent_parses_and_displays() {
        let p: Percent = "12.5".parse().unwrap();
        assert_eq!(p, Percent::from_basis_points(1250));
        assert_eq!(p.to_string(), "12.50%");
        assert_eq!("18%".parse::<Percent>().unwrap(), Percent::whole(18));
        assert!("-1".parse::<Percent>().is_err());
        assert!(Percent::whole(101).ensure_at_most_hundred("tax_rate").is_err());
    }

    proptest! {
        /// Property: summing cents never drifts, regardless of order.
        #[test]
        fn sum_is_exact(amounts in prop::collection::vec(0i64..10_000_000i64, 0..50)) {
            let total: Money = amounts.iter().map(|c| Money::from_cents(*c)).sum();
            prop_assert_eq!(total.cents(), amounts.iter().sum::<i64>());
        }

        /// Property: the checked sum agrees with `Sum` whenever it succeeds.
        #[test]
        fn checked_sum_matches_sum(amounts in prop::collection::vec(0i64..10_000_000i64, 0..50)) {
            let money: Vec<Money> = amounts.iter().map(|c| Money::from_cents(*c)).collect();
            let expected: Money = money.iter().sum();
            prop_assert_eq!(Money::checked_sum(money), Some(expected));
        }

        /// Property: display then parse is the identity.
        #[test]
        fn display_parse_identity(cents in -10_000_000i64..10_000_000i64) {
            let m = Money::from_cents(cents);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }
    }
}
