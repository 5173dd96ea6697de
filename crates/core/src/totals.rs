//! Order totals arithmetic shared by purchases and invoices.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::money::{Money, Percent};

/// Order-level charges and reductions applied on top of the line subtotal.
///
/// Tax and discount can each be given as a rate or an explicit amount; a
/// non-zero explicit amount wins over the rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustments {
    pub tax_rate: Option<Percent>,
    pub tax_amount: Option<Money>,
    pub discount_rate: Option<Percent>,
    pub discount_amount: Option<Money>,
    pub shipping_cost: Option<Money>,
}

impl Adjustments {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(rate) = self.tax_rate {
            rate.ensure_at_most_hundred("tax rate")?;
        }
        if let Some(rate) = self.discount_rate {
            rate.ensure_at_most_hundred("discount rate")?;
        }
        for (field, amount) in [
            ("tax amount", self.tax_amount),
            ("discount amount", self.discount_amount),
            ("shipping cost", self.shipping_cost),
        ] {
            if amount.is_some_and(Money::is_negative) {
                return Err(DomainError::validation(format!("{field} cannot be negative")));
            }
        }
        Ok(())
    }
}

/// Derived monetary totals, fixed at order creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax_rate: Percent,
    pub tax_amount: Money,
    pub discount_rate: Percent,
    pub discount_amount: Money,
    pub shipping_cost: Money,
    pub total_amount: Money,
}

impl OrderTotals {
    /// `total = subtotal + tax - discount + shipping`.
    pub fn compute(subtotal: Money, adjustments: &Adjustments) -> DomainResult<Self> {
        adjustments.validate()?;

        let tax_rate = adjustments.tax_rate.unwrap_or(Percent::ZERO);
        let tax_amount = match adjustments.tax_amount {
            Some(amount) if !amount.is_zero() => amount,
            _ => subtotal.percent(tax_rate),
        };

        let discount_rate = adjustments.discount_rate.unwrap_or(Percent::ZERO);
        let discount_amount = match adjustments.discount_amount {
            Some(amount) if !amount.is_zero() => amount,
            _ => subtotal.percent(discount_rate),
        };

        let shipping_cost = adjustments.shipping_cost.unwrap_or(Money::ZERO);
        let total_amount = subtotal
            .checked_add(tax_amount)
            .and_then(|t| t.checked_sub(discount_amount))
            .and_then(|t| t.checked_add(shipping_cost))
            .ok_or_else(|| DomainError::validation("order total overflows"))?;
        if total_amount.is_negative() {
            return Err(DomainError::validation(format!(
                "order total cannot be negative (computed {total_amount})"
            )));
        }

        Ok(Self {
            subtotal,
            tax_rate,
            tax_amount,
            discount_rate,
            discount_amount,
            shipping_cost,
            total_amount,
        })
    }
}

/// `quantity * unit_price - discount`, validated.
pub fn line_total(quantity: i64, unit_price: Money, discount: Money) -> DomainResult<Money> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    if unit_price.is_negative() {
        return Err(DomainError::validation("unit price cannot be negative"));
    }
    if discount.is_negative() {
        return Err(DomainError::validation("line discount cannot be negative"));
    }
    let gross = unit_price
        .checked_mul_qty(quantity)
        .ok_or_else(|| DomainError::validation("line amount overflows"))?;
    if discount > gross {
        return Err(DomainError::validation(format!(
            "line discount ({discount}) exceeds line amount ({gross})"
        )));
    }
    Ok(gross - discount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_style_amounts() {
        // Scenario C: 5 @ 10 + 3 @ 20
        let subtotal = line_total(5, Money::from_units(10), Money::ZERO).unwrap()
            + line_total(3, Money::from_units(20), Money::ZERO).unwrap();
        let totals = OrderTotals::compute(
            subtotal,
            &Adjustments {
                tax_amount: Some(Money::from_units(5)),
                discount_amount: Some(Money::from_units(2)),
                shipping_cost: Some(Money::from_units(7)),
                ..Adjustments::default()
            },
        )
        .unwrap();
        assert_eq!(totals.subtotal, Money::from_units(110));
        assert_eq!(totals.total_amount, Money::from_units(120));
    }

    #[test]
    fn invoice_style_rates() {
        let totals = OrderTotals::compute(
            Money::from_units(200),
            &Adjustments {
                tax_rate: Some(Percent::whole(18)),
                discount_rate: Some(Percent::whole(5)),
                ..Adjustments::default()
            },
        )
        .unwrap();
        assert_eq!(totals.tax_amount, Money::from_units(36));
        assert_eq!(totals.discount_amount, Money::from_units(10));
        assert_eq!(totals.total_amount, Money::from_units(226));
    }

    #[test]
    fn explicit_discount_wins_over_rate() {
        let totals = OrderTotals::compute(
            Money::from_units(100),
            &Adjustments {
                discount_rate: Some(Percent::whole(50)),
                discount_amount: Some(Money::from_units(3)),
                ..Adjustments::default()
            },
        )
        .unwrap();
        assert_eq!(totals.discount_amount, Money::from_units(3));
        assert_eq!(totals.total_amount, Money::from_units(97));
    }

    #[test]
    fn negative_total_is_rejected() {
        let err = OrderTotals::compute(
            Money::from_units(10),
            &Adjustments {
                discount_amount: Some(Money::from_units(11)),
                ..Adjustments::default()
            },
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn oversized_charges_are_rejected_not_wrapped() {
        let err = OrderTotals::compute(
            Money::from_units(10),
            &Adjustments {
                shipping_cost: Some(Money::from_cents(i64::MAX)),
                ..Adjustments::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, DomainError::validation("order total overflows"));

        let err = OrderTotals::compute(
            Money::from_cents(i64::MAX - 5),
            &Adjustments {
                tax_amount: Some(Money::from_units(1)),
                ..Adjustments::default()
            },
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn line_total_rejects_bad_input() {
        assert!(line_total(0, Money::from_units(1), Money::ZERO).is_err());
        assert!(line_total(1, Money::from_cents(-1), Money::ZERO).is_err());
        assert!(line_total(1, Money::from_units(1), Money::from_units(2)).is_err());
        assert_eq!(
            line_total(3, Money::from_units(10), Money::from_units(5)).unwrap(),
            Money::from_units(25)
        );
    }
}
