use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// A quantity of a product at its snapshotted unit price.
#[derive(Debug, Clone, Copy)]
pub struct PricingLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// The discount terms relevant to pricing, detached from rule bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct DiscountTerms {
    pub percentage: Decimal,
    pub max_amount: Decimal,
}

/// Flat-fee shipping with a free-shipping threshold on the net total.
#[derive(Debug, Clone, Copy)]
pub struct ShippingPolicy {
    pub flat_fee: Decimal,
    pub free_threshold: Decimal,
}

/// Result of pricing a set of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub gross_total: Decimal,
    pub discount_amount: Decimal,
    pub net_total: Decimal,
    pub shipping_fee: Decimal,
}

impl Totals {
    /// The amount actually charged: net total plus shipping.
    pub fn total_due(&self) -> Decimal {
        self.net_total + self.shipping_fee
    }
}

/// Computes gross, discount, net and shipping for a set of lines.
///
/// Pure and deterministic; called after every cart mutation and again at
/// checkout over the selected subset. Intermediate arithmetic is exact;
/// only the discount and net amounts are rounded, half-up at the minor unit.
pub fn compute_totals(
    lines: &[PricingLine],
    discount: Option<&DiscountTerms>,
    shipping: &ShippingPolicy,
) -> Totals {
    let gross_total: Decimal = lines
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum();

    let discount_amount = match discount {
        Some(terms) => {
            let raw = gross_total * terms.percentage / Decimal::from(100);
            round_money(raw.min(terms.max_amount))
                .min(terms.max_amount)
                .min(gross_total)
        }
        None => Decimal::ZERO,
    };

    let net_total = round_money((gross_total - discount_amount).max(Decimal::ZERO));

    let shipping_fee = if net_total > Decimal::ZERO && net_total < shipping.free_threshold {
        shipping.flat_fee
    } else {
        Decimal::ZERO
    };

    Totals {
        gross_total,
        discount_amount,
        net_total,
        shipping_fee,
    }
}

/// Rounds to two decimal places, half-up at the minor unit.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a money amount to minor units (cents/paisa) for the gateway.
pub fn to_minor_units(amount: Decimal) -> i64 {
    round_money(amount)
        .checked_mul(Decimal::from(100))
        .and_then(|v| v.to_i64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn policy() -> ShippingPolicy {
        ShippingPolicy {
            flat_fee: dec!(55),
            free_threshold: dec!(800),
        }
    }

    #[test]
    fn capped_discount_keeps_order_above_free_shipping() {
        // gross 1000, 20% capped at 150 -> net 850, free shipping
        let lines = [PricingLine {
            unit_price: dec!(500),
            quantity: 2,
        }];
        let terms = DiscountTerms {
            percentage: dec!(20),
            max_amount: dec!(150),
        };

        let totals = compute_totals(&lines, Some(&terms), &policy());
        assert_eq!(totals.gross_total, dec!(1000));
        assert_eq!(totals.discount_amount, dec!(150));
        assert_eq!(totals.net_total, dec!(850.00));
        assert_eq!(totals.shipping_fee, Decimal::ZERO);
        assert_eq!(totals.total_due(), dec!(850.00));
    }

    #[test]
    fn deep_discount_drops_below_threshold_and_pays_flat_fee() {
        // gross 1000, 50% capped at 1000 -> net 500, flat shipping applies
        let lines = [PricingLine {
            unit_price: dec!(500),
            quantity: 2,
        }];
        let terms = DiscountTerms {
            percentage: dec!(50),
            max_amount: dec!(1000),
        };

        let totals = compute_totals(&lines, Some(&terms), &policy());
        assert_eq!(totals.discount_amount, dec!(500));
        assert_eq!(totals.net_total, dec!(500.00));
        assert_eq!(totals.shipping_fee, dec!(55));
        assert_eq!(totals.total_due(), dec!(555.00));
    }

    #[test]
    fn no_discount_means_zero_discount_amount() {
        let lines = [PricingLine {
            unit_price: dec!(120.50),
            quantity: 3,
        }];
        let totals = compute_totals(&lines, None, &policy());
        assert_eq!(totals.gross_total, dec!(361.50));
        assert_eq!(totals.discount_amount, Decimal::ZERO);
        assert_eq!(totals.net_total, dec!(361.50));
        assert_eq!(totals.shipping_fee, dec!(55));
    }

    #[test]
    fn empty_lines_price_to_zero_with_no_shipping() {
        let totals = compute_totals(&[], None, &policy());
        assert_eq!(totals.gross_total, Decimal::ZERO);
        assert_eq!(totals.net_total, Decimal::ZERO);
        assert_eq!(totals.shipping_fee, Decimal::ZERO);
    }

    #[test]
    fn full_discount_clamps_net_at_zero() {
        let lines = [PricingLine {
            unit_price: dec!(100),
            quantity: 1,
        }];
        let terms = DiscountTerms {
            percentage: dec!(100),
            max_amount: dec!(10000),
        };
        let totals = compute_totals(&lines, Some(&terms), &policy());
        assert_eq!(totals.net_total, Decimal::ZERO);
        assert_eq!(totals.shipping_fee, Decimal::ZERO);
    }

    #[test]
    fn rounding_is_half_up_at_the_minor_unit() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
        // 33.333 * 15% = 4.99995 -> 5.00
        let lines = [PricingLine {
            unit_price: dec!(33.333),
            quantity: 1,
        }];
        let terms = DiscountTerms {
            percentage: dec!(15),
            max_amount: dec!(100),
        };
        let totals = compute_totals(&lines, Some(&terms), &policy());
        assert_eq!(totals.discount_amount, dec!(5.00));
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(850.00)), 85000);
        assert_eq!(to_minor_units(dec!(0.01)), 1);
        assert_eq!(to_minor_units(Decimal::ZERO), 0);
        assert_eq!(to_minor_units(dec!(555)), 55500);
    }

    proptest! {
        #[test]
        fn invariants_hold_for_arbitrary_carts(
            prices in proptest::collection::vec(1u32..=100_000, 0..8),
            quantities in proptest::collection::vec(1i32..=50, 0..8),
            percentage in 0u32..=100,
            cap_cents in 0u64..=1_000_000,
        ) {
            let lines: Vec<PricingLine> = prices
                .iter()
                .zip(quantities.iter())
                .map(|(&cents, &qty)| PricingLine {
                    unit_price: Decimal::from(cents) / Decimal::from(100),
                    quantity: qty,
                })
                .collect();
            let terms = DiscountTerms {
                percentage: Decimal::from(percentage),
                max_amount: Decimal::from(cap_cents) / Decimal::from(100),
            };

            let totals = compute_totals(&lines, Some(&terms), &policy());

            // net = max(gross - discount, 0), discount bounded by cap and gross
            prop_assert!(totals.discount_amount <= terms.max_amount);
            prop_assert!(totals.discount_amount <= totals.gross_total);
            prop_assert!(totals.net_total >= Decimal::ZERO);
            prop_assert_eq!(
                totals.net_total,
                round_money((totals.gross_total - totals.discount_amount).max(Decimal::ZERO))
            );
        }
    }
}
