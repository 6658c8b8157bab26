//! Cost calculator (C5) — a pure function from usage counts and a price
//! record to a charged cost. Generalizes the teacher's hardcoded
//! per-model `estimate_cost` match arms (`anthropic.rs`, `openai.rs`)
//! into one function over a `PriceData` value, using `rust_decimal` for
//! arbitrary-precision arithmetic instead of the teacher's `f64`.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::models::{PriceData, UsageCounts};

const COST_SCALE: u32 = 15;

/// `calc(usage, price, multiplier)`. Deterministic and side-effect free:
/// byte-equal output across runs for the same inputs (§8 invariant 4).
pub fn calculate_cost(usage: &UsageCounts, price: &PriceData, multiplier: Decimal) -> Decimal {
    let cache_create_rate = price
        .cache_create_cost_per_token
        .unwrap_or(price.input_cost_per_token * dec!(1.1));
    let cache_read_rate = price
        .cache_read_cost_per_token
        .unwrap_or(price.output_cost_per_token * dec!(0.1));

    let input_cost = Decimal::from(usage.input_tokens) * price.input_cost_per_token;
    let output_cost = Decimal::from(usage.output_tokens) * price.output_cost_per_token;
    let cache_create_cost = Decimal::from(usage.cache_create_tokens) * cache_create_rate;
    let cache_read_cost = Decimal::from(usage.cache_read_tokens) * cache_read_rate;

    let total = (input_cost + output_cost + cache_create_cost + cache_read_cost) * multiplier;
    total.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(input: Decimal, output: Decimal) -> PriceData {
        PriceData {
            input_cost_per_token: input,
            output_cost_per_token: output,
            cache_create_cost_per_token: None,
            cache_read_cost_per_token: None,
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let usage = UsageCounts {
            input_tokens: 1000,
            output_tokens: 500,
            cache_create_tokens: 0,
            cache_read_tokens: 0,
        };
        let p = price(dec!(0.000003), dec!(0.000015));
        let a = calculate_cost(&usage, &p, Decimal::ONE);
        let b = calculate_cost(&usage, &p, Decimal::ONE);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_rates_default_relative_to_input_output() {
        let usage = UsageCounts {
            input_tokens: 0,
            output_tokens: 0,
            cache_create_tokens: 1000,
            cache_read_tokens: 1000,
        };
        let p = price(dec!(0.000003), dec!(0.000015));
        let cost = calculate_cost(&usage, &p, Decimal::ONE);
        // cache_create defaults to 1.1x input, cache_read to 0.1x output
        let expected = (Decimal::from(1000u64) * dec!(0.000003) * dec!(1.1))
            + (Decimal::from(1000u64) * dec!(0.000015) * dec!(0.1));
        let expected = expected.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero);
        assert_eq!(cost, expected);
    }

    #[test]
    fn multiplier_scales_total_linearly() {
        let usage = UsageCounts {
            input_tokens: 1000,
            output_tokens: 0,
            cache_create_tokens: 0,
            cache_read_tokens: 0,
        };
        let p = price(dec!(0.000003), dec!(0.000015));
        let base = calculate_cost(&usage, &p, Decimal::ONE);
        let doubled = calculate_cost(&usage, &p, dec!(2.0));
        assert_eq!(doubled, base * dec!(2.0));
    }

    #[test]
    fn zero_usage_is_zero_cost() {
        let usage = UsageCounts::default();
        let p = price(dec!(0.000003), dec!(0.000015));
        assert_eq!(calculate_cost(&usage, &p, Decimal::ONE), Decimal::ZERO);
    }
}
