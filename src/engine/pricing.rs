//! Stock/demand to price model shared by every buy and sell path.
//!
//! The model is pure integer arithmetic so that replaying the same sequence
//! of ledger mutations always produces the same prices.
//!
//! ```text
//! raw  = (base * DEPTH + demand) / (stock + DEPTH)      rounded half-up
//! buy  = clamp(raw, floor, ceiling)
//! sell = clamp(buy - ceil(buy * spread_bps / 10_000), floor, buy)
//! ```
//!
//! Stock drives the price. Demand only adds a premium of one credit per
//! `stock + DEPTH` units, so the demand left behind by a buy followed by a
//! sell of the same size (at most `qty / 2`, with `qty <= stock`) moves the
//! quote by less than one rounding unit.

use crate::engine::types::{Commodity, Quote};

/// Virtual stock held at base price. Larger values make prices react more
/// slowly to individual trades.
pub const MARKET_DEPTH: i64 = 450;

const BPS: i64 = 10_000;

pub fn compute_price(commodity: &Commodity, stock: i64, demand: i64) -> Quote {
    let floor = commodity.price_floor.max(1);
    let ceiling = commodity.price_ceiling.max(floor);

    let numerator = commodity.base_price as i128 * MARKET_DEPTH as i128 + demand.max(0) as i128;
    let denominator = stock.max(0) as i128 + MARKET_DEPTH as i128;
    let raw = (2 * numerator + denominator) / (2 * denominator);
    let buy = raw.clamp(floor as i128, ceiling as i128) as i64;

    let spread = (buy as i128 * commodity.spread_bps as i128 + (BPS as i128 - 1)) / BPS as i128;
    let sell = (buy - spread as i64).clamp(floor, buy);

    Quote { buy, sell }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{CommodityCategory, CommodityId};
    use proptest::prelude::*;

    fn food() -> Commodity {
        Commodity::new(CommodityId(1), "Food", CommodityCategory::Agricultural, 50)
    }

    #[test]
    fn test_balanced_market() {
        let quote = compute_price(&food(), 50, 20);
        assert_eq!(quote.buy, 45);
        // ceil(45 * 500 / 10000) = 3
        assert_eq!(quote.sell, 42);
    }

    #[test]
    fn test_scarcity_raises_price() {
        let before = compute_price(&food(), 50, 20);
        let after = compute_price(&food(), 40, 25);
        assert!(after.buy >= before.buy);
        assert_eq!(after.buy, 46);
    }

    #[test]
    fn test_glut_hits_floor() {
        let quote = compute_price(&food(), 1_000_000, 0);
        assert_eq!(quote.buy, 12);
        assert_eq!(quote.sell, 12);
    }

    #[test]
    fn test_shortage_hits_ceiling() {
        let quote = compute_price(&food(), 0, 1_000_000);
        assert_eq!(quote.buy, 200);
        assert_eq!(quote.sell, 190);
    }

    proptest! {
        #[test]
        fn prop_quote_within_bounds(
            base in 1i64..10_000,
            spread in 0u32..5_000,
            stock in 0i64..1_000_000,
            demand in 0i64..1_000_000,
        ) {
            let mut commodity = Commodity::new(CommodityId(9), "Any", CommodityCategory::Raw, base);
            commodity.spread_bps = spread;
            let quote = compute_price(&commodity, stock, demand);
            prop_assert!(quote.buy >= commodity.price_floor && quote.buy <= commodity.price_ceiling);
            prop_assert!(quote.sell >= commodity.price_floor && quote.sell <= commodity.price_ceiling);
            prop_assert!(quote.sell <= quote.buy);
        }

        #[test]
        fn prop_round_trip_demand_drift_stays_within_one_unit(
            base in 1i64..10_000,
            stock in 1i64..200_000,
            demand in 10i64..200_000,
            qty_seed in 0i64..200_000,
        ) {
            let mut commodity = food();
            commodity.base_price = base;
            commodity.price_floor = (base / 4).max(1);
            commodity.price_ceiling = base * 4;
            let qty = qty_seed % stock + 1;
            // Net demand change of a buy (+qty/2) then sell (-qty/3, floored) of the same size.
            let drifted = demand + qty / 2;
            let before = compute_price(&commodity, stock, demand);
            let after = compute_price(&commodity, stock, drifted);
            prop_assert!(after.buy - before.buy <= 1);
            prop_assert!(after.sell - before.sell <= 1);
        }

        #[test]
        fn prop_monotone_in_stock_and_demand(
            stock in 0i64..100_000,
            demand in 0i64..100_000,
            delta in 1i64..1_000,
        ) {
            let commodity = food();
            let base = compute_price(&commodity, stock, demand);
            prop_assert!(compute_price(&commodity, stock + delta, demand).buy <= base.buy);
            prop_assert!(compute_price(&commodity, stock, demand + delta).buy >= base.buy);
        }
    }
}
