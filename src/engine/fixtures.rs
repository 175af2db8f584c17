//! Small hand-built universes shared by the engine tests.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::ledger::{LedgerSettings, MarketLedger};
use crate::engine::star_map::StarMap;
use crate::engine::types::{Commodity, CommodityCategory, CommodityId, Position, StarSystem, SystemId};

pub const FOOD: CommodityId = CommodityId(1);
pub const ORE: CommodityId = CommodityId(2);
pub const NARCOTICS: CommodityId = CommodityId(3);

pub fn system(id: u32, x: f64, y: f64, neighbors: &[u32]) -> StarSystem {
    StarSystem {
        id: SystemId(id),
        name: format!("S{id}"),
        position: Position::new(x, y),
        neighbors: neighbors.iter().map(|n| SystemId(*n)).collect(),
        tech_level: 3,
    }
}

pub fn catalog() -> Vec<Commodity> {
    let mut narcotics = Commodity::new(NARCOTICS, "Narcotics", CommodityCategory::Contraband, 300);
    narcotics.banned_at = vec![SystemId(4)];
    vec![
        Commodity::new(FOOD, "Food", CommodityCategory::Agricultural, 50),
        Commodity::new(ORE, "Ore", CommodityCategory::Raw, 80),
        narcotics,
    ]
}

/// Five systems in a line, 30 units apart: 1 - 2 - 3 - 4 - 5.
///
/// Food costs 45 everywhere except system 4 (sells for 82) and system 5
/// (sells for 82, but four jumps from system 1). Ore and Narcotics are flat,
/// except Narcotics would pay off at system 4 where it is banned.
pub fn line_universe() -> (Arc<StarMap>, Arc<MarketLedger>) {
    let map = StarMap::new(vec![
        system(1, 0.0, 0.0, &[2]),
        system(2, 30.0, 0.0, &[1, 3]),
        system(3, 60.0, 0.0, &[2, 4]),
        system(4, 90.0, 0.0, &[3, 5]),
        system(5, 120.0, 0.0, &[4]),
    ])
    .unwrap();

    let settings = LedgerSettings { row_lock_timeout: Duration::from_secs(1), ..LedgerSettings::default() };
    let mut ledger = MarketLedger::new(catalog(), settings);
    for id in 1..=5 {
        let system = SystemId(id);
        let (food_stock, food_demand) = if id >= 4 { (10, 17_500) } else { (50, 20) };
        ledger.seed_row(system, FOOD, food_stock, food_demand).unwrap();
        ledger.seed_row(system, ORE, 400, 40).unwrap();
        let (narc_stock, narc_demand) = if id == 4 { (5, 400) } else { (100, 20) };
        ledger.seed_row(system, NARCOTICS, narc_stock, narc_demand).unwrap();
    }
    (Arc::new(map), Arc::new(ledger))
}

/// Two disconnected pairs: 1 - 2 and 3 - 4.
pub fn split_map() -> StarMap {
    StarMap::new(vec![
        system(1, 0.0, 0.0, &[2]),
        system(2, 10.0, 0.0, &[1]),
        system(3, 100.0, 0.0, &[4]),
        system(4, 110.0, 0.0, &[3]),
    ])
    .unwrap()
}
