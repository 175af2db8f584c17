//! Seeded universe generation.
//!
//! The layout (positions, tech levels, jump lanes) and the opening markets draw
//! from separate RNG streams derived from one seed, so retuning market seeding
//! never moves a star.

use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, instrument};

use crate::config::UniverseConfig;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{LedgerSettings, MarketLedger};
use crate::engine::star_map::StarMap;
use crate::engine::types::{Commodity, CommodityCategory, CommodityId, Position, StarSystem, SystemId};

const LAYOUT_STREAM: u64 = 1;
const MARKET_STREAM: u64 = 2;

/// Systems at or above this tech level ban contraband.
pub const CONTRABAND_BAN_TECH: u8 = 6;
pub const MAX_TECH_LEVEL: u8 = 8;

const SYLLABLES: [&str; 16] = [
    "al", "be", "cor", "da", "en", "fa", "gi", "ho", "ix", "ka", "lu", "mor", "na", "or", "qua", "zen",
];

pub struct Universe {
    pub map: Arc<StarMap>,
    pub ledger: Arc<MarketLedger>,
}

fn stream(seed: u64, index: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ index.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Standard trade goods. Contraband bans are filled in per generated map.
pub fn default_catalog() -> Vec<Commodity> {
    use CommodityCategory::*;
    [
        ("Food", Agricultural, 50),
        ("Water", Agricultural, 30),
        ("Textiles", Industrial, 80),
        ("Ore", Raw, 60),
        ("Minerals", Raw, 120),
        ("Machinery", Industrial, 250),
        ("Electronics", Technology, 400),
        ("Medicine", Technology, 320),
        ("Luxuries", Luxury, 600),
        ("Narcotics", Contraband, 900),
        ("Weapons", Contraband, 700),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (name, category, base))| Commodity::new(CommodityId(i as u32 + 1), name, category, base))
    .collect()
}

/// Whether a system of `tech` level is a net producer of `category`.
fn produces(category: CommodityCategory, tech: u8) -> bool {
    match category {
        CommodityCategory::Agricultural => tech <= 3,
        CommodityCategory::Raw => tech <= 4,
        CommodityCategory::Industrial => (4..=6).contains(&tech),
        CommodityCategory::Technology => tech >= 6,
        CommodityCategory::Luxury => tech >= 5,
        CommodityCategory::Contraband => tech <= 2,
    }
}

fn system_name(rng: &mut StdRng, id: u32) -> String {
    let parts = rng.gen_range(2..=3);
    let mut name: String = (0..parts).map(|_| SYLLABLES[rng.gen_range(0..SYLLABLES.len())]).collect();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    format!("{name}-{id}")
}

fn layout(cfg: &UniverseConfig) -> Vec<StarSystem> {
    let mut rng = stream(cfg.seed, LAYOUT_STREAM);
    let mut systems: Vec<StarSystem> = (1..=cfg.systems)
        .map(|id| StarSystem {
            id: SystemId(id),
            name: system_name(&mut rng, id),
            position: Position::new(rng.gen_range(0.0..cfg.width), rng.gen_range(0.0..cfg.height)),
            neighbors: Vec::new(),
            tech_level: rng.gen_range(1..=MAX_TECH_LEVEL),
        })
        .collect();

    let mut lanes: BTreeSet<(usize, usize)> = BTreeSet::new();
    for i in 0..systems.len() {
        let by_distance: Vec<usize> = (0..systems.len())
            .filter(|&j| j != i)
            .sorted_by(|&a, &b| {
                let da = systems[i].position.distance_squared(&systems[a].position);
                let db = systems[i].position.distance_squared(&systems[b].position);
                da.total_cmp(&db).then(a.cmp(&b))
            })
            .collect();

        for &j in by_distance.iter().take(cfg.links_per_system) {
            lanes.insert((i.min(j), i.max(j)));
        }
        // Tie each system to the nearest earlier one so the whole map is one component.
        if let Some(&j) = by_distance.iter().find(|&&j| j < i) {
            lanes.insert((j, i));
        }
    }

    for (a, b) in lanes {
        let (id_a, id_b) = (systems[a].id, systems[b].id);
        systems[a].neighbors.push(id_b);
        systems[b].neighbors.push(id_a);
    }
    for system in &mut systems {
        system.neighbors.sort();
    }
    systems
}

/// Build the star map and an opening ledger for every (system, commodity) pair.
#[instrument(skip_all, fields(seed = cfg.seed, systems = cfg.systems))]
pub fn generate(cfg: &UniverseConfig, settings: LedgerSettings) -> EngineResult<Universe> {
    cfg.validate().map_err(|e| EngineError::InvalidUniverse(e.to_string()))?;
    let systems = layout(cfg);

    let mut catalog = default_catalog();
    for commodity in catalog.iter_mut().filter(|c| c.category == CommodityCategory::Contraband) {
        commodity.banned_at =
            systems.iter().filter(|s| s.tech_level >= CONTRABAND_BAN_TECH).map(|s| s.id).collect();
    }

    let mut rng = stream(cfg.seed, MARKET_STREAM);
    let mut ledger = MarketLedger::new(catalog.clone(), settings);
    for system in &systems {
        for commodity in &catalog {
            let (stock, demand) = if produces(commodity.category, system.tech_level) {
                (rng.gen_range(200..=500), rng.gen_range(10..=60))
            } else {
                (rng.gen_range(5..=80), rng.gen_range(80..=300))
            };
            ledger.seed_row(system.id, commodity.id, stock, demand)?;
        }
    }

    let map = StarMap::new(systems)?;
    info!(systems = map.len(), rows = ledger.row_count(), "Generated universe");
    Ok(Universe { map: Arc::new(map), ledger: Arc::new(ledger) })
}
