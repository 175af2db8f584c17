use ahash::AHashMap;
use tracing::{debug, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{StarSystem, SystemId};

pub const MIN_JUMP_COST: u32 = 5;
pub const MAX_JUMP_COST: u32 = 50;
pub const DEFAULT_JUMP_COST: u32 = 10;

pub const MIN_TRAVEL_TIME: u32 = 10;
pub const MAX_TRAVEL_TIME: u32 = 50;
pub const DEFAULT_TRAVEL_TIME: u32 = 30;

/// Static graph of star systems and their jump lanes.
#[derive(Debug, Clone)]
pub struct StarMap {
    systems: AHashMap<SystemId, StarSystem>,
    ids: Vec<SystemId>,
}

impl StarMap {
    #[instrument(skip(systems), fields(count = systems.len()))]
    pub fn new(systems: Vec<StarSystem>) -> EngineResult<Self> {
        let mut index = AHashMap::with_capacity(systems.len());
        for system in systems {
            index.insert(system.id, system);
        }

        for system in index.values() {
            if let Some(missing) = system.neighbors.iter().find(|n| !index.contains_key(n)) {
                return Err(EngineError::SystemNotFound(*missing));
            }
        }

        let mut ids: Vec<SystemId> = index.keys().copied().collect();
        ids.sort();
        debug!(systems = ids.len(), "Built star map");
        Ok(Self { systems: index, ids })
    }

    pub fn system(&self, id: SystemId) -> Option<&StarSystem> {
        self.systems.get(&id)
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.systems.contains_key(&id)
    }

    /// All system ids in ascending order.
    pub fn system_ids(&self) -> &[SystemId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn neighbors(&self, id: SystemId) -> &[SystemId] {
        self.systems.get(&id).map(|s| s.neighbors.as_slice()).unwrap_or(&[])
    }

    pub fn distance(&self, a: SystemId, b: SystemId) -> Option<f64> {
        self.distance_squared(a, b).map(f64::sqrt)
    }

    fn distance_squared(&self, a: SystemId, b: SystemId) -> Option<f64> {
        let from = self.systems.get(&a)?;
        let to = self.systems.get(&b)?;
        Some(from.position.distance_squared(&to.position))
    }

    /// Fuel units for one jump. Scales with the squared lane length.
    pub fn jump_cost(&self, a: SystemId, b: SystemId) -> u32 {
        match self.distance_squared(a, b) {
            Some(d2) => jump_cost_for(d2),
            None => DEFAULT_JUMP_COST,
        }
    }

    /// Time ticks for one jump.
    pub fn travel_time(&self, a: SystemId, b: SystemId) -> u32 {
        match self.distance_squared(a, b) {
            Some(d2) => travel_time_for(d2),
            None => DEFAULT_TRAVEL_TIME,
        }
    }
}

pub fn jump_cost_for(distance_squared: f64) -> u32 {
    let raw = (distance_squared / 100.0).floor();
    raw.clamp(MIN_JUMP_COST as f64, MAX_JUMP_COST as f64) as u32
}

pub fn travel_time_for(distance_squared: f64) -> u32 {
    let raw = 10.0 + (distance_squared / 200.0).floor();
    raw.clamp(MIN_TRAVEL_TIME as f64, MAX_TRAVEL_TIME as f64) as u32
}
