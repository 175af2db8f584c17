use std::sync::Arc;

use itertools::Itertools;
use pathfinding::prelude::dijkstra;
use tracing::{debug, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::star_map::StarMap;
use crate::engine::types::{NavigationPath, SystemId};

/// Minimum-fuel navigation over the jump lanes.
#[derive(Debug, Clone)]
pub struct NavigationPlanner {
    map: Arc<StarMap>,
}

impl NavigationPlanner {
    pub fn new(map: Arc<StarMap>) -> Self {
        Self { map }
    }

    #[instrument(skip(self))]
    pub fn plan_route(&self, from: SystemId, to: SystemId) -> EngineResult<NavigationPath> {
        for id in [from, to] {
            if !self.map.contains(id) {
                return Err(EngineError::SystemNotFound(id));
            }
        }

        let (waypoints, fuel_required) = dijkstra(
            &from,
            |current| {
                self.map
                    .neighbors(*current)
                    .iter()
                    .map(|next| (*next, self.map.jump_cost(*current, *next)))
                    .collect_vec()
            },
            |current| *current == to,
        )
        .ok_or(EngineError::NoPath { from, to })?;

        let (total_distance, travel_time) = waypoints.iter().tuple_windows().fold((0.0, 0u32), |(distance, time), (a, b)| {
            (distance + self.map.distance(*a, *b).unwrap_or(0.0), time + self.map.travel_time(*a, *b))
        });

        let path = NavigationPath {
            total_jumps: (waypoints.len() - 1) as u32,
            waypoints,
            total_distance,
            fuel_required,
            travel_time,
        };
        debug!(jumps = path.total_jumps, fuel = path.fuel_required, "Planned route");
        Ok(path)
    }
}
