use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::engine::ledger::{LedgerSettings, DEFAULT_DEMAND_FLOOR};
use crate::engine::routes::SearchBudget;
use crate::engine::types::RouteOptions;

pub const ENV_PREFIX: &str = "STARTRADE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub max_jumps: u32,
    pub cargo_capacity: i64,
    pub min_roi: f64,
    pub limit: usize,
    /// Time box for universe-wide searches.
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub seed: u64,
    pub systems: u32,
    pub width: f64,
    pub height: f64,
    pub links_per_system: usize,
}

impl UniverseConfig {
    /// Star positions are drawn from `[0, width) x [0, height)`, so both
    /// extents must be positive and finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.systems == 0 {
            return Err(ConfigError::Message("universe.systems must be at least 1".into()));
        }
        for (name, extent) in [("width", self.width), ("height", self.height)] {
            if !extent.is_finite() || extent <= 0.0 {
                return Err(ConfigError::Message(format!("universe.{name} must be positive, got {extent}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub demand_floor: i64,
    pub row_lock_timeout_ms: u64,
    pub data_dir: String,
    /// Only used with the `metrics-exporter` feature.
    pub metrics_port: u16,
    pub routes: RouteConfig,
    pub universe: UniverseConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            demand_floor: DEFAULT_DEMAND_FLOOR,
            row_lock_timeout_ms: 50,
            data_dir: "data".to_string(),
            metrics_port: 9000,
            routes: RouteConfig { max_jumps: 3, cargo_capacity: 20, min_roi: 0.0, limit: 10, deadline_ms: 250 },
            universe: UniverseConfig { seed: 7, systems: 40, width: 1000.0, height: 1000.0, links_per_system: 3 },
        }
    }
}

impl EngineConfig {
    /// Defaults, then the optional file, then `STARTRADE__*` environment variables
    /// (e.g. `STARTRADE__ROUTES__MAX_JUMPS=4`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg: EngineConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.universe.validate()?;
        Ok(cfg)
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            demand_floor: self.demand_floor,
            row_lock_timeout: Duration::from_millis(self.row_lock_timeout_ms),
        }
    }

    pub fn route_options(&self) -> RouteOptions {
        RouteOptions {
            max_jumps: self.routes.max_jumps,
            cargo_capacity: self.routes.cargo_capacity,
            min_roi: self.routes.min_roi,
            limit: self.routes.limit,
        }
    }

    /// Fresh budget for one universe-wide search.
    pub fn search_budget(&self) -> SearchBudget {
        SearchBudget::with_timeout(Duration::from_millis(self.routes.deadline_ms))
    }
}
