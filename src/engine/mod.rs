pub mod types;          // ids, systems, commodities, market rows, route results
pub mod error;          // EngineError and retry classification
pub mod star_map;       // immutable graph + jump cost / travel time
pub mod pricing;        // integer quote from stock and demand
pub mod ledger;         // per-row locked market state
pub mod routes;         // bounded trade route search
pub mod navigation;     // cheapest jump path between two systems
pub mod saga;           // compensating steps for multi-party trades
pub mod executor;       // buy / sell against the ledger, accounts and holds

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{EngineError, EngineResult};
pub use executor::{PlayerAccounts, ShipHolds, TradeExecutor};
pub use ledger::{LedgerSettings, MarketLedger};
pub use navigation::NavigationPlanner;
pub use routes::{CancelFlag, RouteFinder, SearchBudget};
pub use star_map::StarMap;
