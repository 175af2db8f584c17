use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::error::EngineError;
use crate::engine::types::{CommodityId, MarketState, SystemId};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot schema mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: u32, found: u32 },

    #[error("corrupt journal record at line {line}")]
    CorruptWalRecord { line: usize },

    #[error("ledger rejected persisted state: {0}")]
    Engine(#[from] EngineError),
}

pub type PersistResult<T> = Result<T, PersistError>;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// One persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub system_id: u32,
    pub commodity_id: u32,
    pub stock: i64,
    pub demand: i64,
    pub buy_price: i64,
    pub sell_price: i64,
    pub last_update_unix: i64,
    /// Row version at capture time. Journal ops at or below it are already in the row.
    #[serde(default)]
    pub version: u64,
}

impl From<&MarketState> for MarketRecord {
    fn from(state: &MarketState) -> Self {
        Self {
            system_id: state.system.0,
            commodity_id: state.commodity.0,
            stock: state.stock,
            demand: state.demand,
            buy_price: state.buy_price,
            sell_price: state.sell_price,
            last_update_unix: state.last_update_unix,
            version: state.version,
        }
    }
}

impl From<&MarketRecord> for MarketState {
    fn from(record: &MarketRecord) -> Self {
        Self {
            system: SystemId(record.system_id),
            commodity: CommodityId(record.commodity_id),
            stock: record.stock,
            demand: record.demand,
            buy_price: record.buy_price,
            sell_price: record.sell_price,
            last_update_unix: record.last_update_unix,
            version: record.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub taken_at_unix: i64,
    pub records: Vec<MarketRecord>,
    /// Journal id read before the rows were captured. Every op at or below it
    /// is in `records`; ops above it may or may not be, which replay sorts out
    /// by row version.
    pub wal_high_watermark: u64,
}

/// Ledger mutation as written to the trade journal.
///
/// `version` is the row version the mutation produced. Lines written before
/// versions existed read as 0 and always replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
    Buy {
        system: SystemId,
        commodity: CommodityId,
        quantity: i64,
        #[serde(default)]
        version: u64,
    },
    Sell {
        system: SystemId,
        commodity: CommodityId,
        quantity: i64,
        #[serde(default)]
        version: u64,
    },
    Reset {
        system: SystemId,
        commodity: CommodityId,
        stock: i64,
        demand: i64,
        #[serde(default)]
        version: u64,
    },
}

impl LedgerOp {
    pub fn row(&self) -> (SystemId, CommodityId) {
        match *self {
            LedgerOp::Buy { system, commodity, .. }
            | LedgerOp::Sell { system, commodity, .. }
            | LedgerOp::Reset { system, commodity, .. } => (system, commodity),
        }
    }

    pub fn version(&self) -> u64 {
        match *self {
            LedgerOp::Buy { version, .. } | LedgerOp::Sell { version, .. } | LedgerOp::Reset { version, .. } => version,
        }
    }
}
