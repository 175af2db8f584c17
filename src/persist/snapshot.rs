//! Pure conversions between the in-memory `MarketLedger` and persisted snapshots.
//!
//! Nothing in here touches storage.

use crate::engine::ledger::MarketLedger;
use crate::engine::types::{MarketState, TradeSide};
use crate::persist::types::{LedgerOp, LedgerSnapshot, MarketRecord, PersistError, PersistResult, SNAPSHOT_SCHEMA_VERSION};

/// Capture every ledger row. `wal_high_watermark` must have been read from
/// the journal before this call, never after.
pub fn from_ledger(ledger: &MarketLedger, wal_high_watermark: u64) -> PersistResult<LedgerSnapshot> {
    let records = ledger.records()?.iter().map(MarketRecord::from).collect();
    Ok(LedgerSnapshot {
        version: SNAPSHOT_SCHEMA_VERSION,
        taken_at_unix: chrono::Utc::now().timestamp(),
        records,
        wal_high_watermark,
    })
}

/// Overwrite ledger rows from a snapshot. Prices are recomputed from stock
/// and demand rather than trusted from the file. Returns the rows restored.
pub fn apply_to_ledger(ledger: &MarketLedger, snap: &LedgerSnapshot) -> PersistResult<usize> {
    if snap.version != SNAPSHOT_SCHEMA_VERSION {
        return Err(PersistError::FormatMismatch { expected: SNAPSHOT_SCHEMA_VERSION, found: snap.version });
    }
    for record in &snap.records {
        ledger.restore_row(&MarketState::from(record))?;
    }
    Ok(snap.records.len())
}

/// Re-apply one journaled mutation during replay. Returns `false` when the
/// row already reflects it.
pub fn apply_op(ledger: &MarketLedger, op: &LedgerOp) -> PersistResult<bool> {
    let applied = match *op {
        LedgerOp::Buy { system, commodity, quantity, version } => {
            ledger.replay_trade(system, commodity, TradeSide::Buy, quantity, version)?
        }
        LedgerOp::Sell { system, commodity, quantity, version } => {
            ledger.replay_trade(system, commodity, TradeSide::Sell, quantity, version)?
        }
        LedgerOp::Reset { system, commodity, stock, demand, version } => {
            ledger.replay_reset(system, commodity, stock, demand, version)?
        }
    };
    Ok(applied)
}
