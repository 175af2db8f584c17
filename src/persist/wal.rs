use serde::{Deserialize, Serialize};

use crate::persist::types::{LedgerOp, PersistError, PersistResult};

/// One line of the trade journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: u64,
    #[serde(flatten)]
    pub op: LedgerOp,
}

pub fn op_to_json(id: u64, op: &LedgerOp) -> PersistResult<String> {
    let entry = WalEntry { id, op: op.clone() };
    Ok(serde_json::to_string(&entry)?)
}

/// Parse one journal line. `line` is only used for error reporting.
pub fn op_from_json(s: &str, line: usize) -> PersistResult<WalEntry> {
    serde_json::from_str(s).map_err(|_| PersistError::CorruptWalRecord { line })
}
