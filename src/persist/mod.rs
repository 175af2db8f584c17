pub mod types;
pub use types::*;
pub mod snapshot;
pub mod wal;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::engine::ledger::MarketLedger;
use crate::persist::wal::{op_from_json, op_to_json};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(&self) -> PersistResult<Option<LedgerSnapshot>>;
    /// Stores the snapshot as given. Use [`checkpoint`] to take one from a live ledger.
    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> PersistResult<()>;
}

#[async_trait]
pub trait WalStore: Send + Sync {
    /// Returns the id assigned to the appended op. Ids start at 1.
    async fn append_op(&self, op: &LedgerOp) -> PersistResult<u64>;
    /// All ops with an id greater than `after`, in order.
    async fn relay_ops(&self, after: u64) -> PersistResult<Vec<(u64, LedgerOp)>>;
    async fn last_id(&self) -> PersistResult<u64>;
}

/// Process-local store, mainly for tests and the demo CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<LedgerSnapshot>>,
    ops: Mutex<Vec<(u64, LedgerOp)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_snapshot(&self) -> PersistResult<Option<LedgerSnapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> PersistResult<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl WalStore for MemoryStore {
    async fn append_op(&self, op: &LedgerOp) -> PersistResult<u64> {
        let mut ops = self.ops.lock();
        let id = ops.last().map(|(id, _)| id + 1).unwrap_or(1);
        ops.push((id, op.clone()));
        Ok(id)
    }

    async fn relay_ops(&self, after: u64) -> PersistResult<Vec<(u64, LedgerOp)>> {
        Ok(self.ops.lock().iter().filter(|(id, _)| *id > after).cloned().collect())
    }

    async fn last_id(&self) -> PersistResult<u64> {
        Ok(self.ops.lock().last().map(|(id, _)| *id).unwrap_or(0))
    }
}

const SNAPSHOT_FILE: &str = "ledger_snapshot.json";
const JOURNAL_FILE: &str = "ledger_journal.jsonl";

/// Snapshot as a JSON document plus an append-only JSON-lines journal, both in one directory.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    next_id: tokio::sync::Mutex<u64>,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> PersistResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let store = Self { dir, next_id: tokio::sync::Mutex::new(1) };
        let last = store.read_journal().await?.last().map(|(id, _)| *id).unwrap_or(0);
        *store.next_id.lock().await = last + 1;
        debug!(dir = %store.dir.display(), last_id = last, "Opened file store");
        Ok(store)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    async fn read_journal(&self) -> PersistResult<Vec<(u64, LedgerOp)>> {
        let contents = match tokio::fs::read_to_string(self.journal_path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| op_from_json(line, i + 1).map(|entry| (entry.id, entry.op)))
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load_snapshot(&self) -> PersistResult<Option<LedgerSnapshot>> {
        match tokio::fs::read(self.snapshot_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> PersistResult<()> {
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        tokio::fs::rename(&tmp, self.snapshot_path()).await?;
        Ok(())
    }
}

#[async_trait]
impl WalStore for JsonFileStore {
    async fn append_op(&self, op: &LedgerOp) -> PersistResult<u64> {
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        let mut line = op_to_json(id, op)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(self.journal_path()).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        *next_id += 1;
        Ok(id)
    }

    async fn relay_ops(&self, after: u64) -> PersistResult<Vec<(u64, LedgerOp)>> {
        Ok(self.read_journal().await?.into_iter().filter(|(id, _)| *id > after).collect())
    }

    async fn last_id(&self) -> PersistResult<u64> {
        Ok(*self.next_id.lock().await - 1)
    }
}

/// Snapshot a live ledger.
///
/// The watermark is read before the rows. Trades keep landing while rows are
/// copied, so a trade journaled after the watermark may already be in a row;
/// replay skips those by row version instead of applying them twice.
#[instrument(skip_all)]
pub async fn checkpoint(
    ledger: &MarketLedger,
    snapshots: &dyn SnapshotStore,
    journal: &dyn WalStore,
) -> PersistResult<LedgerSnapshot> {
    let watermark = journal.last_id().await?;
    let snap = snapshot::from_ledger(ledger, watermark)?;
    snapshots.save_snapshot(&snap).await?;
    info!(rows = snap.records.len(), watermark, "Saved ledger snapshot");
    Ok(snap)
}

/// Load the latest snapshot into `ledger` and replay the journal written after it.
/// Returns the number of ops actually applied.
#[instrument(skip_all)]
pub async fn restore(ledger: &MarketLedger, snapshots: &dyn SnapshotStore, journal: &dyn WalStore) -> PersistResult<usize> {
    let watermark = match snapshots.load_snapshot().await? {
        Some(snap) => {
            let rows = snapshot::apply_to_ledger(ledger, &snap)?;
            info!(rows, watermark = snap.wal_high_watermark, "Restored ledger snapshot");
            snap.wal_high_watermark
        }
        None => {
            info!("No snapshot found, replaying the full journal");
            0
        }
    };

    let mut ops = journal.relay_ops(watermark).await?;
    // Concurrent trades can reach the journal out of version order.
    ops.sort_by_key(|(id, op)| (op.row(), op.version(), *id));

    let mut applied = 0;
    for (_, op) in &ops {
        if snapshot::apply_op(ledger, op)? {
            applied += 1;
        }
    }
    info!(applied, skipped = ops.len() - applied, "Journal replay finished");
    Ok(applied)
}
