use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::pricing::compute_price;
use crate::engine::types::{Commodity, CommodityId, Fill, MarketState, SystemId, TradeSide};

pub const DEFAULT_DEMAND_FLOOR: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSettings {
    pub demand_floor: i64,
    pub row_lock_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self { demand_floor: DEFAULT_DEMAND_FLOOR, row_lock_timeout: Duration::from_millis(50) }
    }
}

type RowKey = (SystemId, CommodityId);

/// Per (system, commodity) market state.
///
/// Every row sits behind its own mutex and the row index is fixed once the
/// ledger is shared, so mutations on different rows never contend and there
/// is no lock covering the whole ledger.
#[derive(Debug)]
pub struct MarketLedger {
    catalog: Vec<Commodity>,
    catalog_index: AHashMap<CommodityId, usize>,
    rows: AHashMap<RowKey, Mutex<MarketState>>,
    settings: LedgerSettings,
}

impl MarketLedger {
    pub fn new(mut catalog: Vec<Commodity>, settings: LedgerSettings) -> Self {
        catalog.sort_by_key(|c| c.id);
        let catalog_index = catalog.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        Self { catalog, catalog_index, rows: AHashMap::new(), settings }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Commodities in ascending id order.
    pub fn commodities(&self) -> &[Commodity] {
        &self.catalog
    }

    pub fn commodity(&self, id: CommodityId) -> Option<&Commodity> {
        self.catalog_index.get(&id).map(|i| &self.catalog[*i])
    }

    pub fn commodity_by_name(&self, name: &str) -> Option<&Commodity> {
        self.catalog.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_system(&self, system: SystemId) -> bool {
        self.catalog.iter().any(|c| self.rows.contains_key(&(system, c.id)))
    }

    /// Create (or overwrite) a row before the ledger is shared.
    pub fn seed_row(&mut self, system: SystemId, commodity: CommodityId, stock: i64, demand: i64) -> EngineResult<()> {
        let state = self.fresh_state(system, commodity, stock, demand, now_unix(), 0)?;
        self.rows.insert((system, commodity), Mutex::new(state));
        Ok(())
    }

    fn fresh_state(
        &self,
        system: SystemId,
        commodity: CommodityId,
        stock: i64,
        demand: i64,
        last_update_unix: i64,
        version: u64,
    ) -> EngineResult<MarketState> {
        let item = self.commodity(commodity).ok_or(EngineError::CommodityNotFound(commodity))?;
        let stock = stock.max(0);
        let demand = demand.max(self.settings.demand_floor);
        let quote = compute_price(item, stock, demand);
        Ok(MarketState {
            system,
            commodity,
            stock,
            demand,
            buy_price: quote.buy,
            sell_price: quote.sell,
            last_update_unix,
            version,
        })
    }

    fn row(&self, system: SystemId, commodity: CommodityId) -> EngineResult<&Mutex<MarketState>> {
        match self.rows.get(&(system, commodity)) {
            Some(row) => Ok(row),
            None if self.commodity(commodity).is_none() => Err(EngineError::CommodityNotFound(commodity)),
            None => Err(EngineError::SystemNotFound(system)),
        }
    }

    fn with_row<T>(
        &self,
        system: SystemId,
        commodity: CommodityId,
        f: impl FnOnce(&mut MarketState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let row = self.row(system, commodity)?;
        let mut guard = match row.try_lock_for(self.settings.row_lock_timeout) {
            Some(guard) => guard,
            None => {
                warn!(%system, %commodity, "Timed out waiting for market row");
                metrics::counter!("startrade_ledger_row_busy_total").increment(1);
                return Err(EngineError::MarketRowBusy { system, commodity });
            }
        };
        f(&mut guard)
    }

    /// Consistent copy of one row.
    pub fn snapshot(&self, system: SystemId, commodity: CommodityId) -> EngineResult<MarketState> {
        self.with_row(system, commodity, |state| Ok(state.clone()))
    }

    pub fn apply_buy(&self, system: SystemId, commodity: CommodityId, qty: i64) -> EngineResult<Fill> {
        self.apply(system, commodity, TradeSide::Buy, qty, None)
    }

    pub fn apply_sell(&self, system: SystemId, commodity: CommodityId, qty: i64) -> EngineResult<Fill> {
        self.apply(system, commodity, TradeSide::Sell, qty, None)
    }

    /// Like [`apply_buy`](Self::apply_buy) but rejects the mutation if the
    /// buy price moved away from `quoted_price` since the caller read it.
    pub fn apply_buy_at(&self, system: SystemId, commodity: CommodityId, qty: i64, quoted_price: i64) -> EngineResult<Fill> {
        self.apply(system, commodity, TradeSide::Buy, qty, Some(quoted_price))
    }

    pub fn apply_sell_at(&self, system: SystemId, commodity: CommodityId, qty: i64, quoted_price: i64) -> EngineResult<Fill> {
        self.apply(system, commodity, TradeSide::Sell, qty, Some(quoted_price))
    }

    #[instrument(level = "debug", skip(self))]
    fn apply(
        &self,
        system: SystemId,
        commodity: CommodityId,
        side: TradeSide,
        qty: i64,
        quoted_price: Option<i64>,
    ) -> EngineResult<Fill> {
        if qty <= 0 {
            return Err(EngineError::InvalidQuantity { quantity: qty });
        }
        let item = self.commodity(commodity).ok_or(EngineError::CommodityNotFound(commodity))?;
        let demand_floor = self.settings.demand_floor;

        self.with_row(system, commodity, |state| {
            if let Some(quoted) = quoted_price {
                let current = match side {
                    TradeSide::Buy => state.buy_price,
                    TradeSide::Sell => state.sell_price,
                };
                if quoted != current {
                    debug!(quoted, current, "Quote moved before apply");
                    return Err(EngineError::QuoteChanged { quoted, current });
                }
            }
            trade(state, item, side, qty, demand_floor)
        })
    }

    /// Re-apply a journaled trade. Returns `false` without touching the row
    /// when the row already carries `version`, i.e. the snapshot it was
    /// restored from captured this trade. Version 0 always applies.
    pub fn replay_trade(
        &self,
        system: SystemId,
        commodity: CommodityId,
        side: TradeSide,
        qty: i64,
        version: u64,
    ) -> EngineResult<bool> {
        if qty <= 0 {
            return Err(EngineError::InvalidQuantity { quantity: qty });
        }
        let item = self.commodity(commodity).ok_or(EngineError::CommodityNotFound(commodity))?;
        let demand_floor = self.settings.demand_floor;

        self.with_row(system, commodity, |state| {
            if version != 0 && version <= state.version {
                trace!(version, row_version = state.version, "Replay skipped, row already has it");
                return Ok(false);
            }
            trade(state, item, side, qty, demand_floor)?;
            if version != 0 {
                state.version = version;
            }
            Ok(true)
        })
    }

    /// Administrative reset of stock and demand. Prices are recomputed.
    #[instrument(skip(self))]
    pub fn reset_row(&self, system: SystemId, commodity: CommodityId, stock: i64, demand: i64) -> EngineResult<MarketState> {
        self.with_row(system, commodity, |state| {
            *state = self.fresh_state(system, commodity, stock, demand, now_unix(), state.version + 1)?;
            Ok(state.clone())
        })
    }

    /// Journaled counterpart of [`reset_row`](Self::reset_row), skipped like
    /// [`replay_trade`](Self::replay_trade) when the row is already at `version`.
    pub fn replay_reset(
        &self,
        system: SystemId,
        commodity: CommodityId,
        stock: i64,
        demand: i64,
        version: u64,
    ) -> EngineResult<bool> {
        self.with_row(system, commodity, |state| {
            if version != 0 && version <= state.version {
                return Ok(false);
            }
            let next = if version == 0 { state.version + 1 } else { version };
            *state = self.fresh_state(system, commodity, stock, demand, now_unix(), next)?;
            Ok(true)
        })
    }

    /// Overwrite a row from a persisted state, keeping its timestamp and version.
    pub fn restore_row(&self, saved: &MarketState) -> EngineResult<()> {
        self.with_row(saved.system, saved.commodity, |state| {
            *state = self.fresh_state(
                saved.system,
                saved.commodity,
                saved.stock,
                saved.demand,
                saved.last_update_unix,
                saved.version,
            )?;
            Ok(())
        })
    }

    /// Hold a row's lock from a test so other callers hit the busy path.
    #[cfg(test)]
    pub(crate) fn hold_row(&self, system: SystemId, commodity: CommodityId) -> parking_lot::MutexGuard<'_, MarketState> {
        self.rows[&(system, commodity)].lock()
    }

    /// Copies of every row, ordered by (system, commodity). Rows are locked one at a time.
    pub fn records(&self) -> EngineResult<Vec<MarketState>> {
        let mut keys: Vec<RowKey> = self.rows.keys().copied().collect();
        keys.sort();
        keys.into_iter().map(|(system, commodity)| self.snapshot(system, commodity)).collect()
    }
}

/// The one place a row changes because of a trade.
fn trade(state: &mut MarketState, item: &Commodity, side: TradeSide, qty: i64, demand_floor: i64) -> EngineResult<Fill> {
    let unit_price = match side {
        TradeSide::Buy => state.buy_price,
        TradeSide::Sell => state.sell_price,
    };
    match side {
        TradeSide::Buy => {
            if qty > state.stock {
                return Err(EngineError::InsufficientStock { requested: qty, available: state.stock });
            }
            state.stock -= qty;
            state.demand = state.demand.saturating_add(qty / 2);
        }
        TradeSide::Sell => {
            state.stock = state.stock.saturating_add(qty);
            state.demand = (state.demand - qty / 3).max(demand_floor);
        }
    }

    let quote = compute_price(item, state.stock, state.demand);
    state.buy_price = quote.buy;
    state.sell_price = quote.sell;
    state.last_update_unix = now_unix().max(state.last_update_unix);
    state.version += 1;

    trace!(stock = state.stock, demand = state.demand, buy = quote.buy, sell = quote.sell, "Row repriced");
    Ok(Fill { side, quantity: qty, unit_price, stock_after: state.stock, quote_after: quote, version: state.version })
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
