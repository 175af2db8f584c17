use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::MarketLedger;
use crate::engine::saga::Saga;
use crate::engine::types::{CommodityId, PlayerId, ShipId, SystemId, TradeSide};
use crate::persist::{LedgerOp, WalStore};

/// Credit balances and docking location, owned by the player service.
#[async_trait]
pub trait PlayerAccounts: Send + Sync {
    async fn credits(&self, player: PlayerId) -> EngineResult<i64>;
    async fn current_system(&self, player: PlayerId) -> EngineResult<SystemId>;
    /// Returns the new balance.
    async fn debit(&self, player: PlayerId, amount: i64) -> EngineResult<i64>;
    /// Returns the new balance.
    async fn credit(&self, player: PlayerId, amount: i64) -> EngineResult<i64>;
}

/// Cargo holds, owned by the ship service.
#[async_trait]
pub trait ShipHolds: Send + Sync {
    async fn cargo_free(&self, ship: ShipId) -> EngineResult<i64>;
    async fn holding(&self, ship: ShipId, commodity: CommodityId) -> EngineResult<i64>;
    async fn add_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()>;
    async fn remove_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Validating,
    Applying,
    Applied,
    RolledBack,
    RollbackFailed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TradeState::Validating => "validating",
            TradeState::Applying => "applying",
            TradeState::Applied => "applied",
            TradeState::RolledBack => "rolled_back",
            TradeState::RollbackFailed => "rolled_back_failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
struct TradeRequest {
    player: PlayerId,
    ship: ShipId,
    system: SystemId,
    commodity: CommodityId,
    qty: i64,
}

/// Runs single buy/sell trades across credits, cargo and the market ledger.
pub struct TradeExecutor {
    ledger: Arc<MarketLedger>,
    accounts: Arc<dyn PlayerAccounts>,
    holds: Arc<dyn ShipHolds>,
    journal: Option<Arc<dyn WalStore>>,
}

impl TradeExecutor {
    pub fn new(ledger: Arc<MarketLedger>, accounts: Arc<dyn PlayerAccounts>, holds: Arc<dyn ShipHolds>) -> Self {
        Self { ledger, accounts, holds, journal: None }
    }

    /// Record every applied ledger mutation to `journal`.
    pub fn with_journal(mut self, journal: Arc<dyn WalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn ledger(&self) -> &Arc<MarketLedger> {
        &self.ledger
    }

    /// Buy `qty` units at `system`. Returns the player's new credit balance.
    #[instrument(skip(self))]
    pub async fn buy(
        &self,
        player: PlayerId,
        ship: ShipId,
        system: SystemId,
        commodity: CommodityId,
        qty: i64,
    ) -> EngineResult<i64> {
        let req = TradeRequest { player, ship, system, commodity, qty };
        debug!(state = %TradeState::Validating, "Buy requested");
        let (unit_price, cost) = self.validate_buy(&req).await?;

        debug!(state = %TradeState::Applying, unit_price, cost, "Buy validated");
        let mut saga = Saga::new("buy");

        let balance = saga.run("debit credits", self.accounts.debit(player, cost)).await?;
        let accounts = self.accounts.clone();
        saga.on_rollback("refund credits", move || async move { accounts.credit(player, cost).await.map(|_| ()) });

        self.finish(saga.run("load cargo", self.holds.add_cargo(ship, commodity, qty)).await, TradeSide::Buy)?;
        let holds = self.holds.clone();
        saga.on_rollback("unload cargo", move || async move { holds.remove_cargo(ship, commodity, qty).await });

        let ledger = self.ledger.clone();
        let fill = saga.run("apply ledger buy", async move { ledger.apply_buy_at(system, commodity, qty, unit_price) }).await;
        let fill = self.finish(fill, TradeSide::Buy)?;
        saga.commit();

        self.record(LedgerOp::Buy { system, commodity, quantity: qty, version: fill.version }).await;
        metrics::counter!("startrade_trades_total", "side" => "buy").increment(1);
        info!(state = %TradeState::Applied, unit_price = fill.unit_price, stock = fill.stock_after, balance, "Buy applied");
        Ok(balance)
    }

    /// Sell `qty` units at `system`. Returns the player's new credit balance.
    #[instrument(skip(self))]
    pub async fn sell(
        &self,
        player: PlayerId,
        ship: ShipId,
        system: SystemId,
        commodity: CommodityId,
        qty: i64,
    ) -> EngineResult<i64> {
        let req = TradeRequest { player, ship, system, commodity, qty };
        debug!(state = %TradeState::Validating, "Sell requested");
        let (unit_price, proceeds) = self.validate_sell(&req).await?;

        debug!(state = %TradeState::Applying, unit_price, proceeds, "Sell validated");
        let mut saga = Saga::new("sell");

        saga.run("unload cargo", self.holds.remove_cargo(ship, commodity, qty)).await?;
        let holds = self.holds.clone();
        saga.on_rollback("reload cargo", move || async move { holds.add_cargo(ship, commodity, qty).await });

        let balance = self.finish(saga.run("credit player", self.accounts.credit(player, proceeds)).await, TradeSide::Sell)?;
        let accounts = self.accounts.clone();
        saga.on_rollback("claw back credits", move || async move { accounts.debit(player, proceeds).await.map(|_| ()) });

        let ledger = self.ledger.clone();
        let fill = saga.run("apply ledger sell", async move { ledger.apply_sell_at(system, commodity, qty, unit_price) }).await;
        let fill = self.finish(fill, TradeSide::Sell)?;
        saga.commit();

        self.record(LedgerOp::Sell { system, commodity, quantity: qty, version: fill.version }).await;
        metrics::counter!("startrade_trades_total", "side" => "sell").increment(1);
        info!(state = %TradeState::Applied, unit_price = fill.unit_price, stock = fill.stock_after, balance, "Sell applied");
        Ok(balance)
    }

    async fn validate_common(&self, req: &TradeRequest) -> EngineResult<()> {
        if req.qty <= 0 {
            return Err(EngineError::InvalidQuantity { quantity: req.qty });
        }
        let commodity = self.ledger.commodity(req.commodity).ok_or(EngineError::CommodityNotFound(req.commodity))?;
        if !commodity.is_legal_at(req.system) {
            return Err(EngineError::IllegalCommodity { system: req.system, commodity: req.commodity });
        }
        if self.accounts.current_system(req.player).await? != req.system {
            return Err(EngineError::NotDocked(req.system));
        }
        Ok(())
    }

    async fn validate_buy(&self, req: &TradeRequest) -> EngineResult<(i64, i64)> {
        self.validate_common(req).await?;

        let row = self.ledger.snapshot(req.system, req.commodity)?;
        if row.stock < req.qty {
            return Err(EngineError::InsufficientStock { requested: req.qty, available: row.stock });
        }
        let free = self.holds.cargo_free(req.ship).await?;
        if free < req.qty {
            return Err(EngineError::InsufficientCargo { requested: req.qty, available: free });
        }
        let cost = row.buy_price.checked_mul(req.qty).ok_or(EngineError::InvalidQuantity { quantity: req.qty })?;
        let credits = self.accounts.credits(req.player).await?;
        if credits < cost {
            return Err(EngineError::InsufficientCredits { required: cost, available: credits });
        }
        Ok((row.buy_price, cost))
    }

    async fn validate_sell(&self, req: &TradeRequest) -> EngineResult<(i64, i64)> {
        self.validate_common(req).await?;

        let held = self.holds.holding(req.ship, req.commodity).await?;
        if held < req.qty {
            return Err(EngineError::InsufficientCargo { requested: req.qty, available: held });
        }
        let row = self.ledger.snapshot(req.system, req.commodity)?;
        let proceeds = row.sell_price.checked_mul(req.qty).ok_or(EngineError::InvalidQuantity { quantity: req.qty })?;
        Ok((row.sell_price, proceeds))
    }

    fn finish<T>(&self, outcome: EngineResult<T>, side: TradeSide) -> EngineResult<T> {
        match &outcome {
            Err(e @ EngineError::TransactionFailed { .. }) => {
                metrics::counter!("startrade_trades_rolled_back_total", "side" => side.to_string()).increment(1);
                warn!(state = %TradeState::RolledBack, %side, error = %e, "Trade rolled back");
            }
            Err(e @ EngineError::CompensationFailed { .. }) => {
                metrics::counter!("startrade_trades_rollback_failed_total", "side" => side.to_string()).increment(1);
                error!(state = %TradeState::RollbackFailed, %side, error = %e, "Trade left partially applied");
            }
            _ => {}
        }
        outcome
    }

    async fn record(&self, op: LedgerOp) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.append_op(&op).await {
            warn!(error = %e, "Trade applied but journal append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{line_universe, FOOD, NARCOTICS};
    use crate::persist::MemoryStore;
    use crate::players::{InMemoryAccounts, InMemoryShips};

    const PILOT: PlayerId = PlayerId(7);
    const HAULER: ShipId = ShipId(70);

    struct Harness {
        executor: TradeExecutor,
        ledger: Arc<MarketLedger>,
        accounts: Arc<InMemoryAccounts>,
        ships: Arc<InMemoryShips>,
    }

    fn harness(credits: i64, capacity: i64) -> Harness {
        let (_, ledger) = line_universe();
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts.open(PILOT, credits, SystemId(1));
        let ships = Arc::new(InMemoryShips::new());
        ships.register(HAULER, capacity);
        let executor = TradeExecutor::new(ledger.clone(), accounts.clone(), ships.clone());
        Harness { executor, ledger, accounts, ships }
    }

    #[tokio::test]
    async fn test_buy_moves_credits_cargo_and_stock() {
        let h = harness(1_000, 50);
        let balance = h.executor.buy(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap();

        assert_eq!(balance, 1_000 - 450);
        assert_eq!(h.accounts.credits(PILOT).await.unwrap(), 550);
        assert_eq!(h.ships.holding(HAULER, FOOD).await.unwrap(), 10);
        let row = h.ledger.snapshot(SystemId(1), FOOD).unwrap();
        assert_eq!(row.stock, 40);
        assert_eq!(row.demand, 25);
    }

    #[tokio::test]
    async fn test_sell_after_buy() {
        let h = harness(1_000, 50);
        h.executor.buy(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap();
        let balance = h.executor.sell(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap();

        // bought at 45, row now sells at 43 after the buy
        assert_eq!(balance, 550 + 430);
        assert_eq!(h.ships.holding(HAULER, FOOD).await.unwrap(), 0);
        assert_eq!(h.ledger.snapshot(SystemId(1), FOOD).unwrap().stock, 50);
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let h = harness(100, 5);
        let ex = &h.executor;

        assert_eq!(
            ex.buy(PILOT, HAULER, SystemId(1), FOOD, 0).await.unwrap_err(),
            EngineError::InvalidQuantity { quantity: 0 }
        );
        assert_eq!(
            ex.buy(PILOT, HAULER, SystemId(1), FOOD, 60).await.unwrap_err(),
            EngineError::InsufficientStock { requested: 60, available: 50 }
        );
        assert_eq!(
            ex.buy(PILOT, HAULER, SystemId(1), FOOD, 6).await.unwrap_err(),
            EngineError::InsufficientCargo { requested: 6, available: 5 }
        );
        assert_eq!(
            ex.buy(PILOT, HAULER, SystemId(1), FOOD, 3).await.unwrap_err(),
            EngineError::InsufficientCredits { required: 135, available: 100 }
        );
        assert_eq!(
            ex.buy(PILOT, HAULER, SystemId(2), FOOD, 1).await.unwrap_err(),
            EngineError::NotDocked(SystemId(2))
        );
        assert_eq!(
            ex.sell(PILOT, HAULER, SystemId(1), FOOD, 1).await.unwrap_err(),
            EngineError::InsufficientCargo { requested: 1, available: 0 }
        );

        // nothing moved
        assert_eq!(h.accounts.credits(PILOT).await.unwrap(), 100);
        assert_eq!(h.ledger.snapshot(SystemId(1), FOOD).unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_banned_commodity() {
        let h = harness(10_000, 50);
        h.accounts.dock(PILOT, SystemId(4));
        let err = h.executor.buy(PILOT, HAULER, SystemId(4), NARCOTICS, 1).await.unwrap_err();
        assert_eq!(err, EngineError::IllegalCommodity { system: SystemId(4), commodity: NARCOTICS });
    }

    /// Cargo store that lets another trader hit the same row while our
    /// cargo is being loaded, so the ledger step sees a moved quote.
    /// With `stuck_unload` set, taking cargo back out fails as well.
    struct RacingShips {
        inner: InMemoryShips,
        ledger: Arc<MarketLedger>,
        stuck_unload: bool,
    }

    #[async_trait]
    impl ShipHolds for RacingShips {
        async fn cargo_free(&self, ship: ShipId) -> EngineResult<i64> {
            self.inner.cargo_free(ship).await
        }

        async fn holding(&self, ship: ShipId, commodity: CommodityId) -> EngineResult<i64> {
            self.inner.holding(ship, commodity).await
        }

        async fn add_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()> {
            self.inner.add_cargo(ship, commodity, qty).await?;
            self.ledger.apply_buy(SystemId(1), commodity, 30)?;
            Ok(())
        }

        async fn remove_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()> {
            if self.stuck_unload {
                return Err(EngineError::Collaborator("cargo bay jammed".into()));
            }
            self.inner.remove_cargo(ship, commodity, qty).await
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_rolls_back_credits_and_cargo() {
        let (_, ledger) = line_universe();
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts.open(PILOT, 1_000, SystemId(1));
        let ships = Arc::new(RacingShips { inner: InMemoryShips::new(), ledger: ledger.clone(), stuck_unload: false });
        ships.inner.register(HAULER, 50);
        let executor = TradeExecutor::new(ledger.clone(), accounts.clone(), ships.clone());

        let err = executor.buy(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap_err();

        match &err {
            EngineError::TransactionFailed { source } => {
                assert!(matches!(**source, EngineError::QuoteChanged { quoted: 45, .. }))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(accounts.credits(PILOT).await.unwrap(), 1_000);
        assert_eq!(ships.holding(HAULER, FOOD).await.unwrap(), 0);
        // only the competing trader's buy landed
        assert_eq!(ledger.snapshot(SystemId(1), FOOD).unwrap().stock, 20);
    }

    #[tokio::test]
    async fn test_stuck_compensation_is_reported_and_not_retryable() {
        let (_, ledger) = line_universe();
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts.open(PILOT, 1_000, SystemId(1));
        let ships = Arc::new(RacingShips { inner: InMemoryShips::new(), ledger: ledger.clone(), stuck_unload: true });
        ships.inner.register(HAULER, 50);
        let executor = TradeExecutor::new(ledger.clone(), accounts.clone(), ships.clone());

        let err = executor.buy(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap_err();

        match &err {
            EngineError::CompensationFailed { source, failed_steps } => {
                assert!(matches!(**source, EngineError::QuoteChanged { quoted: 45, .. }));
                assert_eq!(failed_steps, &vec!["unload cargo"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!err.is_retryable());
        // credits came back, the cargo did not
        assert_eq!(accounts.credits(PILOT).await.unwrap(), 1_000);
        assert_eq!(ships.holding(HAULER, FOOD).await.unwrap(), 10);
        assert_eq!(ledger.snapshot(SystemId(1), FOOD).unwrap().stock, 20);
    }

    /// Cargo store that is down for writes.
    struct ReadOnlyShips(InMemoryShips);

    #[async_trait]
    impl ShipHolds for ReadOnlyShips {
        async fn cargo_free(&self, ship: ShipId) -> EngineResult<i64> {
            self.0.cargo_free(ship).await
        }

        async fn holding(&self, ship: ShipId, commodity: CommodityId) -> EngineResult<i64> {
            self.0.holding(ship, commodity).await
        }

        async fn add_cargo(&self, _: ShipId, _: CommodityId, _: i64) -> EngineResult<()> {
            Err(EngineError::Collaborator("cargo store is read-only".into()))
        }

        async fn remove_cargo(&self, _: ShipId, _: CommodityId, _: i64) -> EngineResult<()> {
            Err(EngineError::Collaborator("cargo store is read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_cargo_failure_refunds_credits() {
        let (_, ledger) = line_universe();
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts.open(PILOT, 1_000, SystemId(1));
        let ships = ReadOnlyShips(InMemoryShips::new());
        ships.0.register(HAULER, 50);
        let executor = TradeExecutor::new(ledger.clone(), accounts.clone(), Arc::new(ships));

        let err = executor.buy(PILOT, HAULER, SystemId(1), FOOD, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::TransactionFailed { .. }));
        assert!(!err.is_retryable());
        assert_eq!(accounts.credits(PILOT).await.unwrap(), 1_000);
        assert_eq!(ledger.snapshot(SystemId(1), FOOD).unwrap().stock, 50);
    }

    #[tokio::test]
    async fn test_applied_trades_are_journaled() {
        let h = harness(1_000, 50);
        let journal = Arc::new(MemoryStore::new());
        let executor = TradeExecutor::new(h.ledger.clone(), h.accounts.clone(), h.ships.clone()).with_journal(journal.clone());

        executor.buy(PILOT, HAULER, SystemId(1), FOOD, 4).await.unwrap();
        executor.sell(PILOT, HAULER, SystemId(1), FOOD, 2).await.unwrap();
        let _ = executor.buy(PILOT, HAULER, SystemId(1), FOOD, 0).await;

        let ops = journal.relay_ops(0).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].1, LedgerOp::Buy { system: SystemId(1), commodity: FOOD, quantity: 4, version: 1 });
        assert_eq!(ops[1].1, LedgerOp::Sell { system: SystemId(1), commodity: FOOD, quantity: 2, version: 2 });
    }

    #[tokio::test]
    async fn test_concurrent_buyers_never_oversell() {
        let (_, ledger) = line_universe();
        let accounts = Arc::new(InMemoryAccounts::new());
        let ships = Arc::new(InMemoryShips::new());
        for i in 0..12u64 {
            accounts.open(PlayerId(i), 10_000, SystemId(1));
            ships.register(ShipId(i), 100);
        }
        let executor = Arc::new(TradeExecutor::new(ledger.clone(), accounts.clone(), ships.clone()));

        let mut tasks = Vec::new();
        for i in 0..12u64 {
            let executor = executor.clone();
            tasks.push(tokio::spawn(async move { executor.buy(PlayerId(i), ShipId(i), SystemId(1), FOOD, 8).await }));
        }
        let mut bought = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                bought += 8;
            }
        }

        let row = ledger.snapshot(SystemId(1), FOOD).unwrap();
        assert!(row.stock >= 0);
        assert_eq!(row.stock, 50 - bought);
        let mut held = 0;
        for i in 0..12u64 {
            held += ships.holding(ShipId(i), FOOD).await.unwrap();
        }
        assert_eq!(held, bought);
    }
}
