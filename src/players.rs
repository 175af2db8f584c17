//! In-process player and ship stores used by the CLI and tests.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::executor::{PlayerAccounts, ShipHolds};
use crate::engine::types::{CommodityId, PlayerId, ShipId, SystemId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAccount {
    pub credits: i64,
    pub current_system: SystemId,
}

#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: Mutex<AHashMap<PlayerId, PlayerAccount>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, player: PlayerId, credits: i64, docked_at: SystemId) {
        self.accounts.lock().insert(player, PlayerAccount { credits, current_system: docked_at });
    }

    pub fn dock(&self, player: PlayerId, system: SystemId) {
        if let Some(account) = self.accounts.lock().get_mut(&player) {
            account.current_system = system;
        }
    }

    pub fn account(&self, player: PlayerId) -> Option<PlayerAccount> {
        self.accounts.lock().get(&player).cloned()
    }

    fn update<T>(&self, player: PlayerId, f: impl FnOnce(&mut PlayerAccount) -> EngineResult<T>) -> EngineResult<T> {
        let mut accounts = self.accounts.lock();
        let account = accounts.get_mut(&player).ok_or_else(|| unknown_player(player))?;
        f(account)
    }
}

fn unknown_player(player: PlayerId) -> EngineError {
    EngineError::Collaborator(format!("unknown player {}", player.0))
}

fn unknown_ship(ship: ShipId) -> EngineError {
    EngineError::Collaborator(format!("unknown ship {}", ship.0))
}

#[async_trait]
impl PlayerAccounts for InMemoryAccounts {
    async fn credits(&self, player: PlayerId) -> EngineResult<i64> {
        self.update(player, |a| Ok(a.credits))
    }

    async fn current_system(&self, player: PlayerId) -> EngineResult<SystemId> {
        self.update(player, |a| Ok(a.current_system))
    }

    async fn debit(&self, player: PlayerId, amount: i64) -> EngineResult<i64> {
        self.update(player, |a| {
            if a.credits < amount {
                return Err(EngineError::InsufficientCredits { required: amount, available: a.credits });
            }
            a.credits -= amount;
            trace!(player = player.0, amount, balance = a.credits, "Debited");
            Ok(a.credits)
        })
    }

    async fn credit(&self, player: PlayerId, amount: i64) -> EngineResult<i64> {
        self.update(player, |a| {
            a.credits = a.credits.saturating_add(amount);
            trace!(player = player.0, amount, balance = a.credits, "Credited");
            Ok(a.credits)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CargoHold {
    pub capacity: i64,
    pub cargo: AHashMap<CommodityId, i64>,
}

impl CargoHold {
    pub fn used(&self) -> i64 {
        self.cargo.values().sum()
    }

    pub fn free(&self) -> i64 {
        self.capacity - self.used()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShips {
    holds: Mutex<AHashMap<ShipId, CargoHold>>,
}

impl InMemoryShips {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ship: ShipId, capacity: i64) {
        self.holds.lock().insert(ship, CargoHold { capacity, cargo: AHashMap::new() });
    }

    pub fn hold(&self, ship: ShipId) -> Option<CargoHold> {
        self.holds.lock().get(&ship).cloned()
    }

    fn update<T>(&self, ship: ShipId, f: impl FnOnce(&mut CargoHold) -> EngineResult<T>) -> EngineResult<T> {
        let mut holds = self.holds.lock();
        let hold = holds.get_mut(&ship).ok_or_else(|| unknown_ship(ship))?;
        f(hold)
    }
}

#[async_trait]
impl ShipHolds for InMemoryShips {
    async fn cargo_free(&self, ship: ShipId) -> EngineResult<i64> {
        self.update(ship, |h| Ok(h.free()))
    }

    async fn holding(&self, ship: ShipId, commodity: CommodityId) -> EngineResult<i64> {
        self.update(ship, |h| Ok(h.cargo.get(&commodity).copied().unwrap_or(0)))
    }

    async fn add_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()> {
        self.update(ship, |h| {
            let free = h.free();
            if free < qty {
                return Err(EngineError::InsufficientCargo { requested: qty, available: free });
            }
            *h.cargo.entry(commodity).or_insert(0) += qty;
            Ok(())
        })
    }

    async fn remove_cargo(&self, ship: ShipId, commodity: CommodityId, qty: i64) -> EngineResult<()> {
        self.update(ship, |h| {
            let held = h.cargo.get(&commodity).copied().unwrap_or(0);
            if held < qty {
                return Err(EngineError::InsufficientCargo { requested: qty, available: held });
            }
            if held == qty {
                h.cargo.remove(&commodity);
            } else {
                h.cargo.insert(commodity, held - qty);
            }
            Ok(())
        })
    }
}
