use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommodityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShipId(pub u64);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SYS-{}", self.0)
    }
}

impl fmt::Display for CommodityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COM-{}", self.0)
    }
}

/// Jump paths are short in practice, so they live inline.
pub type JumpPath = SmallVec<[SystemId; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarSystem {
    pub id: SystemId,
    pub name: String,
    pub position: Position,
    pub neighbors: Vec<SystemId>,
    pub tech_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommodityCategory {
    Agricultural,
    Raw,
    Industrial,
    Technology,
    Luxury,
    Contraband,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub id: CommodityId,
    pub name: String,
    pub category: CommodityCategory,
    pub base_price: i64,
    pub price_floor: i64,
    pub price_ceiling: i64,
    /// Market-maker spread between buy and sell, in basis points of the buy price.
    pub spread_bps: u32,
    pub banned_at: Vec<SystemId>,
}

impl Commodity {
    /// Commodity with the default bounds: floor at a quarter of base, ceiling at 4x, 5% spread.
    pub fn new(id: CommodityId, name: impl Into<String>, category: CommodityCategory, base_price: i64) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            base_price,
            price_floor: (base_price / 4).max(1),
            price_ceiling: base_price.saturating_mul(4).max(1),
            spread_bps: 500,
            banned_at: Vec::new(),
        }
    }

    pub fn is_legal_at(&self, system: SystemId) -> bool {
        !self.banned_at.contains(&system)
    }
}

/// Price pair for one ledger row. `buy` is what a player pays, `sell` what a player receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub buy: i64,
    pub sell: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub system: SystemId,
    pub commodity: CommodityId,
    pub stock: i64,
    pub demand: i64,
    pub buy_price: i64,
    pub sell_price: i64,
    pub last_update_unix: i64,
    pub version: u64,
}

impl MarketState {
    pub fn quote(&self) -> Quote {
        Quote { buy: self.buy_price, sell: self.sell_price }
    }
}

/// Result of one applied ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub side: TradeSide,
    pub quantity: i64,
    pub unit_price: i64,
    pub stock_after: i64,
    pub quote_after: Quote,
    /// Row version this fill produced. Journaled so replay can skip fills a snapshot already holds.
    pub version: u64,
}

impl Fill {
    pub fn total(&self) -> i64 {
        self.unit_price * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRoute {
    pub from: SystemId,
    pub to: SystemId,
    pub commodity: CommodityId,
    pub buy_price: i64,
    pub sell_price: i64,
    pub profit_per_unit: i64,
    pub total_profit: i64,
    pub roi: f64,
    pub path: JumpPath,
    pub jumps: u32,
    pub distance: f64,
    pub profit_per_jump: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationPath {
    pub waypoints: Vec<SystemId>,
    pub total_jumps: u32,
    pub total_distance: f64,
    pub fuel_required: u32,
    pub travel_time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteOptions {
    pub max_jumps: u32,
    pub cargo_capacity: i64,
    pub min_roi: f64,
    pub limit: usize,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self { max_jumps: 3, cargo_capacity: 20, min_roi: 0.0, limit: 10 }
    }
}

/// Ranked routes from a global search. `truncated` is set when the search budget ran out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteSearch {
    pub routes: Vec<TradeRoute>,
    pub truncated: bool,
    pub origins_searched: usize,
}
