use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use startrade_rs::config::EngineConfig;
use startrade_rs::engine::types::{CommodityId, PlayerId, ShipId, SystemId, TradeRoute};
use startrade_rs::engine::{EngineError, MarketLedger, NavigationPlanner, RouteFinder, StarMap, TradeExecutor};
use startrade_rs::persist::{self, JsonFileStore, MemoryStore, SnapshotStore, WalStore};
use startrade_rs::players::{InMemoryAccounts, InMemoryShips};
use startrade_rs::{telemetry, universe};

const PLAYER: PlayerId = PlayerId(1);
const SHIP: ShipId = ShipId(1);

#[derive(Debug, Parser)]
#[command(name = "startrade", about = "Star map trading engine CLI")]
struct Args {
    /// TOML config file layered over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `universe.seed`.
    #[arg(long)]
    seed: Option<u64>,

    /// Overrides `universe.systems`.
    #[arg(long)]
    systems: Option<u32>,

    /// Overrides `data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep the journal in memory only.
    #[arg(long)]
    ephemeral: bool,

    #[arg(long, default_value_t = 1_000)]
    credits: i64,
}

struct Session {
    cfg: EngineConfig,
    map: Arc<StarMap>,
    ledger: Arc<MarketLedger>,
    finder: RouteFinder,
    planner: NavigationPlanner,
    executor: TradeExecutor,
    accounts: Arc<InMemoryAccounts>,
    ships: Arc<InMemoryShips>,
    snapshots: Arc<dyn SnapshotStore>,
}

fn parse_system(arg: Option<&str>) -> Option<SystemId> {
    let raw = arg?;
    let digits = raw.strip_prefix("SYS-").or_else(|| raw.strip_prefix("sys-")).unwrap_or(raw);
    digits.parse().ok().map(SystemId)
}

fn parse_commodity(ledger: &MarketLedger, arg: Option<&str>) -> Option<CommodityId> {
    let raw = arg?;
    match raw.parse::<u32>() {
        Ok(id) => ledger.commodity(CommodityId(id)).map(|c| c.id),
        Err(_) => ledger.commodity_by_name(raw).map(|c| c.id),
    }
}

impl Session {
    fn commodity_name(&self, id: CommodityId) -> String {
        self.ledger.commodity(id).map(|c| c.name.clone()).unwrap_or_else(|| id.to_string())
    }

    fn print_routes(&self, routes: &[TradeRoute]) {
        if routes.is_empty() {
            println!("No profitable routes.");
            return;
        }
        for (rank, r) in routes.iter().enumerate() {
            let path = r.path.iter().map(|s| s.0.to_string()).collect::<Vec<_>>().join(" > ");
            println!(
                "{:>2}. {:<12} {} -> {}  buy {:>5} sell {:>5}  +{}/u  total {:>6}  roi {:>5.1}%  {} jumps [{}]",
                rank + 1,
                self.commodity_name(r.commodity),
                r.from,
                r.to,
                r.buy_price,
                r.sell_price,
                r.profit_per_unit,
                r.total_profit,
                r.roi * 100.0,
                r.jumps,
                path,
            );
        }
    }

    fn show_map(&self, system: Option<SystemId>) {
        let ids: Vec<SystemId> = match system {
            Some(id) => vec![id],
            None => self.map.system_ids().to_vec(),
        };
        for id in ids {
            let Some(s) = self.map.system(id) else {
                println!("Unknown system {id}");
                continue;
            };
            let lanes = s.neighbors.iter().map(|n| n.0.to_string()).collect::<Vec<_>>().join(",");
            println!(
                "{:<8} {:<14} tech {}  ({:>6.1}, {:>6.1})  lanes [{}]",
                s.id.to_string(),
                s.name,
                s.tech_level,
                s.position.x,
                s.position.y,
                lanes
            );
        }
    }

    fn show_market(&self, system: SystemId) -> Result<(), EngineError> {
        if !self.map.contains(system) {
            return Err(EngineError::SystemNotFound(system));
        }
        println!("{:<12} {:>6} {:>6} {:>6} {:>6}", "commodity", "stock", "demand", "buy", "sell");
        for c in self.ledger.commodities() {
            let row = self.ledger.snapshot(system, c.id)?;
            let flag = if c.is_legal_at(system) { "" } else { "  (banned)" };
            println!("{:<12} {:>6} {:>6} {:>6} {:>6}{}", c.name, row.stock, row.demand, row.buy_price, row.sell_price, flag);
        }
        Ok(())
    }

    fn status(&self) {
        if let Some(account) = self.accounts.account(PLAYER) {
            println!("Docked at {}  credits {}", account.current_system, account.credits);
        }
        if let Some(hold) = self.ships.hold(SHIP) {
            println!("Hold {}/{}", hold.used(), hold.capacity);
            for (commodity, qty) in hold.cargo.iter().filter(|(_, q)| **q > 0) {
                println!("  {:<12} {}", self.commodity_name(*commodity), qty);
            }
        }
    }

    fn jump(&self, to: SystemId) -> Result<(), EngineError> {
        let from = self.accounts.account(PLAYER).map(|a| a.current_system).ok_or_else(|| {
            EngineError::Collaborator("demo player missing".to_string())
        })?;
        let plan = self.planner.plan_route(from, to)?;
        self.accounts.dock(PLAYER, to);
        println!(
            "Jumped {} -> {} in {} jumps ({} fuel, {} time units)",
            from, to, plan.total_jumps, plan.fuel_required, plan.travel_time
        );
        Ok(())
    }

    async fn trade(&self, buying: bool, commodity: CommodityId, qty: i64) -> Result<(), EngineError> {
        let here = self.accounts.account(PLAYER).map(|a| a.current_system).ok_or_else(|| {
            EngineError::Collaborator("demo player missing".to_string())
        })?;
        let balance = if buying {
            self.executor.buy(PLAYER, SHIP, here, commodity, qty).await?
        } else {
            self.executor.sell(PLAYER, SHIP, here, commodity, qty).await?
        };
        let verb = if buying { "Bought" } else { "Sold" };
        println!("{verb} {qty} {} at {here}. Balance {balance}", self.commodity_name(commodity));
        Ok(())
    }

    async fn save_snapshot(&self, journal: &dyn WalStore) -> anyhow::Result<()> {
        let saved = persist::checkpoint(&self.ledger, self.snapshots.as_ref(), journal).await?;
        println!("Saved snapshot of {} rows at journal id {}", saved.records.len(), saved.wal_high_watermark);
        Ok(())
    }

    async fn restore(&self, journal: &dyn WalStore) -> anyhow::Result<()> {
        if self.snapshots.load_snapshot().await?.is_none() {
            println!("No snapshot found to restore");
            return Ok(());
        }
        let replayed = persist::restore(&self.ledger, self.snapshots.as_ref(), journal).await?;
        println!("Restored snapshot and replayed {replayed} journal ops");
        Ok(())
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  map [system]            - List systems, or one system");
    println!("  market <system>         - Show a system's market");
    println!("  routes <system>         - Best routes starting at a system");
    println!("  best                    - Best routes across the universe (time boxed)");
    println!("  plan <from> <to>        - Cheapest jump path");
    println!("  jump <system>           - Travel the demo ship to a system");
    println!("  buy <commodity> <qty>   - Buy where the ship is docked");
    println!("  sell <commodity> <qty>  - Sell where the ship is docked");
    println!("  status                  - Credits and cargo");
    println!("  snapshot                - Save a ledger snapshot");
    println!("  restore                 - Reload the snapshot and replay the journal");
    println!("  quit, q                 - Exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = EngineConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(seed) = args.seed {
        cfg.universe.seed = seed;
    }
    if let Some(systems) = args.systems {
        cfg.universe.systems = systems;
    }
    if let Some(dir) = &args.data_dir {
        cfg.data_dir = dir.display().to_string();
    }

    telemetry::init_tracing("startrade_rs=info")?;
    telemetry::init_metrics(cfg.metrics_port)?;

    let generated = universe::generate(&cfg.universe, cfg.ledger_settings())?;
    let (map, ledger) = (generated.map, generated.ledger);

    let (snapshots, journal): (Arc<dyn SnapshotStore>, Arc<dyn WalStore>) = if args.ephemeral {
        let store = Arc::new(MemoryStore::new());
        (store.clone() as Arc<dyn SnapshotStore>, store as Arc<dyn WalStore>)
    } else {
        let store = Arc::new(JsonFileStore::open(&cfg.data_dir).await?);
        (store.clone() as Arc<dyn SnapshotStore>, store as Arc<dyn WalStore>)
    };

    let replayed = persist::restore(&ledger, snapshots.as_ref(), journal.as_ref())
        .await
        .with_context(|| format!("restoring {}; was it written with a different seed?", cfg.data_dir))?;
    println!("Universe seed {}: {} systems, {} market rows, {replayed} journal ops replayed",
        cfg.universe.seed, map.len(), ledger.row_count());

    let accounts = Arc::new(InMemoryAccounts::new());
    let ships = Arc::new(InMemoryShips::new());
    let home = map.system_ids().first().copied().context("universe has no systems")?;
    accounts.open(PLAYER, args.credits, home);
    ships.register(SHIP, cfg.routes.cargo_capacity);

    let session = Session {
        finder: RouteFinder::new(map.clone(), ledger.clone()),
        planner: NavigationPlanner::new(map.clone()),
        executor: TradeExecutor::new(ledger.clone(), accounts.clone(), ships.clone()).with_journal(journal.clone()),
        cfg,
        map,
        ledger,
        accounts,
        ships,
        snapshots,
    };

    loop {
        print!("\nSTARTRADE> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or("").to_lowercase();
        let a1 = parts.next();
        let a2 = parts.next();

        let outcome: anyhow::Result<()> = match command.as_str() {
            "help" | "h" => {
                print_help();
                Ok(())
            }
            "map" => {
                session.show_map(parse_system(a1));
                Ok(())
            }
            "market" => match parse_system(a1) {
                Some(system) => session.show_market(system).map_err(Into::into),
                None => {
                    println!("Usage: market <system>");
                    Ok(())
                }
            },
            "routes" => match parse_system(a1) {
                Some(system) => session
                    .finder
                    .find_routes_from_system(system, &session.cfg.route_options())
                    .map(|routes| session.print_routes(&routes))
                    .map_err(Into::into),
                None => {
                    println!("Usage: routes <system>");
                    Ok(())
                }
            },
            "best" => session
                .finder
                .find_best_routes(&session.cfg.route_options(), &session.cfg.search_budget())
                .map(|search| {
                    session.print_routes(&search.routes);
                    if search.truncated {
                        println!("(search stopped early after {} origins)", search.origins_searched);
                    }
                })
                .map_err(Into::into),
            "plan" => match (parse_system(a1), parse_system(a2)) {
                (Some(from), Some(to)) => session.planner.plan_route(from, to).map(|plan| {
                    let hops = plan.waypoints.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" > ");
                    println!("{hops}");
                    println!(
                        "{} jumps, distance {:.1}, fuel {}, time {}",
                        plan.total_jumps, plan.total_distance, plan.fuel_required, plan.travel_time
                    );
                }).map_err(Into::into),
                _ => {
                    println!("Usage: plan <from> <to>");
                    Ok(())
                }
            },
            "jump" => match parse_system(a1) {
                Some(to) => session.jump(to).map_err(Into::into),
                None => {
                    println!("Usage: jump <system>");
                    Ok(())
                }
            },
            "buy" | "sell" => match (parse_commodity(&session.ledger, a1), a2.and_then(|q| q.parse::<i64>().ok())) {
                (Some(commodity), Some(qty)) => session.trade(command == "buy", commodity, qty).await.map_err(Into::into),
                _ => {
                    println!("Usage: {command} <commodity> <qty>");
                    Ok(())
                }
            },
            "status" => {
                session.status();
                Ok(())
            }
            "snapshot" => session.save_snapshot(journal.as_ref()).await,
            "restore" => session.restore(journal.as_ref()).await,
            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "" => continue,
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            eprintln!("Error: {e:#}");
        }
    }

    Ok(())
}
