use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use ordered_float::OrderedFloat;
use smallvec::smallvec;
use tracing::{debug, info, instrument, trace, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::MarketLedger;
use crate::engine::star_map::StarMap;
use crate::engine::types::{CommodityId, JumpPath, MarketState, RouteOptions, RouteSearch, SystemId, TradeRoute};

/// Shared flag a caller can flip to abort a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Deadline and/or cancellation for long-running searches.
#[derive(Debug, Clone, Default)]
pub struct SearchBudget {
    deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
}

impl SearchBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout), cancel: None }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline), cancel: None }
    }

    pub fn cancellable(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn exhausted(&self) -> bool {
        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A system reached by the bounded BFS.
#[derive(Debug, Clone)]
struct Reached {
    system: SystemId,
    path: JumpPath,
    distance: f64,
}

impl Reached {
    fn jumps(&self) -> u32 {
        (self.path.len() - 1) as u32
    }
}

/// Arbitrage search over the star map and current ledger rows.
#[derive(Debug, Clone)]
pub struct RouteFinder {
    map: Arc<StarMap>,
    ledger: Arc<MarketLedger>,
}

impl RouteFinder {
    pub fn new(map: Arc<StarMap>, ledger: Arc<MarketLedger>) -> Self {
        Self { map, ledger }
    }

    #[instrument(skip(self, opts), fields(max_jumps = opts.max_jumps))]
    pub fn find_routes_from_system(&self, origin: SystemId, opts: &RouteOptions) -> EngineResult<Vec<TradeRoute>> {
        validate(opts)?;
        if !self.map.contains(origin) {
            return Err(EngineError::SystemNotFound(origin));
        }
        let (routes, _) = self.search_from(origin, opts, &SearchBudget::unlimited());
        metrics::counter!("startrade_route_searches_total", "scope" => "origin").increment(1);
        debug!(%origin, found = routes.len(), "Route search finished");
        Ok(routes)
    }

    /// Ranked routes from every system. Stops early once `budget` is exhausted
    /// and reports whatever was ranked so far with `truncated` set.
    #[instrument(skip(self, opts, budget), fields(max_jumps = opts.max_jumps))]
    pub fn find_best_routes(&self, opts: &RouteOptions, budget: &SearchBudget) -> EngineResult<RouteSearch> {
        validate(opts)?;
        let started = Instant::now();
        let mut result = RouteSearch::default();

        for &origin in self.map.system_ids() {
            if budget.exhausted() {
                result.truncated = true;
                break;
            }
            let (routes, truncated) = self.search_from(origin, opts, budget);
            result.routes.extend(routes);
            if truncated {
                result.truncated = true;
                break;
            }
            result.origins_searched += 1;
        }

        rank(&mut result.routes, opts.limit);

        metrics::counter!("startrade_route_searches_total", "scope" => "universe").increment(1);
        metrics::histogram!("startrade_route_search_seconds").record(started.elapsed().as_secs_f64());
        if result.truncated {
            warn!(origins = result.origins_searched, "Universe route search truncated by budget");
        } else {
            info!(origins = result.origins_searched, found = result.routes.len(), "Universe route search finished");
        }
        Ok(result)
    }

    fn search_from(&self, origin: SystemId, opts: &RouteOptions, budget: &SearchBudget) -> (Vec<TradeRoute>, bool) {
        let (reached, truncated) = self.reachable(origin, opts.max_jumps, budget);
        if truncated {
            return (Vec::new(), true);
        }

        let supply: Vec<MarketState> = self
            .ledger
            .commodities()
            .iter()
            .filter(|c| c.is_legal_at(origin))
            .filter_map(|c| self.read_row(origin, c.id))
            .filter(|state| state.stock > 0)
            .collect();

        let mut routes = Vec::new();
        for dest in reached.iter().filter(|r| r.system != origin) {
            for source in &supply {
                let legal = self.ledger.commodity(source.commodity).is_some_and(|c| c.is_legal_at(dest.system));
                if !legal {
                    continue;
                }
                let Some(target) = self.read_row(dest.system, source.commodity) else {
                    continue;
                };
                if let Some(route) = evaluate(source, &target, dest, opts) {
                    routes.push(route);
                }
            }
        }

        rank(&mut routes, opts.limit);
        (routes, false)
    }

    fn read_row(&self, system: SystemId, commodity: CommodityId) -> Option<MarketState> {
        match self.ledger.snapshot(system, commodity) {
            Ok(state) => Some(state),
            Err(e) => {
                trace!(%system, %commodity, error = %e, "Skipping unreadable market row");
                None
            }
        }
    }

    /// Bounded BFS from `origin`. Returns every system within `max_jumps`
    /// hops (origin included) with the first path found to it.
    fn reachable(&self, origin: SystemId, max_jumps: u32, budget: &SearchBudget) -> (Vec<Reached>, bool) {
        let mut visited = AHashSet::new();
        let mut queue = VecDeque::new();
        let mut reached = Vec::new();

        visited.insert(origin);
        queue.push_back(Reached { system: origin, path: smallvec![origin], distance: 0.0 });

        while let Some(current) = queue.pop_front() {
            if budget.exhausted() {
                return (reached, true);
            }
            if current.jumps() < max_jumps {
                for &next in self.map.neighbors(current.system) {
                    if !visited.insert(next) {
                        continue;
                    }
                    let leg = self.map.distance(current.system, next).unwrap_or(0.0);
                    let mut path = current.path.clone();
                    path.push(next);
                    queue.push_back(Reached { system: next, path, distance: current.distance + leg });
                }
            }
            reached.push(current);
        }
        (reached, false)
    }
}

fn validate(opts: &RouteOptions) -> EngineResult<()> {
    if opts.cargo_capacity <= 0 {
        return Err(EngineError::InvalidQuantity { quantity: opts.cargo_capacity });
    }
    Ok(())
}

fn evaluate(source: &MarketState, target: &MarketState, dest: &Reached, opts: &RouteOptions) -> Option<TradeRoute> {
    let profit_per_unit = target.sell_price - source.buy_price;
    if profit_per_unit <= 0 || source.buy_price <= 0 {
        return None;
    }
    let roi = profit_per_unit as f64 / source.buy_price as f64;
    if roi < opts.min_roi {
        return None;
    }
    let jumps = dest.jumps();
    let total_profit = profit_per_unit * opts.cargo_capacity;
    Some(TradeRoute {
        from: source.system,
        to: target.system,
        commodity: source.commodity,
        buy_price: source.buy_price,
        sell_price: target.sell_price,
        profit_per_unit,
        total_profit,
        roi,
        path: dest.path.clone(),
        jumps,
        distance: dest.distance,
        profit_per_jump: total_profit as f64 / jumps.max(1) as f64,
    })
}

fn compare_routes(a: &TradeRoute, b: &TradeRoute) -> CmpOrdering {
    b.total_profit
        .cmp(&a.total_profit)
        .then_with(|| OrderedFloat(b.roi).cmp(&OrderedFloat(a.roi)))
        .then_with(|| a.jumps.cmp(&b.jumps))
        .then_with(|| (a.from, a.to, a.commodity).cmp(&(b.from, b.to, b.commodity)))
}

fn rank(routes: &mut Vec<TradeRoute>, limit: usize) {
    routes.sort_by(compare_routes);
    routes.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{line_universe, FOOD, NARCOTICS, ORE};

    fn finder() -> RouteFinder {
        let (map, ledger) = line_universe();
        RouteFinder::new(map, ledger)
    }

    #[test]
    fn test_single_profitable_route_within_three_jumps() {
        let opts = RouteOptions { max_jumps: 3, cargo_capacity: 20, min_roi: 0.0, limit: 10 };
        let routes = finder().find_routes_from_system(SystemId(1), &opts).unwrap();

        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.to, SystemId(4));
        assert_eq!(route.commodity, FOOD);
        assert_eq!(route.buy_price, 45);
        assert_eq!(route.sell_price, 82);
        assert_eq!(route.profit_per_unit, 37);
        assert_eq!(route.total_profit, 740);
        assert_eq!(route.jumps, 3);
        assert_eq!(route.path.as_slice(), &[SystemId(1), SystemId(2), SystemId(3), SystemId(4)]);
        assert!((route.distance - 90.0).abs() < 1e-9);
        assert!((route.roi - 37.0 / 45.0).abs() < 1e-9);
        assert!((route.profit_per_jump - 740.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_jump_bound_excludes_far_markets() {
        let opts = RouteOptions { max_jumps: 2, ..RouteOptions::default() };
        let routes = finder().find_routes_from_system(SystemId(1), &opts).unwrap();
        assert!(routes.is_empty());
    }

    #[test]
    fn test_banned_goods_are_skipped() {
        let opts = RouteOptions { max_jumps: 4, ..RouteOptions::default() };
        let routes = finder().find_routes_from_system(SystemId(3), &opts).unwrap();
        assert!(routes.iter().all(|r| r.commodity != NARCOTICS));
        assert_eq!(routes.len(), 2);
        // Same margin, so the shorter hop ranks first.
        assert_eq!(routes[0].to, SystemId(4));
        assert_eq!(routes[1].to, SystemId(5));
    }

    #[test]
    fn test_min_roi_filter() {
        let opts = RouteOptions { max_jumps: 3, min_roi: 0.9, ..RouteOptions::default() };
        assert!(finder().find_routes_from_system(SystemId(1), &opts).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_origin() {
        let err = finder().find_routes_from_system(SystemId(42), &RouteOptions::default()).unwrap_err();
        assert_eq!(err, EngineError::SystemNotFound(SystemId(42)));
    }

    #[test]
    fn test_routes_follow_live_prices() {
        let (map, ledger) = line_universe();
        let finder = RouteFinder::new(map, ledger.clone());
        ledger.reset_row(SystemId(4), FOOD, 50, 20).unwrap();
        let opts = RouteOptions { max_jumps: 3, ..RouteOptions::default() };
        assert!(finder.find_routes_from_system(SystemId(1), &opts).unwrap().is_empty());
    }

    #[test]
    fn test_best_routes_across_universe() {
        let opts = RouteOptions { max_jumps: 3, limit: 3, ..RouteOptions::default() };
        let search = finder().find_best_routes(&opts, &SearchBudget::unlimited()).unwrap();

        assert!(!search.truncated);
        assert_eq!(search.origins_searched, 5);
        assert_eq!(search.routes.len(), 3);
        assert!(search.routes.iter().all(|r| r.profit_per_unit > 0));
        assert!(search.routes.windows(2).all(|w| w[0].total_profit >= w[1].total_profit));
        assert_eq!(search.routes[0].jumps, 1);
        assert_eq!((search.routes[0].from, search.routes[0].to), (SystemId(3), SystemId(4)));
    }

    #[test]
    fn test_cancelled_search_is_truncated() {
        let flag = CancelFlag::new();
        flag.cancel();
        let budget = SearchBudget::unlimited().cancellable(flag);
        let search = finder().find_best_routes(&RouteOptions::default(), &budget).unwrap();
        assert!(search.truncated);
        assert_eq!(search.origins_searched, 0);
        assert!(search.routes.is_empty());
    }

    #[test]
    fn test_deadline_mid_search_keeps_completed_origins() {
        let (map, ledger) = line_universe();
        let finder = RouteFinder::new(map, ledger.clone());
        // System 5 is only in range from origin 2 onward. Its Ore row stalls
        // that origin for the full 1s lock wait, well past the deadline.
        let _held = ledger.hold_row(SystemId(5), ORE);
        let budget = SearchBudget::with_timeout(Duration::from_millis(300));

        let opts = RouteOptions { max_jumps: 3, ..RouteOptions::default() };
        let search = finder.find_best_routes(&opts, &budget).unwrap();

        assert!(search.truncated);
        assert!(search.origins_searched >= 1);
        assert!(search.origins_searched < 5);
        assert!(!search.routes.is_empty());
        assert!(search.routes.iter().any(|r| r.from == SystemId(1) && r.to == SystemId(4)));
    }

    #[test]
    fn test_expired_deadline_is_truncated() {
        let budget = SearchBudget::with_deadline(Instant::now());
        let search = finder().find_best_routes(&RouteOptions::default(), &budget).unwrap();
        assert!(search.truncated);
    }

    #[test]
    fn test_zero_cargo_rejected() {
        let opts = RouteOptions { cargo_capacity: 0, ..RouteOptions::default() };
        assert!(matches!(
            finder().find_routes_from_system(SystemId(1), &opts),
            Err(EngineError::InvalidQuantity { quantity: 0 })
        ));
    }
}
