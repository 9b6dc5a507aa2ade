use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use log::{debug, info};

use crate::config::Config;
use crate::data::service::WatchlistService;
use crate::data::store::PriceTick;
use crate::error::WatchlistError;

/// Tickers the activity task adds and removes on behalf of "other users".
/// Kept disjoint from the generator's known-price table.
pub const OTHER_USER_SYMBOLS: &[&str] = &[
    "UBER", "COIN", "PLTR", "SQ", "SHOP", "DIS", "NKE", "PYPL",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub activity_min: Duration,
    pub activity_max: Duration,
    pub activity_probability: f64,
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            activity_min: Duration::from_secs(config.activity_min_secs),
            activity_max: Duration::from_secs(config.activity_max_secs),
            activity_probability: config.activity_probability,
        }
    }
}

/// What one round of simulated third-party activity did.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// Coin flip said stay quiet, or nobody is connected to see it.
    Idle,
    Added(String),
    Removed(String),
    /// The store refused the command because reality moved on; swallowed.
    Rejected(WatchlistError),
}

/// Drives the two periodic jobs: price ticks and simulated user activity.
///
/// Both go through [`WatchlistService`] like any other client, so they are
/// subject to the same uniqueness and not-tracked rules.
pub struct Scheduler {
    service: WatchlistService,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(service: WatchlistService, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            state: Mutex::new(SchedulerState::Stopped),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handles_guard(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_state(&self) -> SchedulerState {
        self.state_guard().clone()
    }

    /// Spawns both periodic tasks. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<String, String> {
        let mut state = self.state_guard();
        if *state == SchedulerState::Running {
            return Err("Scheduler is already running".to_string());
        }

        let handles = vec![self.spawn_tick_task(), self.spawn_activity_task()];
        *self.handles_guard() = handles;
        *state = SchedulerState::Running;

        info!("⏱️ Scheduler started: ticks every {:?}, activity every {:?}-{:?}",
              self.config.tick_interval, self.config.activity_min, self.config.activity_max);
        Ok("Scheduler started".to_string())
    }

    pub fn stop(&self) -> Result<String, String> {
        let mut state = self.state_guard();
        if *state == SchedulerState::Stopped {
            return Err("Scheduler is not running".to_string());
        }

        for handle in self.handles_guard().drain(..) {
            handle.abort();
        }
        *state = SchedulerState::Stopped;

        info!("🛑 Scheduler stopped");
        Ok("Scheduler stopped".to_string())
    }

    /// Ticks one uniformly chosen symbol. `None` when the watchlist is empty
    /// or the chosen symbol was removed in the meantime.
    pub fn tick_once(&self) -> Option<PriceTick> {
        tick_random_symbol(&self.service)
    }

    pub fn simulate_activity_once(&self) -> Activity {
        simulate_activity(&self.service, self.config.activity_probability)
    }

    fn spawn_tick_task(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let period = self.config.tick_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);
            // The first tick of a tokio interval fires immediately.
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;
                if let Some(tick) = tick_random_symbol(&service) {
                    debug!("Price update: {} = ${:.2} ({:+.2})",
                           tick.symbol, tick.point.price, tick.change);
                }
            }
        })
    }

    fn spawn_activity_task(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(activity_delay(&config)).await;
                simulate_activity(&service, config.activity_probability);
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in self.handles_guard().drain(..) {
            handle.abort();
        }
    }
}

fn activity_delay(config: &SchedulerConfig) -> Duration {
    let min = config.activity_min.as_millis() as u64;
    let max = config.activity_max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

fn tick_random_symbol(service: &WatchlistService) -> Option<PriceTick> {
    let symbol = service.store().symbols().choose(&mut rand::thread_rng())?.clone();
    service.tick_stock(&symbol)
}

fn simulate_activity(service: &WatchlistService, probability: f64) -> Activity {
    // Draw everything up front; the rng is not held across the store calls.
    let (acts, add, symbol) = {
        let mut rng = rand::thread_rng();
        let acts = rng.gen_bool(probability);
        let add = rng.gen_bool(0.5);
        let symbol = OTHER_USER_SYMBOLS
            .choose(&mut rng)
            .copied()
            .unwrap_or("UBER");
        (acts, add, symbol)
    };

    if !acts || service.client_count() == 0 {
        return Activity::Idle;
    }

    let outcome = if add {
        service.add_stock(None, symbol).map(|_| Activity::Added(symbol.to_string()))
    } else {
        service.remove_stock(None, symbol).map(|_| Activity::Removed(symbol.to_string()))
    };

    match outcome {
        Ok(activity) => {
            info!("Simulated activity: {:?}", activity);
            activity
        }
        Err(e) => {
            debug!("Simulated activity on {} ignored: {}", symbol, e);
            Activity::Rejected(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::data::generator::KNOWN_BASE_PRICES;
    use crate::data::hub::{BroadcastHub, Origin, WatchlistEvent};
    use crate::data::store::WatchlistStore;

    fn service() -> WatchlistService {
        WatchlistService::new(
            Arc::new(WatchlistStore::default()),
            Arc::new(BroadcastHub::new(64)),
        )
    }

    fn config(probability: f64) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(20),
            activity_min: Duration::from_millis(20),
            activity_max: Duration::from_millis(30),
            activity_probability: probability,
        }
    }

    #[test]
    fn test_other_user_pool_is_disjoint_from_known_prices() {
        for symbol in OTHER_USER_SYMBOLS {
            assert!(KNOWN_BASE_PRICES.iter().all(|(known, _)| known != symbol));
        }
    }

    #[test]
    fn test_tick_once_on_empty_watchlist() {
        let scheduler = Scheduler::new(service(), config(1.0));
        assert!(scheduler.tick_once().is_none());
    }

    #[test]
    fn test_tick_once_publishes_remote_update() {
        let service = service();
        let mut sub = service.connect();
        service.add_stock(Some(sub.session_id()), "AAPL").unwrap();
        let scheduler = Scheduler::new(service.clone(), config(1.0));

        let tick = scheduler.tick_once().unwrap();
        assert_eq!(tick.symbol, "AAPL");

        let last = std::iter::from_fn(|| sub.try_recv()).last().unwrap();
        assert_eq!(last.origin, Origin::Remote);
        assert!(matches!(last.event, WatchlistEvent::PriceUpdated { ref symbol, .. } if symbol == "AAPL"));
    }

    #[test]
    fn test_activity_idle_without_clients() {
        let scheduler = Scheduler::new(service(), config(1.0));
        for _ in 0..20 {
            assert_eq!(scheduler.simulate_activity_once(), Activity::Idle);
        }
    }

    #[test]
    fn test_activity_idle_with_zero_probability() {
        let service = service();
        let _sub = service.connect();
        let scheduler = Scheduler::new(service, config(0.0));
        for _ in 0..20 {
            assert_eq!(scheduler.simulate_activity_once(), Activity::Idle);
        }
    }

    #[test]
    fn test_activity_goes_through_normal_commands() {
        let service = service();
        let _sub = service.connect();
        let scheduler = Scheduler::new(service.clone(), config(1.0));

        for _ in 0..100 {
            match scheduler.simulate_activity_once() {
                Activity::Added(symbol) => {
                    assert!(OTHER_USER_SYMBOLS.contains(&symbol.as_str()));
                    assert!(service.store().contains(&symbol));
                }
                Activity::Removed(symbol) => {
                    assert!(OTHER_USER_SYMBOLS.contains(&symbol.as_str()));
                    assert!(!service.store().contains(&symbol));
                }
                Activity::Rejected(e) => {
                    assert!(matches!(
                        e,
                        WatchlistError::AlreadyTracked(_) | WatchlistError::NotTracked(_)
                    ));
                }
                Activity::Idle => panic!("probability 1.0 with a client must act"),
            }
        }

        for symbol in service.store().symbols() {
            assert!(OTHER_USER_SYMBOLS.contains(&symbol.as_str()));
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let service = service();
        let mut sub = service.connect();
        service.add_stock(None, "MSFT").unwrap();
        let scheduler = Scheduler::new(service.clone(), config(0.0));

        assert_eq!(scheduler.get_state(), SchedulerState::Stopped);
        assert!(scheduler.stop().is_err());
        assert!(scheduler.start().is_ok());
        assert!(scheduler.start().is_err());
        assert_eq!(scheduler.get_state(), SchedulerState::Running);

        let update = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notification = sub.recv().await.unwrap();
                if let WatchlistEvent::PriceUpdated { symbol, .. } = notification.event {
                    return symbol;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(update, "MSFT");

        assert!(scheduler.stop().is_ok());
        assert_eq!(scheduler.get_state(), SchedulerState::Stopped);

        // Let an in-flight tick finish, then check nothing else arrives.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while sub.try_recv().is_some() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sub.try_recv().is_none());
    }
}
