use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use log::{debug, info};

use crate::config::{HISTORY_DAYS, MAX_SERIES_LEN};
use crate::data::generator::PriceGenerator;
use crate::data::models::{DataPoint, TrackedStock};
use crate::error::{Result, WatchlistError};

/// Colors handed out to newly added symbols, cycled in order.
pub const PALETTE: &[&str] = &[
    "#00f3ff", "#ff00ff", "#00ff88", "#ffaa00",
    "#bc13fe", "#ff0055", "#00ffff", "#ffff00",
];

/// Snapshot of every tracked symbol keyed by normalized symbol.
pub type WatchlistState = HashMap<String, TrackedStock>;

/// Result of a tick applied to a still-tracked symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub point: DataPoint,
    pub change: f64,
    pub change_percent: f64,
}

/// Trims and uppercases a raw symbol, rejecting blank input.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(WatchlistError::InvalidSymbol);
    }
    Ok(symbol)
}

struct Inner {
    stocks: WatchlistState,
    // Never reset, so removes don't make the next add reuse a color early.
    color_index: usize,
}

impl Inner {
    fn next_color(&mut self) -> String {
        let color = PALETTE[self.color_index % PALETTE.len()];
        self.color_index += 1;
        color.to_string()
    }
}

/// Authoritative watchlist state.
///
/// Every operation runs under a single store-wide lock, so an add's uniqueness
/// check and insert are one step and a tick can never observe a half-removed
/// entry.
pub struct WatchlistStore {
    inner: Mutex<Inner>,
    generator: PriceGenerator,
}

impl Default for WatchlistStore {
    fn default() -> Self {
        Self::new(PriceGenerator::new())
    }
}

impl WatchlistStore {
    pub fn new(generator: PriceGenerator) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stocks: HashMap::new(),
                color_index: 0,
            }),
            generator,
        }
    }

    // A panic while holding the lock cannot leave an entry half-written, since
    // each mutation is a single insert/remove/push, so poisoning is recovered.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, raw_symbol: &str) -> Result<TrackedStock> {
        self.add_with(raw_symbol, |_| ())
    }

    /// Adds `raw_symbol` and runs `on_added` before the lock is released.
    ///
    /// Anything `on_added` publishes is therefore ordered with every other
    /// store mutation. It must not call back into the store.
    pub fn add_with<F>(&self, raw_symbol: &str, on_added: F) -> Result<TrackedStock>
    where
        F: FnOnce(&TrackedStock),
    {
        let symbol = normalize_symbol(raw_symbol)?;
        let mut inner = self.lock();

        if inner.stocks.contains_key(&symbol) {
            return Err(WatchlistError::AlreadyTracked(symbol));
        }

        let history = self.generator.generate_history(&symbol, HISTORY_DAYS);
        let color = inner.next_color();
        let stock = TrackedStock::new(symbol.clone(), history, color);
        inner.stocks.insert(symbol.clone(), stock.clone());
        on_added(&stock);

        info!("Added stock: {} at ${:.2} ({})", symbol, stock.current, stock.color);
        Ok(stock)
    }

    pub fn remove(&self, raw_symbol: &str) -> Result<()> {
        self.remove_with(raw_symbol, |_| ())
    }

    /// Removes `raw_symbol`, running `on_removed` with the normalized symbol
    /// while the lock is still held.
    pub fn remove_with<F>(&self, raw_symbol: &str, on_removed: F) -> Result<()>
    where
        F: FnOnce(&str),
    {
        let symbol = normalize_symbol(raw_symbol)?;
        let mut inner = self.lock();

        match inner.stocks.remove(&symbol) {
            Some(_) => {
                on_removed(&symbol);
                info!("Removed stock: {}", symbol);
                Ok(())
            }
            None => Err(WatchlistError::NotTracked(symbol)),
        }
    }

    /// Appends a simulated tick to `raw_symbol`.
    ///
    /// Returns `None` when the symbol is not tracked (including a blank symbol);
    /// a tick racing a remove simply loses.
    pub fn apply_tick(&self, raw_symbol: &str) -> Option<PriceTick> {
        self.apply_tick_with(raw_symbol, |_| ())
    }

    /// Like [`apply_tick`](Self::apply_tick), running `on_tick` under the lock.
    pub fn apply_tick_with<F>(&self, raw_symbol: &str, on_tick: F) -> Option<PriceTick>
    where
        F: FnOnce(&PriceTick),
    {
        let symbol = normalize_symbol(raw_symbol).ok()?;
        let mut inner = self.lock();

        let Some(stock) = inner.stocks.get_mut(&symbol) else {
            debug!("Skipping tick for untracked symbol {}", symbol);
            return None;
        };

        let point = self.generator.next_tick(stock.current);
        stock.data.push(point.clone());
        if stock.data.len() > MAX_SERIES_LEN {
            let overflow = stock.data.len() - MAX_SERIES_LEN;
            stock.data.drain(..overflow);
        }
        stock.refresh_derived();

        let tick = PriceTick {
            symbol,
            point,
            change: stock.change,
            change_percent: stock.change_percent,
        };
        on_tick(&tick);
        Some(tick)
    }

    pub fn snapshot(&self) -> WatchlistState {
        self.lock().stocks.clone()
    }

    pub fn get(&self, raw_symbol: &str) -> Result<TrackedStock> {
        let symbol = normalize_symbol(raw_symbol)?;
        self.lock()
            .stocks
            .get(&symbol)
            .cloned()
            .ok_or(WatchlistError::NotTracked(symbol))
    }

    /// Last `days` points of a symbol's series, or all of them if fewer exist.
    pub fn history(&self, raw_symbol: &str, days: usize) -> Result<Vec<DataPoint>> {
        let symbol = normalize_symbol(raw_symbol)?;
        let inner = self.lock();
        let stock = inner
            .stocks
            .get(&symbol)
            .ok_or_else(|| WatchlistError::NotTracked(symbol.clone()))?;

        let start = stock.data.len().saturating_sub(days);
        Ok(stock.data[start..].to_vec())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.lock().stocks.keys().cloned().collect()
    }

    pub fn contains(&self, raw_symbol: &str) -> bool {
        normalize_symbol(raw_symbol)
            .map(|symbol| self.lock().stocks.contains_key(&symbol))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
