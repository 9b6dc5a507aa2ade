//! Synthetic price data.
//!
//! History is a percentage random walk with 1.5% daily volatility; live ticks
//! move by an absolute amount of up to one currency unit.

use std::collections::HashMap;
use chrono::{Duration, Utc};
use rand::Rng;

use crate::data::models::{round2, DataPoint};

/// Relative daily volatility used for generated history.
pub const HISTORY_VOLATILITY: f64 = 0.015;

/// Absolute per-tick volatility used for live updates.
pub const TICK_VOLATILITY: f64 = 1.0;

/// Floor applied to ticks so prices stay positive.
pub const MIN_PRICE: f64 = 0.01;

const UNKNOWN_BASE_MIN: f64 = 100.0;
const UNKNOWN_BASE_MAX: f64 = 300.0;

/// Symbols with a fixed starting price.
pub const KNOWN_BASE_PRICES: &[(&str, f64)] = &[
    ("AAPL", 175.50),
    ("GOOGL", 142.30),
    ("MSFT", 380.20),
    ("AMZN", 155.80),
    ("TSLA", 245.60),
    ("META", 505.20),
    ("NVDA", 485.10),
    ("NFLX", 485.90),
    ("AMD", 145.30),
    ("INTC", 42.50),
    ("CRM", 285.40),
    ("ORCL", 115.20),
];

pub struct PriceGenerator {
    base_prices: HashMap<&'static str, f64>,
}

impl Default for PriceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceGenerator {
    pub fn new() -> Self {
        Self {
            base_prices: KNOWN_BASE_PRICES.iter().copied().collect(),
        }
    }

    /// Starting price for `symbol`: the table value when known, otherwise a
    /// random base in `[100, 300)`.
    pub fn base_price(&self, symbol: &str) -> f64 {
        match self.base_prices.get(symbol) {
            Some(price) => *price,
            None => rand::thread_rng().gen_range(UNKNOWN_BASE_MIN..UNKNOWN_BASE_MAX),
        }
    }

    /// Generates `days + 1` daily points ending today, oldest first.
    ///
    /// Each step is rounded before the next one is drawn, so rounding compounds
    /// along the walk.
    pub fn generate_history(&self, symbol: &str, days: usize) -> Vec<DataPoint> {
        let mut rng = rand::thread_rng();
        let today = Utc::now().date_naive();
        let mut price = self.base_price(symbol);
        let mut data = Vec::with_capacity(days + 1);

        for offset in (0..=days).rev() {
            let date = today - Duration::days(offset as i64);
            let change = rng.gen_range(-HISTORY_VOLATILITY..=HISTORY_VOLATILITY);
            price = round2(price * (1.0 + change));
            data.push(DataPoint::on_date(date, price));
        }

        data
    }

    /// Produces the next live tick from `last_price`.
    pub fn next_tick(&self, last_price: f64) -> DataPoint {
        let change = rand::thread_rng().gen_range(-TICK_VOLATILITY..=TICK_VOLATILITY);
        let price = round2(last_price + change).max(MIN_PRICE);
        DataPoint::at_instant(Utc::now(), price)
    }
}
