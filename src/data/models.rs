use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Rounds a price to two fraction digits.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// When a data point was observed: a calendar day for generated history,
/// an instant for live ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

/// One price observation, serialized in the `{x, y}` shape charting clients expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "x")]
    pub timestamp: Timestamp,
    #[serde(rename = "y")]
    pub price: f64,
}

impl DataPoint {
    pub fn on_date(date: NaiveDate, price: f64) -> Self {
        Self {
            timestamp: Timestamp::Date(date),
            price,
        }
    }

    pub fn at_instant(instant: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp: Timestamp::Instant(instant),
            price,
        }
    }
}

/// A symbol on the watchlist together with its series and derived figures.
///
/// `current`, `change` and `change_percent` are only ever written through
/// [`TrackedStock::refresh_derived`], so they always agree with the tail of `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedStock {
    pub symbol: String,
    pub data: Vec<DataPoint>,
    pub current: f64,
    pub change: f64,
    pub change_percent: f64,
    pub color: String,
    pub added_at: DateTime<Utc>,
}

impl TrackedStock {
    pub fn new(symbol: String, data: Vec<DataPoint>, color: String) -> Self {
        let mut stock = Self {
            symbol,
            data,
            current: 0.0,
            change: 0.0,
            change_percent: 0.0,
            color,
            added_at: Utc::now(),
        };
        stock.refresh_derived();
        stock
    }

    /// Recomputes `current`, `change` and `change_percent` from the last two points.
    pub fn refresh_derived(&mut self) {
        let len = self.data.len();
        let Some(last) = self.data.last() else {
            self.current = 0.0;
            self.change = 0.0;
            self.change_percent = 0.0;
            return;
        };

        self.current = last.price;
        if len < 2 {
            self.change = 0.0;
            self.change_percent = 0.0;
            return;
        }

        let previous = self.data[len - 2].price;
        self.change = round2(self.current - previous);
        self.change_percent = if previous != 0.0 {
            round2(self.change / previous * 100.0)
        } else {
            0.0
        };
    }
}
