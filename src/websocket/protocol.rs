use serde::{Deserialize, Serialize};

use crate::config::HISTORY_DAYS;
use crate::data::hub::SessionId;
use crate::data::models::{DataPoint, TrackedStock};
use crate::data::store::WatchlistState;

/// Commands a client sends over its WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    AddStock { symbol: String },
    RemoveStock { symbol: String },
    ListStocks,
    GetStock { symbol: String },
    GetHistory {
        symbol: String,
        #[serde(default)]
        days: Option<usize>,
    },
}

impl ClientCommand {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ClientCommand::AddStock { symbol }
            | ClientCommand::RemoveStock { symbol }
            | ClientCommand::GetStock { symbol }
            | ClientCommand::GetHistory { symbol, .. } => Some(symbol),
            ClientCommand::ListStocks => None,
        }
    }

    pub fn history_days(&self) -> usize {
        match self {
            ClientCommand::GetHistory { days: Some(days), .. } => *days,
            _ => HISTORY_DAYS,
        }
    }
}

/// Replies addressed to one session only. Broadcast notifications travel
/// separately as [`Notification`](crate::data::hub::Notification)s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    InitialData {
        session_id: SessionId,
        stocks: Vec<TrackedStock>,
        client_count: usize,
    },
    StockList {
        stocks: Vec<TrackedStock>,
    },
    Stock {
        stock: TrackedStock,
    },
    HistoryData {
        symbol: String,
        data: Vec<DataPoint>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

impl ServerReply {
    pub fn error(message: impl Into<String>, symbol: Option<&str>) -> Self {
        ServerReply::Error {
            message: message.into(),
            symbol: symbol.map(str::to_string),
        }
    }
}

/// Snapshot entries ordered by symbol so every client renders the same list.
pub fn sorted_stocks(state: WatchlistState) -> Vec<TrackedStock> {
    let mut stocks: Vec<TrackedStock> = state.into_values().collect();
    stocks.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    stocks
}
