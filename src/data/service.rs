//! Command surface shared by WebSocket sessions, the REST API and the scheduler.
//!
//! Every successful mutation is published to the hub right after the store
//! accepts it; failures go back to the caller and are never broadcast.

use std::sync::Arc;
use log::{info, warn};

use crate::data::hub::{BroadcastHub, SessionId, Subscription, WatchlistEvent};
use crate::data::models::{DataPoint, TrackedStock};
use crate::data::store::{normalize_symbol, PriceTick, WatchlistState, WatchlistStore};
use crate::error::Result;

#[derive(Clone)]
pub struct WatchlistService {
    store: Arc<WatchlistStore>,
    hub: Arc<BroadcastHub>,
}

impl WatchlistService {
    pub fn new(store: Arc<WatchlistStore>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    pub fn store(&self) -> &Arc<WatchlistStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Adds `symbol` and publishes `StockAdded`.
    ///
    /// The publication happens inside the store's critical section, so every
    /// subscriber sees adds, removes and ticks in the order they were applied.
    pub fn add_stock(&self, source: Option<SessionId>, symbol: &str) -> Result<TrackedStock> {
        let mut delivered = 0;
        let stock = self
            .store
            .add_with(symbol, |stock| {
                delivered = self.hub.publish(source, WatchlistEvent::StockAdded {
                    symbol: stock.symbol.clone(),
                    stock: stock.clone(),
                    by: source,
                });
            })
            .map_err(|e| {
                warn!("Add {:?} rejected: {}", symbol, e);
                e
            })?;

        info!("Stock {} added by {} ({} subscribers notified)",
              stock.symbol, describe(source), delivered);
        Ok(stock)
    }

    pub fn remove_stock(&self, source: Option<SessionId>, symbol: &str) -> Result<()> {
        let symbol = normalize_symbol(symbol)?;
        let mut delivered = 0;
        self.store
            .remove_with(&symbol, |removed| {
                delivered = self.hub.publish(source, WatchlistEvent::StockRemoved {
                    symbol: removed.to_string(),
                    by: source,
                });
            })
            .map_err(|e| {
                warn!("Remove {} rejected: {}", symbol, e);
                e
            })?;

        info!("Stock {} removed by {} ({} subscribers notified)",
              symbol, describe(source), delivered);
        Ok(())
    }

    /// Applies a simulated tick and publishes it as system activity.
    pub fn tick_stock(&self, symbol: &str) -> Option<PriceTick> {
        self.store.apply_tick_with(symbol, |tick| {
            self.hub.publish(None, WatchlistEvent::PriceUpdated {
                symbol: tick.symbol.clone(),
                price: tick.point.price,
                change: tick.change,
                change_percent: tick.change_percent,
                timestamp: tick.point.timestamp.clone(),
            });
        })
    }

    pub fn list_stocks(&self) -> WatchlistState {
        self.store.snapshot()
    }

    pub fn get_stock(&self, symbol: &str) -> Result<TrackedStock> {
        self.store.get(symbol)
    }

    pub fn get_history(&self, symbol: &str, days: usize) -> Result<Vec<DataPoint>> {
        self.store.history(symbol, days)
    }

    /// Subscribes a new session and tells everyone the new client count.
    pub fn connect(&self) -> Subscription {
        let subscription = self.hub.subscribe();
        self.publish_client_count();
        subscription
    }

    pub fn disconnect(&self, subscription: Subscription) {
        self.hub.unsubscribe(subscription);
        self.publish_client_count();
    }

    /// Broadcasts the current subscriber count. Sessions whose subscription
    /// was dropped rather than handed to [`disconnect`](Self::disconnect)
    /// call this once the drop has happened.
    pub fn publish_client_count(&self) {
        self.hub.publish_subscriber_count();
    }

    pub fn client_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

fn describe(source: Option<SessionId>) -> String {
    match source {
        Some(id) => format!("session {}", id),
        None => "system".to_string(),
    }
}
