//! Client-side mirror of the watchlist.
//!
//! A client applies its own add/remove optimistically, then reconciles every
//! notification the hub sends back with one rule set keyed on [`Origin`]:
//! `Local` copies confirm what is already shown, `Remote` copies are applied
//! only when they change something. No code path special-cases "my own action",
//! and an echo can never duplicate an entry.

use std::collections::{HashMap, HashSet};

use crate::config::MAX_SERIES_LEN;
use crate::data::hub::{Notification, Origin, WatchlistEvent};
use crate::data::models::{DataPoint, TrackedStock};
use crate::data::store::WatchlistState;

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Shown immediately after a local add, before the server confirms it.
    Pending,
    Confirmed(TrackedStock),
}

/// What a call to [`LocalView::apply`] did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Confirmed,
    Removed,
    Updated,
    /// Already reflected locally (an echo) or about a symbol not shown.
    Ignored,
}

#[derive(Debug, Default)]
pub struct LocalView {
    entries: HashMap<String, Entry>,
    pending_removals: HashSet<String>,
    client_count: usize,
}

impl LocalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole view with a server snapshot.
    pub fn bootstrap(&mut self, snapshot: WatchlistState) {
        self.entries = snapshot
            .into_iter()
            .map(|(symbol, stock)| (symbol, Entry::Confirmed(stock)))
            .collect();
        self.pending_removals.clear();
    }

    pub fn optimistic_add(&mut self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        self.pending_removals.remove(&symbol);
        self.entries.entry(symbol).or_insert(Entry::Pending);
    }

    pub fn optimistic_remove(&mut self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if self.entries.remove(&symbol).is_some() {
            self.pending_removals.insert(symbol);
        }
    }

    /// Rolls back an optimistic edit the server rejected.
    ///
    /// A rejected add drops its placeholder. A rejected remove has nothing to
    /// restore locally; the client re-bootstraps to get the entry back.
    pub fn reject(&mut self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if matches!(self.entries.get(&symbol), Some(Entry::Pending)) {
            self.entries.remove(&symbol);
        }
        self.pending_removals.remove(&symbol);
    }

    pub fn apply(&mut self, notification: Notification) -> Reconciled {
        match notification.event {
            WatchlistEvent::StockAdded { symbol, stock, .. } => match self.entries.get(&symbol) {
                Some(Entry::Pending) => {
                    self.entries.insert(symbol, Entry::Confirmed(stock));
                    Reconciled::Confirmed
                }
                Some(Entry::Confirmed(_)) => Reconciled::Ignored,
                None if notification.origin == Origin::Local
                    && self.pending_removals.contains(&symbol) =>
                {
                    // Added then removed locally before the echo came back.
                    Reconciled::Ignored
                }
                None => {
                    self.entries.insert(symbol, Entry::Confirmed(stock));
                    Reconciled::Inserted
                }
            },
            WatchlistEvent::StockRemoved { symbol, .. } => {
                let was_pending = self.pending_removals.remove(&symbol);
                match self.entries.remove(&symbol) {
                    Some(_) => Reconciled::Removed,
                    None if was_pending => Reconciled::Confirmed,
                    None => Reconciled::Ignored,
                }
            }
            WatchlistEvent::PriceUpdated { symbol, price, change, change_percent, timestamp } => {
                match self.entries.get_mut(&symbol) {
                    Some(Entry::Confirmed(stock)) => {
                        stock.current = price;
                        stock.change = change;
                        stock.change_percent = change_percent;
                        stock.data.push(DataPoint { timestamp, price });
                        // Same bound the server keeps.
                        if stock.data.len() > MAX_SERIES_LEN {
                            let overflow = stock.data.len() - MAX_SERIES_LEN;
                            stock.data.drain(..overflow);
                        }
                        Reconciled::Updated
                    }
                    _ => Reconciled::Ignored,
                }
            }
            WatchlistEvent::ClientCount { count } => {
                self.client_count = count;
                Reconciled::Updated
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Entry> {
        self.entries.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.entries.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.client_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use chrono::Utc;
    use crate::data::models::Timestamp;
    use crate::data::hub::BroadcastHub;
    use crate::data::service::WatchlistService;
    use crate::data::store::WatchlistStore;

    fn service() -> WatchlistService {
        WatchlistService::new(
            Arc::new(WatchlistStore::default()),
            Arc::new(BroadcastHub::new(64)),
        )
    }

    fn drain(sub: &mut crate::data::hub::Subscription, view: &mut LocalView) -> Vec<Reconciled> {
        std::iter::from_fn(|| sub.try_recv())
            .map(|notification| view.apply(notification))
            .collect()
    }

    #[test]
    fn test_local_echo_confirms_without_duplicate() {
        let service = service();
        let mut a = service.connect();
        let mut b = service.connect();
        let mut view_a = LocalView::new();
        let mut view_b = LocalView::new();

        view_a.optimistic_add("aapl");
        assert_eq!(view_a.get("AAPL"), Some(&Entry::Pending));
        service.add_stock(Some(a.session_id()), "aapl").unwrap();

        let applied_a = drain(&mut a, &mut view_a);
        let applied_b = drain(&mut b, &mut view_b);

        assert!(applied_a.contains(&Reconciled::Confirmed));
        assert!(applied_b.contains(&Reconciled::Inserted));
        assert_eq!(view_a.symbols(), vec!["AAPL".to_string()]);
        assert_eq!(view_b.symbols(), vec!["AAPL".to_string()]);
        assert!(matches!(view_a.get("AAPL"), Some(Entry::Confirmed(_))));
        assert_eq!(view_a.client_count(), 2);
    }

    #[test]
    fn test_duplicate_remote_add_is_ignored() {
        let service = service();
        service.add_stock(None, "MSFT").unwrap();
        let mut view = LocalView::new();
        view.bootstrap(service.list_stocks());

        let stock = service.get_stock("MSFT").unwrap();
        let echo = Notification {
            event: WatchlistEvent::StockAdded { symbol: "MSFT".to_string(), stock, by: None },
            origin: Origin::Remote,
        };
        assert_eq!(view.apply(echo), Reconciled::Ignored);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_local_remove_echo_confirms() {
        let service = service();
        let mut a = service.connect();
        let mut b = service.connect();
        service.add_stock(None, "NVDA").unwrap();

        let mut view_a = LocalView::new();
        let mut view_b = LocalView::new();
        drain(&mut a, &mut view_a);
        drain(&mut b, &mut view_b);

        view_a.optimistic_remove("NVDA");
        assert!(view_a.is_empty());
        service.remove_stock(Some(a.session_id()), "NVDA").unwrap();

        assert!(drain(&mut a, &mut view_a).contains(&Reconciled::Confirmed));
        assert!(drain(&mut b, &mut view_b).contains(&Reconciled::Removed));
        assert!(view_a.is_empty());
        assert!(view_b.is_empty());
    }

    #[test]
    fn test_add_then_remove_before_echo() {
        let service = service();
        let mut a = service.connect();
        let mut view = LocalView::new();

        view.optimistic_add("AMD");
        service.add_stock(Some(a.session_id()), "AMD").unwrap();
        view.optimistic_remove("AMD");
        service.remove_stock(Some(a.session_id()), "AMD").unwrap();

        drain(&mut a, &mut view);
        assert!(view.is_empty());
    }

    #[test]
    fn test_rejected_add_rolls_back() {
        let service = service();
        let mut view = LocalView::new();

        // Someone else got there first; our add comes back AlreadyTracked.
        service.add_stock(None, "TSLA").unwrap();
        view.optimistic_add("tsla");
        assert!(service.add_stock(None, "tsla").is_err());
        view.reject("TSLA");
        assert!(view.is_empty());

        view.bootstrap(service.list_stocks());
        assert!(matches!(view.get("TSLA"), Some(Entry::Confirmed(_))));
    }

    #[test]
    fn test_price_update_applies_to_known_symbols_only() {
        let service = service();
        let mut a = service.connect();
        service.add_stock(None, "INTC").unwrap();
        let mut view = LocalView::new();
        drain(&mut a, &mut view);

        let tick = service.tick_stock("INTC").unwrap();
        assert!(drain(&mut a, &mut view).contains(&Reconciled::Updated));
        match view.get("INTC") {
            Some(Entry::Confirmed(stock)) => {
                assert_eq!(stock.current, tick.point.price);
                assert_eq!(stock.change, tick.change);
                assert_eq!(stock.data.last(), Some(&tick.point));
            }
            other => panic!("unexpected entry {:?}", other),
        }

        let stray = Notification {
            event: WatchlistEvent::PriceUpdated {
                symbol: "GONE".to_string(),
                price: 1.0,
                change: 0.0,
                change_percent: 0.0,
                timestamp: Timestamp::Instant(Utc::now()),
            },
            origin: Origin::Remote,
        };
        assert_eq!(view.apply(stray), Reconciled::Ignored);
        assert!(view.get("GONE").is_none());
    }

    #[test]
    fn test_mirrored_series_matches_server_bound() {
        let service = service();
        let mut sub = service.connect();
        service.add_stock(None, "CRM").unwrap();
        let mut view = LocalView::new();
        drain(&mut sub, &mut view);

        for _ in 0..400 {
            service.tick_stock("CRM").unwrap();
            drain(&mut sub, &mut view);
        }

        let server = service.get_stock("CRM").unwrap();
        match view.get("CRM") {
            Some(Entry::Confirmed(stock)) => {
                assert_eq!(stock.data.len(), MAX_SERIES_LEN);
                assert_eq!(stock.data.last(), server.data.last());
                assert_eq!(stock.current, server.current);
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }
}
