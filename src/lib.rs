//! Real-time collaborative stock watchlist.
//!
//! One shared watchlist lives in [`data::WatchlistStore`]. Every accepted
//! mutation fans out through [`data::BroadcastHub`] to all connected sessions,
//! each copy tagged `Local` for the session that caused it and `Remote` for
//! everyone else.

pub mod config;
pub mod error;
pub mod data;
pub mod client;
pub mod websocket;
pub mod api;

pub use error::{Result, WatchlistError};
