//! Error types for watchlist commands.
//!
//! Every variant is an expected, recoverable condition reported back to the
//! caller that issued the command. None of them is ever broadcast.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchlistError {
    /// The normalized symbol is already on the watchlist.
    #[error("Stock already exists: {0}")]
    AlreadyTracked(String),

    /// The normalized symbol is not on the watchlist.
    #[error("Stock not found: {0}")]
    NotTracked(String),

    /// The symbol was empty or blank after trimming.
    #[error("Symbol is required")]
    InvalidSymbol,
}

/// Crate-wide `Result` alias defaulting to [`WatchlistError`].
pub type Result<T, E = WatchlistError> = std::result::Result<T, E>;
