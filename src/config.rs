use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use log::warn;

// Server Configuration
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:3000";
pub const STATS_INTERVAL_SECS: u64 = 60;

// Scheduler Configuration
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_ACTIVITY_MIN_SECS: u64 = 15;
pub const DEFAULT_ACTIVITY_MAX_SECS: u64 = 20;
pub const DEFAULT_ACTIVITY_PROBABILITY: f64 = 0.5;

// Broadcast Configuration
pub const SUBSCRIBER_BUFFER_SIZE: usize = 128;
pub const SESSION_REPLY_BUFFER_SIZE: usize = 100;

// Watchlist Configuration
pub const DEFAULT_SEED_SYMBOLS: &str = "AAPL,GOOGL,MSFT";
pub const HISTORY_DAYS: usize = 365;
pub const MAX_SERIES_LEN: usize = 365;

pub struct Config {
    pub bind_address: String,
    pub api_bind_address: String,
    pub log_level: String,
    pub tick_interval_secs: u64,
    pub activity_min_secs: u64,
    pub activity_max_secs: u64,
    pub activity_probability: f64,
    pub subscriber_buffer_size: usize,
    pub seed_symbols: Vec<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_API_BIND_ADDRESS.to_string()),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string()),
            tick_interval_secs: env_or("TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL_SECS),
            activity_min_secs: env_or("ACTIVITY_MIN_SECS", DEFAULT_ACTIVITY_MIN_SECS),
            activity_max_secs: env_or("ACTIVITY_MAX_SECS", DEFAULT_ACTIVITY_MAX_SECS),
            activity_probability: env_or("ACTIVITY_PROBABILITY", DEFAULT_ACTIVITY_PROBABILITY),
            subscriber_buffer_size: env_or("SUBSCRIBER_BUFFER_SIZE", SUBSCRIBER_BUFFER_SIZE),
            seed_symbols: parse_symbol_list(
                &env::var("SEED_SYMBOLS").unwrap_or_else(|_| DEFAULT_SEED_SYMBOLS.to_string()),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if SocketAddr::from_str(&self.bind_address).is_err() {
            return Err(format!("Invalid WebSocket bind address: {}", self.bind_address));
        }

        if SocketAddr::from_str(&self.api_bind_address).is_err() {
            return Err(format!("Invalid API bind address: {}", self.api_bind_address));
        }

        if self.tick_interval_secs == 0 {
            return Err("Tick interval must be at least 1 second".to_string());
        }

        if self.activity_min_secs == 0 || self.activity_min_secs > self.activity_max_secs {
            return Err(format!(
                "Invalid activity period range: {}..={} seconds",
                self.activity_min_secs, self.activity_max_secs
            ));
        }

        if !(0.0..=1.0).contains(&self.activity_probability) {
            return Err(format!(
                "Activity probability must be within [0, 1], got {}",
                self.activity_probability
            ));
        }

        if self.subscriber_buffer_size == 0 {
            return Err("Subscriber buffer size must be greater than 0".to_string());
        }

        if self.seed_symbols.is_empty() {
            warn!("No seed symbols configured - watchlist starts empty");
        }

        Ok(())
    }

    pub fn log_config(&self) {
        println!("Server Configuration:");
        println!("  WebSocket Bind Address: {}", self.bind_address);
        println!("  API Bind Address: {}", self.api_bind_address);
        println!("  Log Level: {}", self.log_level);
        println!("  Tick Interval: {}s", self.tick_interval_secs);
        println!(
            "  Activity Period: {}-{}s (p={})",
            self.activity_min_secs, self.activity_max_secs, self.activity_probability
        );
        println!("  Subscriber Buffer: {}", self.subscriber_buffer_size);
        println!("  Seed Symbols: {}", self.seed_symbols.join(","));
    }
}
