pub mod models;
pub mod generator;
pub mod store;
pub mod hub;
pub mod service;
pub mod scheduler;

pub use models::{DataPoint, Timestamp, TrackedStock};
pub use generator::PriceGenerator;
pub use store::{WatchlistStore, WatchlistState, PriceTick};
pub use hub::{BroadcastHub, Subscription, SessionId, Notification, Origin, WatchlistEvent};
pub use service::WatchlistService;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState, Activity};
