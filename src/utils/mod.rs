//! Utility modules

pub mod alerts;
pub mod database;
pub mod ethplorer;
pub mod logger;
pub mod metrics;

pub use alerts::{notifier_from_config, GrowthAlert, Notifier};
pub use database::DatabaseService;
pub use ethplorer::EthplorerClient;
pub use logger::init_logger;
pub use metrics::MetricsService;
