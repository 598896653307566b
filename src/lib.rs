pub mod collection;
pub mod collectors;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod setup;
pub mod storage;

pub use collection::{CollectionRound, CollectionService};
pub use health::{ApplicationHealth, HealthEvaluator, HealthStatus};
