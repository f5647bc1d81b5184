pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{
    http::PostExClient,
    storage::{LocalStorage, MemoryStorage},
};
pub use config::AppConfig;
pub use core::{
    booking::BookingService,
    city_store::CityTable,
    learning::LearningEngine,
    normalizer::normalize,
    order_ledger::OrderLedger,
    reconciler::{StatusReconciler, SyncOutcome},
    scheduler::SyncScheduler,
};
pub use utils::error::{PostexError, Result};
