#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

pub use toml_config::{
    AppConfig, CarrierConfig, LearningConfig, MonitoringConfig, ShippingConfig, StorageConfig,
    SyncConfig, API_KEY_ENV,
};
