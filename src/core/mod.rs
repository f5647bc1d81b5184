pub mod booking;
pub mod city_store;
pub mod learning;
pub mod normalizer;
pub mod order_ledger;
pub mod reconciler;
pub mod scheduler;

pub use crate::domain::model::{CityRecord, CityResolution, CityStatus, ShipmentOrder};
pub use crate::domain::ports::{CarrierClient, CityStore, OrderStore, Storage};
pub use crate::utils::error::Result;
