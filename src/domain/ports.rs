use crate::domain::model::{
    AirwayBill, CarrierShipment, CityFilter, CityPage, CityRecord, CityStats, CityStatus,
    CreatedShipment, Pagination, ShipmentOrder, ShipmentPayload,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Raw byte storage for the JSON snapshots.
pub trait Storage: Send + Sync {
    /// Held for the duration of one read-modify-write of a snapshot.
    type Lock: Send;

    /// Exclusive lock named after `path`. Other handles, including ones in
    /// other processes sharing the same data directory, wait until the
    /// returned guard is dropped.
    fn lock(&self, path: &str) -> impl std::future::Future<Output = Result<Self::Lock>> + Send;
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Keyed table of learned city mappings. Every method accepting a city name
/// normalizes it first, so raw names and keys are interchangeable.
#[async_trait]
pub trait CityStore: Send + Sync {
    async fn lookup(&self, city: &str) -> Result<Option<CityRecord>>;
    async fn record_success(&self, raw_name: &str, carrier_format: &str) -> Result<CityRecord>;
    async fn record_failure(&self, raw_name: &str) -> Result<CityRecord>;
    async fn insert(
        &self,
        raw_name: &str,
        carrier_format: &str,
        status: CityStatus,
    ) -> Result<CityRecord>;
    async fn list(&self, filter: CityFilter, pagination: Pagination) -> Result<CityPage>;
    async fn delete(&self, city: &str) -> Result<bool>;
    async fn force_verify(&self, city: &str) -> Result<Option<CityRecord>>;
    async fn stats(&self) -> Result<CityStats>;
}

#[async_trait]
pub trait CarrierClient: Send + Sync {
    async fn create_shipment(&self, payload: &ShipmentPayload) -> Result<CreatedShipment>;
    async fn list_shipments(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<CarrierShipment>>;
    async fn fetch_documents(&self, tracking_numbers: &[String]) -> Result<AirwayBill>;
}

/// Per-order tracking metadata owned on the platform side.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Reserves the next order reference number.
    async fn next_reference(&self) -> Result<u64>;
    /// Hands back an unused reservation. Only the most recent one can be
    /// returned; returns false when a later reservation already exists.
    async fn release_reference(&self, reference: u64) -> Result<bool>;
    async fn record_booking(&self, order: ShipmentOrder) -> Result<()>;
    async fn get(&self, tracking_number: &str) -> Result<Option<ShipmentOrder>>;
    async fn find_by_tracking(
        &self,
        tracking_numbers: &[String],
    ) -> Result<HashMap<String, ShipmentOrder>>;
    async fn update_carrier_status(
        &self,
        tracking_number: &str,
        status: &str,
        synced_at: DateTime<Utc>,
        note: String,
    ) -> Result<()>;
}
