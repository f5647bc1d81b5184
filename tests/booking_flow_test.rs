use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use httpmock::prelude::*;
use postex_sync::config::{CarrierConfig, ShippingConfig};
use postex_sync::domain::model::{
    AirwayBill, BookingRequest, CarrierShipment, CityFilter, CityPage, CityRecord, CityStats,
    CityStatus, CreatedShipment, OrderItem, Pagination, ShipmentOrder, ShipmentPayload,
};
use postex_sync::domain::ports::{CarrierClient, CityStore, OrderStore};
use postex_sync::{
    BookingService, CityTable, LearningEngine, LocalStorage, MemoryStorage, OrderLedger,
    PostExClient, PostexError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Carrier stand-in that accepts or rejects every booking.
struct StubCarrier {
    reject_with: Option<String>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<ShipmentPayload>>,
}

impl StubCarrier {
    fn accepting() -> Self {
        Self {
            reject_with: None,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            ..Self::accepting()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierClient for StubCarrier {
    async fn create_shipment(
        &self,
        payload: &ShipmentPayload,
    ) -> postex_sync::Result<CreatedShipment> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.payloads.lock().unwrap().push(payload.clone());
        match &self.reject_with {
            Some(message) => Err(PostexError::CarrierRejection {
                code: 400,
                message: message.clone(),
                technical: message.clone(),
            }),
            None => Ok(CreatedShipment {
                tracking_number: format!("CX{:04}", n),
                order_status: "Booked".to_string(),
                order_date: Some("2026-10-19".to_string()),
            }),
        }
    }

    async fn list_shipments(
        &self,
        _start: Option<NaiveDate>,
        _end: Option<NaiveDate>,
    ) -> postex_sync::Result<Vec<CarrierShipment>> {
        Ok(Vec::new())
    }

    async fn fetch_documents(&self, _tracking_numbers: &[String]) -> postex_sync::Result<AirwayBill> {
        unimplemented!("not used by booking")
    }
}

/// Counts mutating calls on the wrapped city store.
struct CountingStore<C> {
    inner: C,
    writes: AtomicUsize,
}

impl<C> CountingStore<C> {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<C: CityStore> CityStore for CountingStore<C> {
    async fn lookup(&self, city: &str) -> postex_sync::Result<Option<CityRecord>> {
        self.inner.lookup(city).await
    }

    async fn record_success(
        &self,
        raw_name: &str,
        carrier_format: &str,
    ) -> postex_sync::Result<CityRecord> {
        self.bump();
        self.inner.record_success(raw_name, carrier_format).await
    }

    async fn record_failure(&self, raw_name: &str) -> postex_sync::Result<CityRecord> {
        self.bump();
        self.inner.record_failure(raw_name).await
    }

    async fn insert(
        &self,
        raw_name: &str,
        carrier_format: &str,
        status: CityStatus,
    ) -> postex_sync::Result<CityRecord> {
        self.bump();
        self.inner.insert(raw_name, carrier_format, status).await
    }

    async fn list(
        &self,
        filter: CityFilter,
        pagination: Pagination,
    ) -> postex_sync::Result<CityPage> {
        self.inner.list(filter, pagination).await
    }

    async fn delete(&self, city: &str) -> postex_sync::Result<bool> {
        self.bump();
        self.inner.delete(city).await
    }

    async fn force_verify(&self, city: &str) -> postex_sync::Result<Option<CityRecord>> {
        self.bump();
        self.inner.force_verify(city).await
    }

    async fn stats(&self) -> postex_sync::Result<CityStats> {
        self.inner.stats().await
    }
}

/// Order store that hands out references but cannot save a booking.
struct UnwritableLedger {
    inner: OrderLedger<MemoryStorage>,
}

#[async_trait]
impl OrderStore for UnwritableLedger {
    async fn next_reference(&self) -> postex_sync::Result<u64> {
        self.inner.next_reference().await
    }

    async fn release_reference(&self, reference: u64) -> postex_sync::Result<bool> {
        self.inner.release_reference(reference).await
    }

    async fn record_booking(&self, _order: ShipmentOrder) -> postex_sync::Result<()> {
        Err(PostexError::IoError(std::io::Error::other("disk full")))
    }

    async fn get(&self, tracking_number: &str) -> postex_sync::Result<Option<ShipmentOrder>> {
        self.inner.get(tracking_number).await
    }

    async fn find_by_tracking(
        &self,
        tracking_numbers: &[String],
    ) -> postex_sync::Result<HashMap<String, ShipmentOrder>> {
        self.inner.find_by_tracking(tracking_numbers).await
    }

    async fn update_carrier_status(
        &self,
        tracking_number: &str,
        status: &str,
        synced_at: DateTime<Utc>,
        note: String,
    ) -> postex_sync::Result<()> {
        self.inner
            .update_carrier_status(tracking_number, status, synced_at, note)
            .await
    }
}

fn shipping() -> ShippingConfig {
    ShippingConfig {
        pickup_address_code: "PK-001".to_string(),
        ..ShippingConfig::default()
    }
}

fn request(city: &str) -> BookingRequest {
    BookingRequest {
        order_id: "wc-501".to_string(),
        customer_name: "Ayesha Khan".to_string(),
        customer_phone: "03001234567".to_string(),
        delivery_address: "House 12, Street 4".to_string(),
        city: city.to_string(),
        invoice_payment: 2500.0,
        weight: None,
        dimensions: None,
        items: vec![OrderItem {
            name: "Kurta".to_string(),
            quantity: 2,
        }],
    }
}

#[tokio::test]
async fn test_unknown_city_is_learned_on_success() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1000).await?);
    let carrier = Arc::new(StubCarrier::accepting());
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::clone(&carrier),
        Arc::clone(&orders),
        shipping(),
    );

    let receipt = service.book(&request("  Sukkur Town ")).await?;

    assert_eq!(receipt.city.normalized_key, "sukkur");
    assert_eq!(receipt.city.carrier_format, "Sukkur");
    assert!(!receipt.city.is_verified);
    assert_eq!(receipt.order_ref_number, "1000");

    let record = cities.lookup("sukkur").await?.unwrap();
    assert_eq!(record.status, CityStatus::Verified);
    assert_eq!(record.success_count, 1);
    assert_eq!(record.carrier_format, "Sukkur");

    let payloads = carrier.payloads.lock().unwrap();
    assert_eq!(payloads[0].city_name, "Sukkur");
    assert_eq!(payloads[0].weight, 0.5);
    assert_eq!(payloads[0].order_details, "2x Kurta");
    assert_eq!(payloads[0].pickup_address_code, "PK-001");
    Ok(())
}

#[tokio::test]
async fn test_booking_is_recorded_in_ledger() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    cities.seed_defaults().await?;
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1000).await?);
    let service = BookingService::new(
        LearningEngine::new(cities, true),
        Arc::new(StubCarrier::accepting()),
        Arc::clone(&orders),
        shipping(),
    );

    let first = service.book(&request("Lahore")).await?;
    let second = service.book(&request("Lahore")).await?;
    assert_eq!(first.order_ref_number, "1000");
    assert_eq!(second.order_ref_number, "1001");
    assert_eq!(first.ledger_warning, None);

    let stored = orders.get(&first.tracking_number).await?.unwrap();
    assert_eq!(stored.order_id, "wc-501");
    assert_eq!(stored.local_status, "processing");
    assert_eq!(stored.carrier_status, "Booked");
    assert_eq!(stored.city_learned, "Lahore");
    assert_eq!(
        stored.notes,
        vec![format!(
            "PostEx order created - Tracking: {} Status: Booked",
            first.tracking_number
        )]
    );
    Ok(())
}

#[tokio::test]
async fn test_verified_city_causes_no_store_writes() -> Result<()> {
    let table = CityTable::open(MemoryStorage::new()).await?;
    table.seed_defaults().await?;
    let cities = Arc::new(CountingStore {
        inner: table,
        writes: AtomicUsize::new(0),
    });

    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::new(StubCarrier::accepting()),
        orders,
        shipping(),
    );

    let receipt = service.book(&request("KARACHI")).await?;
    assert!(receipt.city.is_verified);
    assert_eq!(receipt.city.carrier_format, "Karachi");
    assert_eq!(cities.writes(), 0);

    let record = cities.lookup("karachi").await?.unwrap();
    assert_eq!(record.success_count, 1);
    assert!(record.last_used.is_none());
    Ok(())
}

#[tokio::test]
async fn test_verified_city_survives_city_rejection() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    cities.seed_defaults().await?;
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::new(StubCarrier::rejecting("Invalid City Name")),
        orders,
        shipping(),
    );

    let result = service.book(&request("Karachi")).await;
    assert!(matches!(result, Err(PostexError::CarrierRejection { .. })));

    let record = cities.lookup("karachi").await?.unwrap();
    assert_eq!(record.status, CityStatus::Verified);
    assert_eq!(record.failure_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_city_rejection_blocks_next_booking() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let carrier = Arc::new(StubCarrier::rejecting("Delivery city not serviced"));
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::clone(&carrier),
        Arc::clone(&orders),
        shipping(),
    );

    let first = service.book(&request("Mithi")).await;
    assert!(matches!(first, Err(PostexError::CarrierRejection { .. })));
    assert_eq!(carrier.calls(), 1);
    assert!(orders.is_empty().await?);

    let record = cities.lookup("mithi").await?.unwrap();
    assert_eq!(record.status, CityStatus::Failed);
    assert_eq!(record.failure_count, 1);

    let second = service.book(&request("Mithi District")).await;
    match second {
        Err(PostexError::CityBlocked { failure_count, .. }) => assert_eq!(failure_count, 1),
        other => panic!("expected blocked city, got {:?}", other),
    }
    assert_eq!(carrier.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unrelated_rejection_teaches_nothing() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::new(StubCarrier::rejecting("Invalid phone number")),
        orders,
        shipping(),
    );

    assert!(service.book(&request("Mithi")).await.is_err());
    assert!(cities.lookup("mithi").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_validation_fails_before_carrier_call() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let carrier = Arc::new(StubCarrier::accepting());
    let service = BookingService::new(
        LearningEngine::new(cities, true),
        Arc::clone(&carrier),
        orders,
        shipping(),
    );

    let mut no_phone = request("Lahore");
    no_phone.customer_phone = "  ".to_string();
    assert!(matches!(
        service.book(&no_phone).await,
        Err(PostexError::ValidationError { .. })
    ));

    let mut bad_dims = request("Lahore");
    bad_dims.dimensions = Some("10x0x5".to_string());
    assert!(matches!(
        service.book(&bad_dims).await,
        Err(PostexError::ValidationError { .. })
    ));

    let mut bad_weight = request("Lahore");
    bad_weight.weight = Some(-1.0);
    assert!(matches!(
        service.book(&bad_weight).await,
        Err(PostexError::ValidationError { .. })
    ));

    assert_eq!(carrier.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_pickup_code_is_config_error() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1).await?);
    let carrier = Arc::new(StubCarrier::accepting());
    let service = BookingService::new(
        LearningEngine::new(cities, true),
        Arc::clone(&carrier),
        orders,
        ShippingConfig::default(),
    );

    let result = service.book(&request("Lahore")).await;
    assert!(matches!(result, Err(PostexError::MissingConfigError { .. })));
    assert_eq!(carrier.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_learned_city_persists_to_data_dir() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let storage = LocalStorage::new(temp_dir.path());

    {
        let cities = Arc::new(CityTable::open(storage.clone()).await?);
        let orders = Arc::new(OrderLedger::open(storage.clone(), 1000).await?);
        let service = BookingService::new(
            LearningEngine::new(cities, true),
            Arc::new(StubCarrier::accepting()),
            orders,
            shipping(),
        );
        service.book(&request("Mirpur Khas City")).await?;
    }

    assert!(temp_dir.path().join("cities.json").exists());
    assert!(temp_dir.path().join("orders.json").exists());

    let reopened = CityTable::open(storage.clone()).await?;
    let record = reopened.lookup("Mirpur Khas").await?.unwrap();
    assert_eq!(record.normalized_key, "mirpur khas");
    assert_eq!(record.carrier_format, "Mirpur Khas");
    assert_eq!(record.status, CityStatus::Verified);

    let ledger = OrderLedger::open(storage, 1000).await?;
    assert_eq!(ledger.len().await?, 1);
    assert_eq!(ledger.next_reference().await?, 1001);
    Ok(())
}

#[tokio::test]
async fn test_failed_booking_hands_reference_back() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    cities.seed_defaults().await?;
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1000).await?);

    let rejecting = Arc::new(StubCarrier::rejecting("Invalid phone number"));
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::clone(&rejecting),
        Arc::clone(&orders),
        shipping(),
    );
    assert!(service.book(&request("Lahore")).await.is_err());
    assert_eq!(rejecting.payloads.lock().unwrap()[0].order_ref_number, "1000");

    let service = BookingService::new(
        LearningEngine::new(cities, true),
        Arc::new(StubCarrier::accepting()),
        Arc::clone(&orders),
        shipping(),
    );
    let receipt = service.book(&request("Lahore")).await?;
    assert_eq!(receipt.order_ref_number, "1000");
    assert_eq!(orders.len().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_unrecorded_booking_still_returns_receipt() -> Result<()> {
    let cities = Arc::new(CityTable::open(MemoryStorage::new()).await?);
    let orders = Arc::new(UnwritableLedger {
        inner: OrderLedger::open(MemoryStorage::new(), 1000).await?,
    });
    let carrier = Arc::new(StubCarrier::accepting());
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        Arc::clone(&carrier),
        Arc::clone(&orders),
        shipping(),
    );

    let receipt = service.book(&request("Sukkur")).await?;

    assert_eq!(receipt.tracking_number, "CX0001");
    assert_eq!(receipt.order_ref_number, "1000");
    let warning = receipt.ledger_warning.expect("ledger warning");
    assert!(warning.contains("CX0001"), "warning was: {}", warning);
    assert!(warning.contains("disk full"), "warning was: {}", warning);
    assert_eq!(carrier.calls(), 1);

    assert!(orders.inner.is_empty().await?);
    let record = cities.lookup("sukkur").await?.unwrap();
    assert_eq!(record.status, CityStatus::Verified);
    Ok(())
}

#[tokio::test]
async fn test_network_error_learns_nothing() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/services/integration/api/order/v3/create-order");
        then.status(200)
            .delay(Duration::from_millis(1500))
            .json_body(serde_json::json!({
                "statusCode": "200",
                "dist": { "trackingNumber": "CX-LATE", "orderStatus": "Booked" }
            }));
    });
    let carrier = Arc::new(PostExClient::new(&CarrierConfig {
        base_url: server.base_url(),
        api_key: Some("test-token".to_string()),
        timeout_seconds: 1,
        document_timeout_seconds: 1,
    })?);

    let cities = Arc::new(CountingStore {
        inner: CityTable::open(MemoryStorage::new()).await?,
        writes: AtomicUsize::new(0),
    });
    let orders = Arc::new(OrderLedger::open(MemoryStorage::new(), 1000).await?);
    let service = BookingService::new(
        LearningEngine::new(Arc::clone(&cities), true),
        carrier,
        Arc::clone(&orders),
        shipping(),
    );

    let result = service.book(&request("Turbat")).await;

    assert!(
        matches!(result, Err(PostexError::NetworkError(_))),
        "unexpected result: {:?}",
        result
    );
    assert_eq!(cities.writes(), 0);
    assert!(cities.lookup("turbat").await?.is_none());
    assert!(orders.is_empty().await?);
    assert_eq!(orders.next_reference().await?, 1000);
    Ok(())
}
