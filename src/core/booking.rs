use crate::config::ShippingConfig;
use crate::core::learning::{LearningAction, LearningEngine};
use crate::domain::model::{
    AttemptOutcome, BookingAttempt, BookingReceipt, BookingRequest, CityResolution, Dimensions,
    ShipmentOrder, ShipmentPayload,
};
use crate::domain::ports::{CarrierClient, CityStore, OrderStore};
use crate::utils::error::{PostexError, Result};
use crate::utils::validation::{require_positive, require_text};
use std::sync::Arc;

/// Fields of a booking once checked and defaulted, before a reference number
/// and city spelling are attached.
#[derive(Debug, Clone, PartialEq)]
struct ValidBooking {
    weight: f64,
    dimensions: Dimensions,
}

/// Books parcels: local checks, city resolution, carrier call, learning.
pub struct BookingService<C, K, O>
where
    C: CityStore + ?Sized,
    K: CarrierClient + ?Sized,
    O: OrderStore + ?Sized,
{
    learning: LearningEngine<C>,
    carrier: Arc<K>,
    orders: Arc<O>,
    shipping: ShippingConfig,
}

impl<C, K, O> BookingService<C, K, O>
where
    C: CityStore + ?Sized,
    K: CarrierClient + ?Sized,
    O: OrderStore + ?Sized,
{
    pub fn new(
        learning: LearningEngine<C>,
        carrier: Arc<K>,
        orders: Arc<O>,
        shipping: ShippingConfig,
    ) -> Self {
        Self {
            learning,
            carrier,
            orders,
            shipping,
        }
    }

    pub fn learning(&self) -> &LearningEngine<C> {
        &self.learning
    }

    fn validate(&self, request: &BookingRequest) -> Result<ValidBooking> {
        if self.shipping.pickup_address_code.trim().is_empty() {
            return Err(PostexError::MissingConfigError {
                field: "shipping.pickup_address_code".to_string(),
            });
        }

        require_text("order_id", &request.order_id)?;
        require_text("customer_name", &request.customer_name)?;
        require_text("customer_phone", &request.customer_phone)?;
        require_text("delivery_address", &request.delivery_address)?;
        require_text("city", &request.city)?;

        let weight = request.weight.unwrap_or(self.shipping.default_weight);
        require_positive("weight", weight)?;
        require_positive("invoice_payment", request.invoice_payment)?;

        let dimensions = match request.dimensions.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.parse()?,
            _ => self.shipping.default_dimensions.parse()?,
        };

        Ok(ValidBooking { weight, dimensions })
    }

    fn build_payload(
        &self,
        request: &BookingRequest,
        valid: &ValidBooking,
        city: &CityResolution,
        reference: u64,
    ) -> ShipmentPayload {
        let order_details = request
            .items
            .iter()
            .map(|item| format!("{}x {}", item.quantity, item.name))
            .collect::<Vec<_>>()
            .join(", ");

        ShipmentPayload {
            order_ref_number: reference.to_string(),
            order_type: "Normal".to_string(),
            invoice_payment: request.invoice_payment,
            weight: valid.weight,
            customer_name: request.customer_name.trim().to_string(),
            customer_phone: request.customer_phone.trim().to_string(),
            delivery_address: request.delivery_address.trim().to_string(),
            city_name: city.carrier_format.clone(),
            pickup_address_code: self.shipping.pickup_address_code.clone(),
            dimensions: valid.dimensions,
            order_details,
        }
    }

    /// Books one parcel. Validation and blocked cities fail before any
    /// network call; carrier failures come back classified and hand their
    /// reference number back. Once PostEx accepts the parcel the call
    /// succeeds, with `ledger_warning` set if the local record failed.
    pub async fn book(&self, request: &BookingRequest) -> Result<BookingReceipt> {
        let valid = self.validate(request)?;
        let city = self.learning.resolve(&request.city).await?;

        let reference = self.orders.next_reference().await?;
        let payload = self.build_payload(request, &valid, &city, reference);

        let outcome = self.carrier.create_shipment(&payload).await;

        // 學習失敗不應掩蓋下單結果
        match self.learning.learn(&city, &outcome).await {
            Ok(LearningAction::Verified(record)) => tracing::debug!(
                city_key = %record.normalized_key,
                "Guessed city spelling confirmed by PostEx"
            ),
            Ok(LearningAction::Failed(record)) => tracing::debug!(
                city_key = %record.normalized_key,
                failure_count = record.failure_count,
                "Guessed city spelling rejected by PostEx"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, city = %city.raw_city, "Failed to record city outcome"),
        }

        BookingAttempt {
            normalized_key: city.normalized_key.clone(),
            carrier_format: city.carrier_format.clone(),
            was_verified: city.is_verified,
            outcome: if outcome.is_ok() {
                AttemptOutcome::Accepted
            } else {
                AttemptOutcome::Rejected
            },
            carrier_error: outcome.as_ref().err().map(|e| e.to_string()),
        }
        .log();

        let created = match outcome {
            Ok(created) => created,
            Err(e) => {
                if let Err(release_err) = self.orders.release_reference(reference).await {
                    tracing::warn!(error = %release_err, reference, "Failed to release order reference");
                }
                return Err(e);
            }
        };

        let order = ShipmentOrder {
            order_id: request.order_id.trim().to_string(),
            order_ref_number: payload.order_ref_number.clone(),
            tracking_number: created.tracking_number.clone(),
            local_status: "processing".to_string(),
            carrier_status: created.order_status.clone(),
            order_date: created.order_date.clone(),
            city_learned: city.raw_city.clone(),
            last_synced_at: None,
            notes: vec![format!(
                "PostEx order created - Tracking: {} Status: {}",
                created.tracking_number, created.order_status
            )],
        };

        // 包裹已在 PostEx 建立，記錄失敗只能回報，不能當成下單失敗
        let ledger_warning = match self.orders.record_booking(order).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    order_id = %request.order_id,
                    tracking_number = %created.tracking_number,
                    "PostEx order created but not recorded locally"
                );
                Some(format!(
                    "PostEx order {} was created but could not be recorded locally: {}",
                    created.tracking_number, e
                ))
            }
        };

        Ok(BookingReceipt {
            tracking_number: created.tracking_number,
            order_status: created.order_status,
            order_date: created.order_date,
            order_ref_number: payload.order_ref_number,
            city,
            ledger_warning,
        })
    }
}
