use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::PostexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CityStatus {
    Pending,
    Verified,
    Failed,
}

impl fmt::Display for CityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CityStatus::Pending => "pending",
            CityStatus::Verified => "verified",
            CityStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for CityStatus {
    type Err = PostexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(CityStatus::Pending),
            "verified" => Ok(CityStatus::Verified),
            "failed" => Ok(CityStatus::Failed),
            other => Err(PostexError::validation(
                "status",
                format!("unknown city status '{}'", other),
            )),
        }
    }
}

/// One learned mapping from a normalized city key to the spelling PostEx accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub normalized_key: String,
    pub display_name: String,
    pub carrier_format: String,
    pub status: CityStatus,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CityFilter {
    #[default]
    All,
    Status(CityStatus),
}

impl CityFilter {
    pub fn matches(&self, record: &CityRecord) -> bool {
        match self {
            CityFilter::All => true,
            CityFilter::Status(status) => record.status == *status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based
    pub page: usize,
    pub per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.per_page
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityPage {
    pub records: Vec<CityRecord>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CityStats {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Outcome of looking a raw city up before booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityResolution {
    pub raw_city: String,
    pub normalized_key: String,
    pub carrier_format: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            length: 15,
            width: 10,
            height: 5,
        }
    }
}

impl FromStr for Dimensions {
    type Err = PostexError;

    /// Parses `LxWxH`; missing trailing parts fall back to the 15x10x5 defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let defaults = Dimensions::default();
        let fallback = [defaults.length, defaults.width, defaults.height];
        let mut parts = [0u32; 3];

        let pieces: Vec<&str> = s.split(['x', 'X']).map(str::trim).collect();
        if pieces.len() > 3 {
            return Err(PostexError::validation(
                "dimensions",
                format!("expected LxWxH, got '{}'", s),
            ));
        }

        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = match pieces.get(i) {
                Some(piece) if !piece.is_empty() => piece.parse::<u32>().map_err(|_| {
                    PostexError::validation(
                        "dimensions",
                        format!("'{}' is not a whole number in '{}'", piece, s),
                    )
                })?,
                _ => fallback[i],
            };
            if *slot == 0 {
                return Err(PostexError::validation(
                    "dimensions",
                    format!("every side must be greater than zero in '{}'", s),
                ));
            }
        }

        Ok(Dimensions {
            length: parts[0],
            width: parts[1],
            height: parts[2],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

/// What the order platform hands over when an operator books a parcel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub order_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_address: String,
    pub city: String,
    pub invoice_payment: f64,
    pub weight: Option<f64>,
    pub dimensions: Option<String>,
    pub items: Vec<OrderItem>,
}

/// Body of the create-order call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentPayload {
    pub order_ref_number: String,
    pub order_type: String,
    pub invoice_payment: f64,
    pub weight: f64,
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_address: String,
    pub city_name: String,
    pub pickup_address_code: String,
    pub dimensions: Dimensions,
    pub order_details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedShipment {
    pub tracking_number: String,
    pub order_status: String,
    pub order_date: Option<String>,
}

/// One entry of the carrier's order listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarrierShipment {
    pub tracking_number: String,
    #[serde(default)]
    pub transaction_status: Option<String>,
    #[serde(default)]
    pub order_ref_number: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CarrierShipment {
    pub fn status(&self) -> &str {
        self.transaction_status.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirwayBill {
    pub tracking_numbers: Vec<String>,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Local tracking metadata for an order booked with PostEx.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentOrder {
    pub order_id: String,
    pub order_ref_number: String,
    pub tracking_number: String,
    pub local_status: String,
    pub carrier_status: String,
    pub order_date: Option<String>,
    pub city_learned: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted,
    Rejected,
}

/// Per-booking diagnostic; only ever written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingAttempt {
    pub normalized_key: String,
    pub carrier_format: String,
    pub was_verified: bool,
    pub outcome: AttemptOutcome,
    pub carrier_error: Option<String>,
}

impl BookingAttempt {
    pub fn log(&self) {
        match self.outcome {
            AttemptOutcome::Accepted => tracing::info!(
                city_key = %self.normalized_key,
                city_format = %self.carrier_format,
                verified = self.was_verified,
                outcome = "accepted",
                "Booking attempt"
            ),
            AttemptOutcome::Rejected => tracing::warn!(
                city_key = %self.normalized_key,
                city_format = %self.carrier_format,
                verified = self.was_verified,
                outcome = "rejected",
                carrier_error = self.carrier_error.as_deref().unwrap_or(""),
                "Booking attempt"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub tracking_number: String,
    pub order_status: String,
    pub order_date: Option<String>,
    pub order_ref_number: String,
    pub city: CityResolution,
    /// Set when PostEx accepted the parcel but the local order record failed.
    pub ledger_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub matched: usize,
    pub updated: usize,
}
