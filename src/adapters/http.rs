use crate::config::CarrierConfig;
use crate::domain::model::{AirwayBill, CarrierShipment, CreatedShipment, ShipmentPayload};
use crate::domain::ports::CarrierClient;
use crate::utils::error::{PostexError, Result};
use async_trait::async_trait;
use chrono::{Duration as DateSpan, Local, NaiveDate};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const CREATE_ORDER_PATH: &str = "services/integration/api/order/v3/create-order";
const LIST_ORDERS_PATH: &str = "services/integration/api/order/v2/get-unbooked-orders";
const INVOICE_PATH: &str = "services/integration/api/order/v1/get-invoice";

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const MAX_WINDOW_DAYS: i64 = 30;
pub const MAX_DOCUMENTS_PER_REQUEST: usize = 10;

const SUCCESS_STATUS_MESSAGE: &str = "SUCCESSFULLY OPERATED";

/// User-facing text for the HTTP codes PostEx is known to answer with.
fn http_code_message(code: u16) -> Option<&'static str> {
    let message = match code {
        400 => "Bad Request - Please check your order data",
        401 => "Unauthorized - Invalid API key",
        403 => "Forbidden - Access denied",
        404 => "Not Found - Endpoint or resource not available",
        422 => "Validation Error - Please check your input data",
        429 => "Rate Limit Exceeded - Please try again later",
        500 => "Server Error - PostEx service temporarily unavailable",
        502 => "Bad Gateway - PostEx service connectivity issue",
        503 => "Service Unavailable - PostEx service temporarily down",
        504 => "Gateway Timeout - Request took too long",
        _ => return None,
    };
    Some(message)
}

fn snippet(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

/// Turns a non-success answer into a [`PostexError::CarrierRejection`].
///
/// A meaningful `statusMessage` in the body wins over the generic text for the
/// HTTP code, so carrier wording reaches the operator unchanged.
pub fn classify_rejection(code: u16, body: &str, context: &str) -> PostexError {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let carrier_message = json.as_ref().and_then(|v| {
        v.get("statusMessage")
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });

    let mut message = http_code_message(code)
        .unwrap_or("An error occurred while communicating with PostEx")
        .to_string();
    if let Some(carrier) = carrier_message.as_deref() {
        if !carrier.is_empty() && carrier != SUCCESS_STATUS_MESSAGE {
            message = carrier.to_string();
        }
    }
    let technical = carrier_message.unwrap_or_else(|| snippet(body, 500));

    tracing::error!(
        context,
        http_code = code,
        response = %snippet(body, 500),
        error_message = %technical,
        "PostEx API error"
    );

    PostexError::CarrierRejection {
        code,
        message,
        technical,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderDist {
    tracking_number: Option<String>,
    order_status: Option<String>,
    order_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderEnvelope {
    dist: Option<CreateOrderDist>,
}

/// Start/end dates sent to the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipmentWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ShipmentWindow {
    /// Fills in the 30-day default ending `today` and clamps longer spans to
    /// [`MAX_WINDOW_DAYS`] by moving the start forward.
    pub fn resolve(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Result<Self> {
        let end = end.unwrap_or(today);
        let start = start.unwrap_or(end - DateSpan::days(DEFAULT_WINDOW_DAYS));

        if start > end {
            return Err(PostexError::validation(
                "start_date",
                format!("start date {} is after end date {}", start, end),
            ));
        }

        let earliest = end - DateSpan::days(MAX_WINDOW_DAYS);
        if start < earliest {
            tracing::warn!(
                requested_start = %start,
                clamped_start = %earliest,
                "Shipment window longer than {} days, clamping",
                MAX_WINDOW_DAYS
            );
            return Ok(Self { start: earliest, end });
        }

        Ok(Self { start, end })
    }
}

/// PostEx merchant API. One attempt per call; retrying is up to the caller.
#[derive(Debug, Clone)]
pub struct PostExClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    document_timeout: Duration,
}

impl PostExClient {
    pub fn new(config: &CarrierConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PostexError::MissingConfigError {
                field: "carrier.api_key".to_string(),
            })?
            .to_string();

        let mut base_url = config.base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            request_timeout: Duration::from_secs(config.timeout_seconds),
            document_timeout: Duration::from_secs(config.document_timeout_seconds),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        request
            .header("token", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(context, error = %e, timeout = e.is_timeout(), "PostEx API network error");
                PostexError::NetworkError(e)
            })
    }

    /// Uses the machine's local date as "today".
    pub fn default_window(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<ShipmentWindow> {
        ShipmentWindow::resolve(start, end, Local::now().date_naive())
    }
}

#[async_trait]
impl CarrierClient for PostExClient {
    async fn create_shipment(&self, payload: &ShipmentPayload) -> Result<CreatedShipment> {
        tracing::info!(order_ref = %payload.order_ref_number, "Creating PostEx order");

        let request = self
            .client
            .post(self.endpoint(CREATE_ORDER_PATH))
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .json(payload);
        let response = self.send(request, "create_order").await?;

        let code = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(http_code = code, "Create order response received");

        if code == 200 {
            let dist = serde_json::from_str::<CreateOrderEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.dist);
            if let Some(CreateOrderDist {
                tracking_number: Some(tracking_number),
                order_status,
                order_date,
            }) = dist
            {
                let order_status = order_status.unwrap_or_else(|| "Unknown".to_string());
                tracing::info!(
                    tracking_number = %tracking_number,
                    status = %order_status,
                    "Order created successfully"
                );
                return Ok(CreatedShipment {
                    tracking_number,
                    order_status,
                    order_date,
                });
            }
        }

        Err(classify_rejection(code, &body, "create_order"))
    }

    async fn list_shipments(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<CarrierShipment>> {
        let window = Self::default_window(start, end)?;
        let start_date = window.start.format("%Y-%m-%d").to_string();
        let end_date = window.end.format("%Y-%m-%d").to_string();
        tracing::debug!(start = %start_date, end = %end_date, "Listing PostEx orders");

        let request = self
            .client
            .get(self.endpoint(LIST_ORDERS_PATH))
            .query(&[("startDate", &start_date), ("endDate", &end_date)])
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout);
        let response = self.send(request, "list_unbooked").await?;

        let code = response.status().as_u16();
        let body = response.text().await?;
        if code != 200 {
            return Err(classify_rejection(code, &body, "list_unbooked"));
        }

        let json: serde_json::Value = serde_json::from_str(&body)?;
        let items = ["data", "orders", "dist"]
            .iter()
            .find_map(|key| json.get(*key).and_then(|v| v.as_array()))
            .cloned()
            .unwrap_or_default();

        let mut shipments = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<CarrierShipment>(item) {
                Ok(shipment) => shipments.push(shipment),
                Err(e) => tracing::warn!(error = %e, "Skipping PostEx order without tracking number"),
            }
        }

        tracing::info!("📦 Fetched {} PostEx orders", shipments.len());
        Ok(shipments)
    }

    async fn fetch_documents(&self, tracking_numbers: &[String]) -> Result<AirwayBill> {
        let requested: Vec<String> = tracking_numbers
            .iter()
            .map(|tn| tn.trim().to_string())
            .filter(|tn| !tn.is_empty())
            .collect();
        if requested.is_empty() {
            return Err(PostexError::validation(
                "tracking_numbers",
                "at least one tracking number is required",
            ));
        }

        let selected: Vec<String> = requested
            .iter()
            .take(MAX_DOCUMENTS_PER_REQUEST)
            .cloned()
            .collect();
        if requested.len() > MAX_DOCUMENTS_PER_REQUEST {
            tracing::warn!(
                requested = requested.len(),
                sent = MAX_DOCUMENTS_PER_REQUEST,
                dropped = ?&requested[MAX_DOCUMENTS_PER_REQUEST..],
                "Too many tracking numbers for one airway bill request, truncating"
            );
        }

        let mut url = Url::parse(&self.endpoint(INVOICE_PATH)).map_err(|e| {
            PostexError::InvalidConfigValueError {
                field: "carrier.base_url".to_string(),
                value: self.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        // 逗號須保持原樣
        url.set_query(Some(&format!("trackingNumbers={}", selected.join(","))));

        let request = self
            .client
            .get(url)
            .header(ACCEPT, "application/pdf")
            .timeout(self.document_timeout);
        let response = self.send(request, "download_awb").await?;

        let code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if code == 200
            && (content_type.contains("pdf") || content_type.contains("application/octet-stream"))
        {
            let data = response.bytes().await?.to_vec();
            let filename = format!(
                "postex-airway-bills-{}.pdf",
                Local::now().format("%Y-%m-%d-%H-%M-%S")
            );
            tracing::info!(count = selected.len(), bytes = data.len(), "Airway bills downloaded");
            return Ok(AirwayBill {
                tracking_numbers: selected,
                filename,
                data,
            });
        }

        let body = response.text().await?;
        let status_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("statusMessage").and_then(|m| m.as_str()).map(str::to_string));
        let message = status_message.unwrap_or_else(|| {
            format!(
                "Failed to download airway bills. Response: {}",
                snippet(&body, 200)
            )
        });
        tracing::error!(http_code = code, content_type = %content_type, error_message = %message, "Airway bill download failed");

        Err(PostexError::CarrierRejection {
            code,
            technical: message.clone(),
            message,
        })
    }
}
