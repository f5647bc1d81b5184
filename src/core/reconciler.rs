use crate::domain::model::ReconcileReport;
use crate::domain::ports::{CarrierClient, OrderStore};
use crate::utils::error::Result;
use chrono::{Duration as DateSpan, Local, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(ReconcileReport),
    /// Another run held the lock; nothing was done.
    AlreadyRunning,
}

/// Copies carrier-side shipment status onto the locally booked orders.
pub struct StatusReconciler<K, O>
where
    K: CarrierClient + ?Sized,
    O: OrderStore + ?Sized,
{
    carrier: Arc<K>,
    orders: Arc<O>,
    window_days: i64,
    run_lock: Mutex<()>,
}

impl<K, O> StatusReconciler<K, O>
where
    K: CarrierClient + ?Sized,
    O: OrderStore + ?Sized,
{
    pub fn new(carrier: Arc<K>, orders: Arc<O>, window_days: i64) -> Self {
        Self {
            carrier,
            orders,
            window_days,
            run_lock: Mutex::new(()),
        }
    }

    pub async fn reconcile_once(&self) -> Result<SyncOutcome> {
        self.reconcile_at(Local::now().date_naive()).await
    }

    /// One pass over the window ending `today`. Orders whose stored carrier
    /// status already matches are left untouched, so an immediate second run
    /// writes nothing.
    pub async fn reconcile_at(&self, today: NaiveDate) -> Result<SyncOutcome> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::warn!("Status sync already in progress, skipping this run");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let start = today - DateSpan::days(self.window_days);
        let shipments = self.carrier.list_shipments(Some(start), Some(today)).await?;

        let mut report = ReconcileReport {
            checked: shipments.len(),
            ..ReconcileReport::default()
        };
        if shipments.is_empty() {
            tracing::info!("Status sync: no PostEx orders in window");
            return Ok(SyncOutcome::Completed(report));
        }

        let tracking_numbers: Vec<String> = shipments
            .iter()
            .map(|s| s.tracking_number.clone())
            .collect();
        let mut local = self.orders.find_by_tracking(&tracking_numbers).await?;

        for shipment in &shipments {
            let Some(order) = local.get_mut(&shipment.tracking_number) else {
                continue;
            };
            report.matched += 1;

            let new_status = shipment.status();
            if order.carrier_status == new_status {
                continue;
            }

            let previous = if order.carrier_status.is_empty() {
                "Unknown"
            } else {
                order.carrier_status.as_str()
            };
            let note = format!(
                "PostEx status updated: {} → {} (Tracking: {})",
                previous, new_status, shipment.tracking_number
            );
            tracing::info!(
                order_id = %order.order_id,
                tracking_number = %shipment.tracking_number,
                from = previous,
                to = new_status,
                "Status sync: order updated"
            );

            self.orders
                .update_carrier_status(&shipment.tracking_number, new_status, Utc::now(), note)
                .await?;
            order.carrier_status = new_status.to_string();
            report.updated += 1;
        }

        tracing::info!(
            checked = report.checked,
            matched = report.matched,
            updated = report.updated,
            "Status sync completed - {} orders updated out of {} checked",
            report.updated,
            report.checked
        );
        Ok(SyncOutcome::Completed(report))
    }
}
