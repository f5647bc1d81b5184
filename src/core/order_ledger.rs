use crate::domain::model::ShipmentOrder;
use crate::domain::ports::{OrderStore, Storage};
use crate::utils::error::{PostexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const ORDERS_FILE: &str = "orders.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerState {
    next_ref_number: u64,
    orders: BTreeMap<String, ShipmentOrder>,
}

/// Booked shipments keyed by tracking number, stored as the `orders.json`
/// snapshot. Like the city table it keeps no copy in memory: every call
/// reads the snapshot, and writes happen under the storage lock, so a
/// long-running sync and separate booking processes never overwrite each
/// other.
pub struct OrderLedger<S: Storage> {
    storage: S,
    first_ref_number: u64,
}

impl<S: Storage> OrderLedger<S> {
    /// `first_ref_number` only applies while no snapshot exists.
    pub async fn open(storage: S, first_ref_number: u64) -> Result<Self> {
        let ledger = Self {
            storage,
            first_ref_number,
        };
        let state = ledger.load().await?;
        tracing::debug!(
            orders = state.orders.len(),
            next_ref_number = state.next_ref_number,
            "Order ledger opened"
        );
        Ok(ledger)
    }

    async fn load(&self) -> Result<LedgerState> {
        match self.storage.read_file(ORDERS_FILE).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(PostexError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(LedgerState {
                    next_ref_number: self.first_ref_number,
                    orders: BTreeMap::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, state: &LedgerState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        self.storage.write_file(ORDERS_FILE, &json).await
    }

    /// Read-modify-write of the snapshot under the storage lock. `change`
    /// returns its result and whether anything changed.
    async fn update<T, F>(&self, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut LedgerState) -> Result<(T, bool)> + Send,
    {
        let _lock = self.storage.lock(ORDERS_FILE).await?;
        let mut state = self.load().await?;
        let (value, changed) = change(&mut state)?;
        if changed {
            self.persist(&state).await?;
        }
        Ok(value)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.orders.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl<S: Storage> OrderStore for OrderLedger<S> {
    async fn next_reference(&self) -> Result<u64> {
        self.update(|state| {
            let reference = state.next_ref_number;
            state.next_ref_number += 1;
            Ok((reference, true))
        })
        .await
    }

    async fn release_reference(&self, reference: u64) -> Result<bool> {
        let released = self
            .update(|state| {
                let latest = state.next_ref_number.checked_sub(1) == Some(reference);
                if latest {
                    state.next_ref_number = reference;
                }
                Ok((latest, latest))
            })
            .await?;

        if released {
            tracing::debug!(reference, "Unused order reference released");
        } else {
            tracing::debug!(reference, "Order reference left unused, a later one is taken");
        }
        Ok(released)
    }

    async fn record_booking(&self, order: ShipmentOrder) -> Result<()> {
        self.update(|state| {
            state.orders.insert(order.tracking_number.clone(), order);
            Ok(((), true))
        })
        .await
    }

    async fn get(&self, tracking_number: &str) -> Result<Option<ShipmentOrder>> {
        Ok(self.load().await?.orders.remove(tracking_number))
    }

    async fn find_by_tracking(
        &self,
        tracking_numbers: &[String],
    ) -> Result<HashMap<String, ShipmentOrder>> {
        let mut state = self.load().await?;
        Ok(tracking_numbers
            .iter()
            .filter_map(|tn| state.orders.remove(tn).map(|order| (tn.clone(), order)))
            .collect())
    }

    async fn update_carrier_status(
        &self,
        tracking_number: &str,
        status: &str,
        synced_at: DateTime<Utc>,
        note: String,
    ) -> Result<()> {
        self.update(|state| {
            let Some(order) = state.orders.get_mut(tracking_number) else {
                return Err(PostexError::validation(
                    "tracking_number",
                    format!("no local order for {}", tracking_number),
                ));
            };
            order.carrier_status = status.to_string();
            order.last_synced_at = Some(synced_at);
            order.notes.push(note);
            Ok(((), true))
        })
        .await
    }
}
