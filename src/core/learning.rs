use crate::core::normalizer::{guess_carrier_format, normalize};
use crate::domain::model::{CityRecord, CityResolution, CityStatus, CreatedShipment};
use crate::domain::ports::CityStore;
use crate::utils::error::{PostexError, Result};
use std::sync::Arc;

/// What [`LearningEngine::learn`] did with a booking outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum LearningAction {
    /// Trusted mapping or learning disabled; nothing written.
    Skipped,
    /// Outcome says nothing about the city (network error, unrelated rejection).
    Ignored,
    Verified(CityRecord),
    Failed(CityRecord),
}

/// Self-learning city lookup in front of the carrier.
///
/// Only unverified guesses are ever written back. Verified mappings stay
/// verified regardless of later outcomes so that a transient carrier error
/// cannot flip a known-good city; demoting one takes an operator action.
pub struct LearningEngine<C: CityStore + ?Sized> {
    store: Arc<C>,
    enabled: bool,
}

impl<C: CityStore + ?Sized> LearningEngine<C> {
    pub fn new(store: Arc<C>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    /// Picks the spelling to send for `raw_city`.
    ///
    /// Fails with [`PostexError::CityBlocked`] when the city is recorded as
    /// failed; the booking must not reach the carrier in that case.
    pub async fn resolve(&self, raw_city: &str) -> Result<CityResolution> {
        let raw_city = raw_city.trim();
        let key = normalize(raw_city);
        if key.is_empty() {
            return Err(PostexError::validation("city", "is required"));
        }

        let resolution = match self.store.lookup(&key).await? {
            Some(record) if record.status == CityStatus::Failed => {
                tracing::warn!(
                    city_key = %key,
                    failure_count = record.failure_count,
                    "Booking blocked for failed city '{}'",
                    raw_city
                );
                return Err(PostexError::CityBlocked {
                    city: raw_city.to_string(),
                    failure_count: record.failure_count,
                });
            }
            Some(record) => CityResolution {
                raw_city: raw_city.to_string(),
                normalized_key: key,
                carrier_format: record.carrier_format,
                is_verified: record.status == CityStatus::Verified,
            },
            None => CityResolution {
                raw_city: raw_city.to_string(),
                carrier_format: guess_carrier_format(&key),
                normalized_key: key,
                is_verified: false,
            },
        };

        tracing::debug!(
            city_key = %resolution.normalized_key,
            city_format = %resolution.carrier_format,
            verified = resolution.is_verified,
            "City resolved"
        );
        Ok(resolution)
    }

    /// Feeds a carrier outcome back into the store.
    pub async fn learn(
        &self,
        resolution: &CityResolution,
        outcome: &Result<CreatedShipment>,
    ) -> Result<LearningAction> {
        if resolution.is_verified || !self.enabled {
            return Ok(LearningAction::Skipped);
        }

        match outcome {
            Ok(_) => {
                let record = self
                    .store
                    .record_success(&resolution.raw_city, &resolution.carrier_format)
                    .await?;
                Ok(LearningAction::Verified(record))
            }
            Err(err) if err.is_city_related() => {
                let record = self.store.record_failure(&resolution.raw_city).await?;
                Ok(LearningAction::Failed(record))
            }
            Err(_) => Ok(LearningAction::Ignored),
        }
    }
}
