use crate::core::normalizer::normalize;
use crate::domain::model::{
    CityFilter, CityPage, CityRecord, CityStats, CityStatus, Pagination,
};
use crate::domain::ports::{CityStore, Storage};
use crate::utils::error::{PostexError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const CITIES_FILE: &str = "cities.json";

/// Cities PostEx is known to accept, installed into an empty table.
pub const DEFAULT_CITIES: &[&str] = &[
    "Karachi",
    "Lahore",
    "Islamabad",
    "Rawalpindi",
    "Faisalabad",
    "Multan",
    "Peshawar",
    "Quetta",
    "Gujranwala",
    "Sialkot",
    "Hyderabad",
    "Sargodha",
    "Bahawalpur",
    "Sukkur",
    "Larkana",
    "Sheikhupura",
    "Jhang",
    "Rahim Yar Khan",
    "Gujrat",
    "Kasur",
    "Mardan",
    "Mingora",
    "Sahiwal",
    "Nawabshah",
    "Okara",
];

type Records = BTreeMap<String, CityRecord>;

/// City table stored as the `cities.json` snapshot.
///
/// Every mutation re-reads the snapshot while holding the storage lock and
/// writes it back before releasing it. Handles in other processes sharing
/// the data directory therefore see each other's rows, and two first
/// bookings for the same city end up as one row with both counter
/// increments applied. A failed write leaves nothing behind.
pub struct CityTable<S: Storage> {
    storage: S,
}

impl<S: Storage> CityTable<S> {
    /// Checks that the snapshot is readable; a missing file is an empty table.
    pub async fn open(storage: S) -> Result<Self> {
        let table = Self { storage };
        let records = table.load().await?;
        tracing::debug!("Loaded {} city mappings", records.len());
        Ok(table)
    }

    async fn load(&self) -> Result<Records> {
        match self.storage.read_file(CITIES_FILE).await {
            Ok(bytes) => {
                let list: Vec<CityRecord> = serde_json::from_slice(&bytes)?;
                Ok(list
                    .into_iter()
                    .map(|record| (record.normalized_key.clone(), record))
                    .collect())
            }
            Err(PostexError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No city snapshot yet, starting with an empty table");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, records: &Records) -> Result<()> {
        let list: Vec<&CityRecord> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;
        self.storage.write_file(CITIES_FILE, &json).await
    }

    /// Applies `change` to a fresh copy of the snapshot under the storage
    /// lock. The closure returns its result and whether anything changed.
    async fn update<T, F>(&self, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Records) -> (T, bool) + Send,
    {
        let _lock = self.storage.lock(CITIES_FILE).await?;
        let mut records = self.load().await?;
        let (value, changed) = change(&mut records);
        if changed {
            self.persist(&records).await?;
        }
        Ok(value)
    }

    /// Installs [`DEFAULT_CITIES`] as verified mappings when the table is empty.
    /// Returns how many rows were added.
    pub async fn seed_defaults(&self) -> Result<usize> {
        let now = Utc::now();
        let added = self
            .update(|records| {
                if !records.is_empty() {
                    return (0, false);
                }
                for city in DEFAULT_CITIES {
                    let key = normalize(city);
                    records.insert(
                        key.clone(),
                        CityRecord {
                            normalized_key: key,
                            display_name: city.to_string(),
                            carrier_format: city.to_string(),
                            status: CityStatus::Verified,
                            success_count: 1,
                            failure_count: 0,
                            last_used: None,
                            date_added: now,
                        },
                    );
                }
                (DEFAULT_CITIES.len(), true)
            })
            .await?;

        if added == 0 {
            tracing::debug!("City table already populated, skipping seed");
        } else {
            tracing::info!("🌱 Seeded {} default cities", added);
        }
        Ok(added)
    }
}

fn validated_key(raw_name: &str) -> Result<String> {
    let key = normalize(raw_name);
    if key.is_empty() {
        return Err(PostexError::validation("city", "city name is empty"));
    }
    Ok(key)
}

#[async_trait]
impl<S: Storage> CityStore for CityTable<S> {
    async fn lookup(&self, city: &str) -> Result<Option<CityRecord>> {
        let key = normalize(city);
        Ok(self.load().await?.remove(&key))
    }

    async fn record_success(&self, raw_name: &str, carrier_format: &str) -> Result<CityRecord> {
        let key = validated_key(raw_name)?;
        let now = Utc::now();

        let record = self
            .update(|records| {
                let record = records
                    .entry(key.clone())
                    .and_modify(|existing| {
                        existing.status = CityStatus::Verified;
                        existing.carrier_format = carrier_format.to_string();
                        existing.success_count = existing.success_count.saturating_add(1);
                        existing.last_used = Some(now);
                    })
                    .or_insert_with(|| CityRecord {
                        normalized_key: key.clone(),
                        display_name: raw_name.trim().to_string(),
                        carrier_format: carrier_format.to_string(),
                        status: CityStatus::Verified,
                        success_count: 1,
                        failure_count: 0,
                        last_used: Some(now),
                        date_added: now,
                    })
                    .clone();
                (record, true)
            })
            .await?;

        tracing::info!(
            city_key = %key,
            city_format = %record.carrier_format,
            success_count = record.success_count,
            "🎓 City learned: '{}' -> '{}'",
            raw_name,
            carrier_format
        );
        Ok(record)
    }

    async fn record_failure(&self, raw_name: &str) -> Result<CityRecord> {
        let key = validated_key(raw_name)?;
        let now = Utc::now();

        let record = self
            .update(|records| {
                let record = records
                    .entry(key.clone())
                    .and_modify(|existing| {
                        existing.status = CityStatus::Failed;
                        existing.failure_count = existing.failure_count.saturating_add(1);
                        existing.last_used = Some(now);
                    })
                    .or_insert_with(|| CityRecord {
                        normalized_key: key.clone(),
                        display_name: raw_name.trim().to_string(),
                        carrier_format: raw_name.trim().to_string(),
                        status: CityStatus::Failed,
                        success_count: 0,
                        failure_count: 1,
                        last_used: Some(now),
                        date_added: now,
                    })
                    .clone();
                (record, true)
            })
            .await?;

        tracing::warn!(
            city_key = %key,
            failure_count = record.failure_count,
            "City marked as failed: '{}'",
            raw_name
        );
        Ok(record)
    }

    async fn insert(
        &self,
        raw_name: &str,
        carrier_format: &str,
        status: CityStatus,
    ) -> Result<CityRecord> {
        let key = validated_key(raw_name)?;
        let carrier_format = carrier_format.trim();
        if carrier_format.is_empty() {
            return Err(PostexError::validation("carrier_format", "is required"));
        }
        let now = Utc::now();

        let record = self
            .update(|records| {
                let record = records
                    .entry(key.clone())
                    .and_modify(|existing| {
                        existing.carrier_format = carrier_format.to_string();
                        existing.status = status;
                    })
                    .or_insert_with(|| CityRecord {
                        normalized_key: key.clone(),
                        display_name: raw_name.trim().to_string(),
                        carrier_format: carrier_format.to_string(),
                        status,
                        success_count: u32::from(status == CityStatus::Verified),
                        failure_count: 0,
                        last_used: None,
                        date_added: now,
                    })
                    .clone();
                (record, true)
            })
            .await?;

        tracing::info!(city_key = %key, status = %status, "City mapping saved by operator");
        Ok(record)
    }

    async fn list(&self, filter: CityFilter, pagination: Pagination) -> Result<CityPage> {
        let records = self.load().await?;
        let mut matching: Vec<CityRecord> =
            records.into_values().filter(|r| filter.matches(r)).collect();

        // 最近使用優先，從未使用的排最後
        matching.sort_by(|a, b| {
            b.last_used
                .cmp(&a.last_used)
                .then(b.success_count.cmp(&a.success_count))
                .then(a.normalized_key.cmp(&b.normalized_key))
        });

        let pagination = Pagination {
            page: pagination.page.max(1),
            per_page: pagination.per_page.max(1),
        };
        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.per_page)
            .collect();

        Ok(CityPage {
            records,
            total,
            page: pagination.page,
            total_pages: total.div_ceil(pagination.per_page),
        })
    }

    async fn delete(&self, city: &str) -> Result<bool> {
        let key = normalize(city);
        let removed = self
            .update(|records| {
                let removed = records.remove(&key).is_some();
                (removed, removed)
            })
            .await?;

        if removed {
            tracing::info!(city_key = %key, "City mapping deleted by operator");
        }
        Ok(removed)
    }

    async fn force_verify(&self, city: &str) -> Result<Option<CityRecord>> {
        let key = normalize(city);
        let updated = self
            .update(|records| match records.get_mut(&key) {
                Some(record) => {
                    record.status = CityStatus::Verified;
                    (Some(record.clone()), true)
                }
                None => (None, false),
            })
            .await?;

        if updated.is_some() {
            tracing::info!(city_key = %key, "City mapping verified by operator");
        }
        Ok(updated)
    }

    async fn stats(&self) -> Result<CityStats> {
        let records = self.load().await?;
        let mut stats = CityStats {
            total: records.len(),
            ..CityStats::default()
        };
        for record in records.values() {
            match record.status {
                CityStatus::Verified => stats.verified += 1,
                CityStatus::Failed => stats.failed += 1,
                CityStatus::Pending => stats.pending += 1,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
struct CityImportRow {
    city: String,
    carrier_format: Option<String>,
    status: Option<String>,
}

/// Bulk-loads operator mappings from CSV with a `city,carrier_format,status`
/// header. Blank formats fall back to the city column, blank statuses to
/// `verified`. Returns the number of rows imported.
pub async fn import_csv<C, R>(store: &C, reader: R) -> Result<usize>
where
    C: CityStore + ?Sized,
    R: std::io::Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for row in csv_reader.deserialize::<CityImportRow>() {
        rows.push(row?);
    }

    let mut imported = 0;
    for row in rows {
        let format = row
            .carrier_format
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| row.city.clone());
        let status = match row.status.as_deref() {
            Some(s) if !s.is_empty() => s.parse()?,
            _ => CityStatus::Verified,
        };
        store.insert(&row.city, &format, status).await?;
        imported += 1;
    }

    tracing::info!("📥 Imported {} city mappings", imported);
    Ok(imported)
}
