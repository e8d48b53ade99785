use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::models::{DealType, Listing, ListingCandidate, Market, PropertyType, Source};

/// SQLite keeps at most 999 bind parameters on older builds; each URL is bound twice.
const FILTER_CHUNK: usize = 400;

/// Lowercase hex MD5 of a description.
pub fn description_hash(description: &str) -> String {
    format!("{:x}", md5::compute(description.as_bytes()))
}

/// The handful of columns the liveness checker needs.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ListingRef {
    pub id: i64,
    pub source: Source,
    pub url: String,
}

#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the candidate unless it duplicates a stored listing.
    ///
    /// Checked in order, first match wins:
    /// 1. same `(source, source_ad_id)`;
    /// 2. `url`/`external_url` overlap in either direction;
    /// 3. same description hash within `(city_id, property_type, deal_type)`.
    ///
    /// The insert itself ignores uniqueness conflicts, so a writer that wins a
    /// race between the checks and the insert turns this call into `false`.
    pub async fn add_listing(&self, candidate: &ListingCandidate) -> Result<bool> {
        let by_source_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM listings WHERE source = ? AND source_ad_id = ? LIMIT 1")
                .bind(candidate.source)
                .bind(&candidate.source_ad_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to check source id")?;
        if by_source_id.is_some() {
            return Ok(false);
        }

        let other = candidate.external_url.as_deref().unwrap_or(&candidate.url);
        let by_url: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM listings WHERE url IN (?, ?) OR external_url IN (?, ?) LIMIT 1",
        )
        .bind(&candidate.url)
        .bind(other)
        .bind(&candidate.url)
        .bind(other)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check listing urls")?;
        if by_url.is_some() {
            return Ok(false);
        }

        let hash = candidate
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(description_hash);
        if let Some(hash) = &hash {
            let by_text: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM listings
                WHERE city_id = ? AND property_type = ? AND deal_type = ? AND description_hash = ?
                LIMIT 1
                "#,
            )
            .bind(candidate.city_id)
            .bind(candidate.property_type)
            .bind(candidate.deal_type)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check description hash")?;
            if by_text.is_some() {
                return Ok(false);
            }
        }

        let now = Utc::now();
        let photos = serde_json::to_string(&candidate.photos)?;
        let raw = serde_json::to_string(&candidate.raw)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO listings (
                source, source_ad_id, url, external_url, property_type, deal_type,
                title, description, description_hash, price, currency,
                city_id, district_id, address, area_m2, rooms, market,
                pets_allowed, child_allowed, no_comission, photos, raw,
                is_active, last_check, scraped_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(candidate.source)
        .bind(&candidate.source_ad_id)
        .bind(&candidate.url)
        .bind(&candidate.external_url)
        .bind(candidate.property_type)
        .bind(candidate.deal_type)
        .bind(&candidate.title)
        .bind(&candidate.description)
        .bind(&hash)
        .bind(candidate.price)
        .bind(&candidate.currency)
        .bind(candidate.city_id)
        .bind(candidate.district_id)
        .bind(&candidate.address)
        .bind(candidate.area_m2)
        .bind(candidate.rooms)
        .bind(candidate.market)
        .bind(candidate.pets_allowed)
        .bind(candidate.child_allowed)
        .bind(candidate.no_comission)
        .bind(photos)
        .bind(raw)
        .bind(now.timestamp())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert listing")?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(
                target: "storage",
                source = %candidate.source,
                source_ad_id = %candidate.source_ad_id,
                "insert lost a race, ignored"
            );
        }
        Ok(inserted)
    }

    /// URLs not yet stored as any listing's `url` or `external_url`.
    ///
    /// The input is de-duplicated first; first-seen order is preserved.
    pub async fn filter_new_urls(&self, urls: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = urls
            .iter()
            .filter(|u| !u.is_empty() && seen.insert(u.as_str()))
            .collect();

        let mut fresh = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(FILTER_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT url, external_url FROM listings WHERE url IN ({placeholders}) OR external_url IN ({placeholders})"
            );
            let mut query = sqlx::query_as::<_, (String, Option<String>)>(&sql);
            for url in chunk {
                query = query.bind(url.as_str());
            }
            for url in chunk {
                query = query.bind(url.as_str());
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .context("Failed to filter known urls")?;

            let known: HashSet<String> = rows
                .into_iter()
                .flat_map(|(url, external)| std::iter::once(url).chain(external))
                .collect();
            fresh.extend(
                chunk
                    .iter()
                    .filter(|url| !known.contains(url.as_str()))
                    .map(|url| url.to_string()),
            );
        }
        Ok(fresh)
    }

    /// Listings never checked or last checked before `cutoff`, oldest first.
    pub async fn due_for_check(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<ListingRef>> {
        sqlx::query_as::<_, ListingRef>(
            r#"
            SELECT id, source, url FROM listings
            WHERE last_check IS NULL OR last_check < ?
            ORDER BY last_check IS NOT NULL, last_check ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to select listings due for check")
    }

    pub async fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE listings SET last_check = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to stamp listing {id}"))?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete listing {id}"))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load listing {id}"))?;
        row.map(ListingRow::into_listing).transpose()
    }

    pub async fn find_by_source_id(&self, source: Source, source_ad_id: &str) -> Result<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM listings WHERE source = ? AND source_ad_id = ?",
        )
        .bind(source)
        .bind(source_ad_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load listing by source id")?;
        row.map(ListingRow::into_listing).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count listings")
    }
}

#[derive(Debug, FromRow)]
struct ListingRow {
    id: i64,
    source: Source,
    source_ad_id: String,
    url: String,
    external_url: Option<String>,
    property_type: PropertyType,
    deal_type: DealType,
    title: Option<String>,
    description: Option<String>,
    description_hash: Option<String>,
    title_en: Option<String>,
    title_uk: Option<String>,
    description_en: Option<String>,
    description_uk: Option<String>,
    is_translated: bool,
    price: Option<f64>,
    currency: Option<String>,
    city_id: i64,
    district_id: Option<i64>,
    address: Option<String>,
    area_m2: Option<f64>,
    rooms: Option<i64>,
    market: Market,
    pets_allowed: Option<bool>,
    child_allowed: Option<bool>,
    no_comission: Option<bool>,
    photos: String,
    raw: String,
    is_active: bool,
    last_check: Option<i64>,
    scraped_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_listing(self) -> Result<Listing> {
        Ok(Listing {
            id: self.id,
            source: self.source,
            source_ad_id: self.source_ad_id,
            url: self.url,
            external_url: self.external_url,
            deal_type: self.deal_type,
            property_type: self.property_type,
            title: self.title,
            description: self.description,
            description_hash: self.description_hash,
            title_en: self.title_en,
            title_uk: self.title_uk,
            description_en: self.description_en,
            description_uk: self.description_uk,
            is_translated: self.is_translated,
            price: self.price,
            currency: self.currency,
            city_id: self.city_id,
            district_id: self.district_id,
            address: self.address,
            area_m2: self.area_m2,
            rooms: self.rooms,
            market: self.market,
            pets_allowed: self.pets_allowed,
            child_allowed: self.child_allowed,
            no_comission: self.no_comission,
            photos: serde_json::from_str(&self.photos).context("Invalid photos JSON")?,
            raw: serde_json::from_str(&self.raw).context("Invalid raw JSON")?,
            is_active: self.is_active,
            last_check: self
                .last_check
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            scraped_at: self.scraped_at,
            updated_at: self.updated_at,
        })
    }
}
