use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::catalog::{OLX_CATEGORIES, OLX_CITY_IDS};
use crate::http::{header_map, RequestOptions};
use crate::models::{DealType, PropertyType, Source};
use crate::normalize::olx as normalize;
use crate::scrapers::traits::SourceScanner;
use crate::scrapers::types::{MaxIdCursor, Pipeline, PoliteDelay, RoundStats};

pub const SEARCH_ENDPOINT: &str = "https://www.olx.pl/api/v1/offers/";
const PAGE_LIMIT: u32 = 50;

pub const HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "uk"),
    ("priority", "u=1, i"),
    ("sec-ch-ua", "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("x-client", "DESKTOP"),
    ("x-platform-type", "mobile-html5"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
];

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<Value>,
}

/// `(city_id, category_id)`
type OlxKey = (u64, u64);

/// OLX JSON API scanner. The cursor is the highest offer id seen per key.
pub struct OlxScanner {
    pipeline: Pipeline,
    endpoint: String,
    headers: HeaderMap,
    delay: PoliteDelay,
    cursor: MaxIdCursor<OlxKey>,
}

impl OlxScanner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            endpoint: SEARCH_ENDPOINT.to_string(),
            headers: header_map(HEADERS),
            delay: PoliteDelay::secs(1, 4),
            cursor: MaxIdCursor::default(),
        }
    }

    /// Point the scanner at another search endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_delay(mut self, delay: PoliteDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn cursor(&self) -> &MaxIdCursor<OlxKey> {
        &self.cursor
    }

    async fn fetch_page(&self, city_id: u64, category_id: u64) -> Result<Vec<Value>> {
        let options = RequestOptions::new()
            .headers(self.headers.clone())
            .param("offset", 0)
            .param("limit", PAGE_LIMIT)
            .param("category_id", category_id)
            .param("city_id", city_id)
            .param("currency", "PLN")
            .param("sort_by", "created_at:desc")
            .param("filter_refiners", "spell_checker");
        let page: SearchPage = self
            .pipeline
            .http
            .get_json(&self.endpoint, &options)
            .await
            .with_context(|| format!("Failed to fetch OLX page city={city_id} category={category_id}"))?;
        Ok(page.data)
    }

    /// Normalize and store one offer; `Ok(true)` if it was new.
    async fn ingest(
        &self,
        offer: &Value,
        property_type: PropertyType,
        deal_type: DealType,
    ) -> Result<bool> {
        let Some(candidate) =
            normalize::map(&self.pipeline.places, offer, property_type, deal_type).await?
        else {
            return Ok(false);
        };
        self.pipeline.listings.add_listing(&candidate).await
    }
}

#[async_trait]
impl SourceScanner for OlxScanner {
    async fn scan_round(&mut self, token: &CancellationToken) -> Result<RoundStats> {
        let mut stats = RoundStats::default();

        'matrix: for city_id in OLX_CITY_IDS {
            for (category_id, property_type, deal_type) in OLX_CATEGORIES {
                if token.is_cancelled() {
                    break 'matrix;
                }
                let key = (city_id, category_id);

                let offers = match self.fetch_page(city_id, category_id).await {
                    Ok(offers) => offers,
                    Err(e) => {
                        warn!(target: "olx", city_id, category_id, error = %format!("{e:#}"), "search page failed");
                        stats.failed_keys += 1;
                        self.delay.wait(token).await;
                        continue;
                    }
                };

                let fresh = self.cursor.take_new(key, offers, normalize::offer_id);
                debug!(target: "olx", city_id, category_id, fresh = fresh.len(), "page scanned");
                stats.found += fresh.len();

                for offer in &fresh {
                    match self.ingest(offer, property_type, deal_type).await {
                        Ok(true) => stats.added += 1,
                        Ok(false) => {}
                        Err(e) => warn!(
                            target: "olx",
                            id = ?normalize::offer_id(offer),
                            %property_type,
                            %deal_type,
                            error = %format!("{e:#}"),
                            "failed to store offer"
                        ),
                    }
                }

                if !self.delay.wait(token).await {
                    break 'matrix;
                }
            }
        }

        info!(target: "olx", found = stats.found, added = stats.added, "round complete");
        Ok(stats)
    }

    fn source(&self) -> Source {
        Source::Olx
    }
}
