use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::catalog::{HTML_CATEGORIES, NIERUCH_CITIES};
use crate::http::{header_map, RequestOptions};
use crate::models::{DealType, PropertyType, Source};
use crate::normalize::nieruch as normalize;
use crate::scrapers::traits::SourceScanner;
use crate::scrapers::types::{Pipeline, PoliteDelay, RoundStats, ScanKey, SeenUrls};

pub const SITE: &str = "https://www.nieruchomosci-online.pl";
const PAGE_TIMEOUT: Duration = Duration::from_secs(25);

pub const HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    ("accept-language", "pl,ru;q=0.9,en;q=0.8"),
    ("cache-control", "max-age=0"),
    ("priority", "u=0, i"),
    ("sec-ch-ua", "\"Google Chrome\";v=\"141\", \"Not?A_Brand\";v=\"8\", \"Chromium\";v=\"141\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("upgrade-insecure-requests", "1"),
];

fn search_path(property_type: PropertyType, deal_type: DealType, city: &str) -> String {
    let kind = match property_type {
        PropertyType::Apartment => "mieszkania",
        PropertyType::House => "dom",
        PropertyType::Room => "pokoj",
    };
    let deal = match deal_type {
        DealType::Sale => "sprzedaz",
        DealType::Rent => "wynajem",
    };
    format!("/szukaj.html?3,{kind},{deal},,{city}&o=modDate,desc")
}

/// nieruchomosci-online.pl scanner. Photos come from the card page itself.
pub struct NieruchScanner {
    pipeline: Pipeline,
    site: String,
    headers: HeaderMap,
    delay: PoliteDelay,
    seen: SeenUrls<ScanKey>,
}

impl NieruchScanner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            site: SITE.to_string(),
            headers: header_map(HEADERS),
            delay: PoliteDelay::secs(1, 4),
            seen: SeenUrls::default(),
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = site.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_delay(mut self, delay: PoliteDelay) -> Self {
        self.delay = delay;
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let options = RequestOptions::new()
            .headers(self.headers.clone())
            .timeout(PAGE_TIMEOUT);
        Ok(self.pipeline.http.get_text(url, &options).await?)
    }

    async fn ingest(&self, url: &str, key: ScanKey) -> Result<bool> {
        let html = self.fetch_page(url).await?;
        let card = normalize::parse_card(&html, key.city, url);
        let Some(candidate) =
            normalize::map(&self.pipeline.places, &card, key.property_type, key.deal_type).await?
        else {
            return Ok(false);
        };
        self.pipeline.listings.add_listing(&candidate).await
    }
}

#[async_trait]
impl SourceScanner for NieruchScanner {
    async fn scan_round(&mut self, token: &CancellationToken) -> Result<RoundStats> {
        let mut stats = RoundStats::default();
        let mut batches = Vec::new();

        'search: for city in NIERUCH_CITIES {
            for (property_type, deal_type) in HTML_CATEGORIES {
                if token.is_cancelled() {
                    break 'search;
                }
                let key = ScanKey {
                    city,
                    property_type,
                    deal_type,
                };
                let url = format!("{}{}", self.site, search_path(property_type, deal_type, city));

                let links = self
                    .fetch_page(&url)
                    .await
                    .with_context(|| format!("Failed to fetch search page {url}"))
                    .map(|html| normalize::extract_search_links(&html, &self.site));
                match links {
                    Ok(links) => {
                        let unseen = self.seen.take_new(key, links);
                        stats.found += unseen.len();
                        if !unseen.is_empty() {
                            batches.push((key, unseen));
                        }
                    }
                    Err(e) => {
                        warn!(target: "nieruch", %key, error = %format!("{e:#}"), "search page failed");
                        stats.failed_keys += 1;
                    }
                }

                if !self.delay.wait(token).await {
                    break 'search;
                }
            }
        }
        info!(target: "nieruch", found = stats.found, "search pages scanned");

        'cards: for (key, unseen) in batches {
            let fresh = match self.pipeline.listings.filter_new_urls(&unseen).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(target: "nieruch", %key, error = %format!("{e:#}"), "url pre-filter failed");
                    continue;
                }
            };
            debug!(target: "nieruch", %key, unseen = unseen.len(), fresh = fresh.len(), "new links");

            for url in &fresh {
                if token.is_cancelled() {
                    break 'cards;
                }
                match self.ingest(url, key).await {
                    Ok(true) => stats.added += 1,
                    Ok(false) => {}
                    Err(e) => warn!(target: "nieruch", url = %url, error = %format!("{e:#}"), "failed card"),
                }
            }
        }

        info!(target: "nieruch", found = stats.found, added = stats.added, "round complete");
        Ok(stats)
    }

    fn source(&self) -> Source {
        Source::Nieruch
    }
}
