use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::catalog::{OTODOM_CATEGORIES, OTODOM_CITIES, SUPPORTED_CITIES};
use crate::http::{header_map, RequestOptions};
use crate::models::Source;
use crate::normalize::otodom as normalize;
use crate::normalize::{absolutize, dedupe_keep_order};
use crate::scrapers::traits::SourceScanner;
use crate::scrapers::types::{Pipeline, PoliteDelay, RoundStats, ScanKey, SeenUrls};

pub const SITE: &str = "https://www.otodom.pl";
const PAGE_LIMIT: u32 = 72;
/// The last two organic links are promoted placements.
const PROMOTED_TAIL: usize = 2;

pub const HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("priority", "u=1, i"),
    ("sec-ch-ua", "\"Chromium\";v=\"140\", \"Not=A?Brand\";v=\"24\", \"Google Chrome\";v=\"140\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("x-nextjs-data", "1"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36",
    ),
    (
        "referer",
        "https://www.otodom.pl/pl/wyniki/sprzedaz/mieszkanie/mazowieckie/warszawa/warszawa/warszawa",
    ),
];

static ORGANIC_LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"div[data-cy="search.listing.organic"] a[data-cy="listing-item-link"][href]"#)
        .expect("listing link selector is valid")
});

/// Organic result links, promoted tail dropped, made absolute against `base`.
pub fn extract_search_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut hrefs: Vec<&str> = document
        .select(&ORGANIC_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .collect();
    hrefs.truncate(hrefs.len().saturating_sub(PROMOTED_TAIL));
    dedupe_keep_order(hrefs.into_iter().filter_map(|href| absolutize(base, href)))
}

/// Otodom scanner: search page per key, then one detail fetch per unseen link.
pub struct OtodomScanner {
    pipeline: Pipeline,
    site: String,
    headers: HeaderMap,
    delay: PoliteDelay,
    seen: SeenUrls<ScanKey>,
}

impl OtodomScanner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            site: SITE.to_string(),
            headers: header_map(HEADERS),
            delay: PoliteDelay::secs(1, 2),
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

    fn search_url(&self, deal_slug: &str, type_slug: &str, region: &str, city: &str) -> String {
        format!(
            "{}/pl/wyniki/{deal_slug}/{type_slug}/{region}/{city}/{city}/{city}",
            self.site
        )
    }

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>> {
        let options = RequestOptions::new()
            .headers(self.headers.clone())
            .param("limit", PAGE_LIMIT)
            .param("ownerTypeSingleSelect", "ALL")
            .param("by", "LATEST")
            .param("direction", "DESC")
            .param("page", 1);
        let html = self
            .pipeline
            .http
            .get_text(url, &options)
            .await
            .with_context(|| format!("Failed to fetch Otodom search page {url}"))?;
        Ok(extract_search_links(&html, &self.site))
    }

    async fn ingest(&self, url: &str, key: ScanKey) -> Result<bool> {
        let options = RequestOptions::new().headers(self.headers.clone());
        let html = self.pipeline.http.get_text(url, &options).await?;
        let mut ad = normalize::extract_ad(&html)?;
        fill_page_url(&mut ad, url);

        let Some(candidate) =
            normalize::map(&self.pipeline.places, &ad, key.property_type, key.deal_type).await?
        else {
            return Ok(false);
        };
        self.pipeline.listings.add_listing(&candidate).await
    }
}

/// Ads without a usable `url` of their own take the page they were fetched from.
fn fill_page_url(ad: &mut Value, url: &str) {
    if let Value::Object(fields) = ad {
        let missing = fields.get("url").map_or(true, |u| u.is_null() || u.as_str() == Some(""));
        if missing {
            fields.insert("url".to_string(), Value::String(url.to_string()));
        }
    }
}

#[async_trait]
impl SourceScanner for OtodomScanner {
    async fn scan_round(&mut self, token: &CancellationToken) -> Result<RoundStats> {
        let mut stats = RoundStats::default();

        'matrix: for (city_name, (region, city)) in SUPPORTED_CITIES.into_iter().zip(OTODOM_CITIES) {
            for ((type_slug, deal_slug), property_type, deal_type) in OTODOM_CATEGORIES {
                if token.is_cancelled() {
                    break 'matrix;
                }
                let key = ScanKey {
                    city: city_name,
                    property_type,
                    deal_type,
                };
                let url = self.search_url(deal_slug, type_slug, region, city);

                let links = match self.fetch_links(&url).await {
                    Ok(links) => links,
                    Err(e) => {
                        warn!(target: "otodom", %key, type_slug, error = %format!("{e:#}"), "search page failed");
                        stats.failed_keys += 1;
                        self.delay.wait(token).await;
                        continue;
                    }
                };
                let unseen = self.seen.take_new(key, links);
                stats.found += unseen.len();

                if !self.delay.wait(token).await {
                    break 'matrix;
                }
                if unseen.is_empty() {
                    continue;
                }

                let fresh = match self.pipeline.listings.filter_new_urls(&unseen).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        warn!(target: "otodom", %key, error = %format!("{e:#}"), "url pre-filter failed");
                        continue;
                    }
                };
                debug!(target: "otodom", %key, unseen = unseen.len(), fresh = fresh.len(), "links scanned");

                for url in &fresh {
                    if token.is_cancelled() {
                        break 'matrix;
                    }
                    match self.ingest(url, key).await {
                        Ok(true) => stats.added += 1,
                        Ok(false) => {}
                        Err(e) => warn!(target: "otodom", url = %url, error = %format!("{e:#}"), "failed to process offer"),
                    }
                }
            }
        }

        info!(target: "otodom", found = stats.found, added = stats.added, "round complete");
        Ok(stats)
    }

    fn source(&self) -> Source {
        Source::Otodom
    }
}
