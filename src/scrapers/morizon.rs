use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::catalog::{HTML_CATEGORIES, MORIZON_CITIES};
use crate::http::{header_map, RequestOptions};
use crate::models::{DealType, PropertyType, Source};
use crate::normalize::morizon as normalize;
use crate::scrapers::traits::SourceScanner;
use crate::scrapers::types::{Pipeline, PoliteDelay, RoundStats, ScanKey, SeenUrls};

pub const SITE: &str = "https://www.morizon.pl";
const PAGE_TIMEOUT: Duration = Duration::from_secs(25);
const PHOTO_TIMEOUT: Duration = Duration::from_secs(30);

pub const HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    ("accept-language", "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("cache-control", "max-age=0"),
    ("priority", "u=0, i"),
    ("sec-ch-ua", "\"Google Chrome\";v=\"141\", \"Not?A_Brand\";v=\"8\", \"Chromium\";v=\"141\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
];

fn type_slug(property_type: PropertyType) -> &'static str {
    match property_type {
        PropertyType::Apartment => "mieszkania",
        PropertyType::House => "domy",
        PropertyType::Room => "pokoje",
    }
}

/// Morizon scanner: newest-first search page per key, then card and `/photo` page per link.
pub struct MorizonScanner {
    pipeline: Pipeline,
    site: String,
    headers: HeaderMap,
    delay: PoliteDelay,
    seen: SeenUrls<ScanKey>,
}

impl MorizonScanner {
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

    fn search_url(&self, property_type: PropertyType, deal_type: DealType, city_slug: &str) -> String {
        let deal = match deal_type {
            DealType::Rent => "do-wynajecia/",
            DealType::Sale => "",
        };
        format!(
            "{}/{deal}{}/najnowsze/{city_slug}/",
            self.site,
            type_slug(property_type)
        )
    }

    fn page_options(&self, timeout: Duration) -> RequestOptions {
        RequestOptions::new()
            .headers(self.headers.clone())
            .timeout(timeout)
    }

    async fn fetch_links(&self, url: &str) -> Result<Vec<String>> {
        let html = self
            .pipeline
            .http
            .get_text(url, &self.page_options(PAGE_TIMEOUT))
            .await
            .with_context(|| format!("Failed to fetch Morizon search page {url}"))?;
        Ok(normalize::extract_search_links(&html, &self.site))
    }

    /// Gallery photos; an unreachable `/photo` page just leaves the card without photos.
    async fn fetch_photos(&self, url: &str) -> Vec<String> {
        let photo_url = normalize::photo_page_url(url);
        match self
            .pipeline
            .http
            .get_text(&photo_url, &self.page_options(PHOTO_TIMEOUT))
            .await
        {
            Ok(html) => normalize::parse_photo_page(&html),
            Err(e) => {
                debug!(target: "morizon", url = %photo_url, error = %e, "photo page unavailable");
                Vec::new()
            }
        }
    }

    async fn ingest(&self, url: &str, key: ScanKey) -> Result<bool> {
        let html = self
            .pipeline
            .http
            .get_text(url, &self.page_options(PAGE_TIMEOUT))
            .await?;
        let mut card = normalize::parse_card(&html, key.city, url);
        card.images = self.fetch_photos(url).await;

        let Some(candidate) =
            normalize::map(&self.pipeline.places, &card, key.property_type, key.deal_type).await?
        else {
            return Ok(false);
        };
        self.pipeline.listings.add_listing(&candidate).await
    }
}

#[async_trait]
impl SourceScanner for MorizonScanner {
    async fn scan_round(&mut self, token: &CancellationToken) -> Result<RoundStats> {
        let mut stats = RoundStats::default();
        let mut batches = Vec::new();

        'search: for (city, city_slug) in MORIZON_CITIES {
            for (property_type, deal_type) in HTML_CATEGORIES {
                if token.is_cancelled() {
                    break 'search;
                }
                let key = ScanKey {
                    city,
                    property_type,
                    deal_type,
                };
                let url = self.search_url(property_type, deal_type, city_slug);

                match self.fetch_links(&url).await {
                    Ok(links) => {
                        let unseen = self.seen.take_new(key, links);
                        stats.found += unseen.len();
                        if !unseen.is_empty() {
                            batches.push((key, unseen));
                        }
                    }
                    Err(e) => {
                        warn!(target: "morizon", %key, error = %format!("{e:#}"), "search page failed");
                        stats.failed_keys += 1;
                    }
                }

                if !self.delay.wait(token).await {
                    break 'search;
                }
            }
        }
        info!(target: "morizon", found = stats.found, "search pages scanned");

        'cards: for (key, unseen) in batches {
            let fresh = match self.pipeline.listings.filter_new_urls(&unseen).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(target: "morizon", %key, error = %format!("{e:#}"), "url pre-filter failed");
                    continue;
                }
            };
            debug!(target: "morizon", %key, unseen = unseen.len(), fresh = fresh.len(), "new links");

            for url in &fresh {
                if token.is_cancelled() {
                    break 'cards;
                }
                match self.ingest(url, key).await {
                    Ok(true) => stats.added += 1,
                    Ok(false) => {}
                    Err(e) => warn!(target: "morizon", url = %url, error = %format!("{e:#}"), "failed card"),
                }
            }
        }

        info!(target: "morizon", found = stats.found, added = stats.added, "round complete");
        Ok(stats)
    }

    fn source(&self) -> Source {
        Source::Morizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpClient, RetryPolicy};
    use crate::storage::Database;
    use httptest::matchers::request;
    use httptest::responders::status_code;
    use httptest::{Expectation, Server};

    fn card(title: &str, price: &str) -> String {
        format!(
            r#"<html><body>
            <h1 data-cy="pageDetailsPropertyTitle">{title}</h1>
            <span data-cy="priceRowPrice">{price} zł</span>
            <span data-cy="detailsRowTextNumberOfRooms">2 pokoje</span>
            <div class="ASk2iX"><p>Opis: {title}</p></div>
            </body></html>"#
        )
    }

    #[tokio::test]
    async fn search_urls_follow_site_layout() {
        let db = Database::in_memory().await.unwrap();
        let pipeline = Pipeline::new(HttpClient::direct(RetryPolicy::default()).unwrap(), &db);
        let scanner = MorizonScanner::new(pipeline);
        assert_eq!(
            scanner.search_url(PropertyType::Apartment, DealType::Rent, "krakow"),
            "https://www.morizon.pl/do-wynajecia/mieszkania/najnowsze/krakow/"
        );
        assert_eq!(
            scanner.search_url(PropertyType::House, DealType::Sale, "lodz"),
            "https://www.morizon.pl/domy/najnowsze/lodz/"
        );
    }

    #[tokio::test]
    async fn cards_are_stored_even_without_a_gallery() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method("GET"))
                .times(..)
                .respond_with(status_code(200).body("<html><body></body></html>")),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/do-wynajecia/mieszkania/najnowsze/warszawa/",
            ))
            .times(1)
            .respond_with(status_code(200).body(
                r#"<a data-cy="propertyUrl" href="/oferta/wynajem-mieszkanie-mzn2000000001">a</a>
                   <a data-cy="propertyUrl" href="/oferta/wynajem-mieszkanie-mzn2000000002">b</a>
                   <a data-cy="propertyUrl" href="/inwestycja/osiedle">skip</a>"#,
            )),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/oferta/wynajem-mieszkanie-mzn2000000001",
            ))
            .times(1)
            .respond_with(status_code(200).body(card("Kawalerka", "2 400"))),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/oferta/wynajem-mieszkanie-mzn2000000001/photo",
            ))
            .times(1)
            .respond_with(status_code(200).body(
                r#"<div id="gallery__photos"><button><img srcset="https://img/1-s.jpg 300w, https://img/1.jpg 1200w"></button></div>"#,
            )),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/oferta/wynajem-mieszkanie-mzn2000000002",
            ))
            .times(1)
            .respond_with(status_code(200).body(card("Dwa pokoje", "3 100"))),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/oferta/wynajem-mieszkanie-mzn2000000002/photo",
            ))
            .respond_with(status_code(404)),
        );

        let db = Database::in_memory().await.unwrap();
        let policy = RetryPolicy {
            max_retries: 1,
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let pipeline = Pipeline::new(HttpClient::direct(policy).unwrap(), &db);
        let mut scanner = MorizonScanner::new(pipeline)
            .with_site(server.url_str("/"))
            .with_delay(PoliteDelay::none());
        let token = CancellationToken::new();

        let stats = scanner.scan_round(&token).await.unwrap();
        assert_eq!(stats.found, 2);
        assert_eq!(stats.added, 2);

        let with_photos = db
            .listings()
            .find_by_source_id(Source::Morizon, "2000000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(with_photos.price, Some(2400.0));
        assert_eq!(with_photos.photos, vec!["https://img/1.jpg"]);
        assert_eq!(with_photos.deal_type, DealType::Rent);

        let without = db
            .listings()
            .find_by_source_id(Source::Morizon, "2000000002")
            .await
            .unwrap()
            .unwrap();
        assert!(without.photos.is_empty());
    }
}
