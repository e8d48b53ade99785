//! Background re-validation of stored listings.
//!
//! Rows whose `last_check` is missing or older than the check interval are
//! probed with a single status request. 404/410/451 delete the row; anything
//! else, including a transport failure, only stamps `last_check`.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ScoutConfig;
use crate::http::HttpClient;
use crate::scrapers::headers_for;
use crate::scrapers::types::sleep_or_cancel;
use crate::storage::{ListingRef, ListingStore};

pub const GONE_STATUSES: [StatusCode; 3] = [
    StatusCode::NOT_FOUND,
    StatusCode::GONE,
    StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
];
const ITEMS_PER_WORKER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Deleted,
    Stamped,
}

#[derive(Debug, Clone, Copy)]
pub struct Pauses {
    /// After each item, per worker
    pub item: Duration,
    /// Between non-empty batches
    pub batch: Duration,
    /// When nothing is due
    pub idle: Duration,
}

impl Default for Pauses {
    fn default() -> Self {
        Self {
            item: Duration::from_secs(1),
            batch: Duration::from_secs(2),
            idle: Duration::from_secs(300),
        }
    }
}

pub struct LivenessChecker {
    http: HttpClient,
    listings: ListingStore,
    interval: Duration,
    workers: usize,
    pauses: Pauses,
}

impl LivenessChecker {
    pub fn new(http: HttpClient, listings: ListingStore, interval: Duration, workers: usize) -> Self {
        Self {
            http,
            listings,
            interval,
            workers: workers.max(1),
            pauses: Pauses::default(),
        }
    }

    pub fn from_config(config: &ScoutConfig, http: HttpClient, listings: ListingStore) -> Self {
        Self::new(http, listings, config.check_interval, config.liveness_workers())
    }

    pub fn with_pauses(mut self, pauses: Pauses) -> Self {
        self.pauses = pauses;
        self
    }

    fn batch_size(&self) -> usize {
        self.workers * ITEMS_PER_WORKER
    }

    /// Check batches until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        info!(target: "liveness", workers = self.workers, interval_secs = self.interval.as_secs(), "liveness checker started");

        while !token.is_cancelled() {
            let pause = match self.run_round(&token).await {
                Ok(0) => {
                    info!(target: "liveness", "nothing due for a check");
                    self.pauses.idle
                }
                Ok(checked) => {
                    info!(target: "liveness", checked, "batch checked");
                    self.pauses.batch
                }
                Err(e) => {
                    error!(target: "liveness", error = %format!("{e:#}"), "liveness round failed");
                    self.pauses.batch
                }
            };
            if !sleep_or_cancel(pause, &token).await {
                break;
            }
        }

        info!(target: "liveness", "liveness checker stopped");
    }

    /// Select one batch of due listings and check it; returns the batch size.
    pub async fn run_round(&self, token: &CancellationToken) -> Result<usize> {
        let interval = chrono::Duration::from_std(self.interval)?;
        let cutoff = Utc::now() - interval;
        let due = self
            .listings
            .due_for_check(cutoff, self.batch_size() as i64)
            .await?;
        let selected = due.len();

        stream::iter(due)
            .for_each_concurrent(self.workers, |listing| async move {
                if token.is_cancelled() {
                    return;
                }
                let id = listing.id;
                if let Err(e) = self.check_one(listing).await {
                    error!(target: "liveness", id, error = %format!("{e:#}"), "failed to record check");
                }
                sleep_or_cancel(self.pauses.item, token).await;
            })
            .await;

        Ok(selected)
    }

    pub async fn check_one(&self, listing: ListingRef) -> Result<CheckOutcome> {
        let headers = headers_for(listing.source);
        match self.http.fetch_status(&listing.url, &headers).await {
            Ok(status) if GONE_STATUSES.contains(&status) => {
                info!(target: "liveness", id = listing.id, url = %listing.url, status = status.as_u16(), "listing gone, deleting");
                self.listings.delete(listing.id).await?;
                return Ok(CheckOutcome::Deleted);
            }
            Ok(status) if status != StatusCode::OK => {
                warn!(target: "liveness", id = listing.id, url = %listing.url, status = status.as_u16(), "unexpected status");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "liveness", id = listing.id, url = %listing.url, error = %e, "status probe failed");
            }
        }
        self.listings.mark_checked(listing.id, Utc::now()).await?;
        Ok(CheckOutcome::Stamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use crate::models::{DealType, ListingCandidate, Market, PropertyType, Source};
    use crate::storage::Database;
    use httptest::matchers::{contains, request};
    use httptest::responders::status_code;
    use httptest::{all_of, Expectation, Server};
    use serde_json::Value;

    fn quick() -> Pauses {
        Pauses {
            item: Duration::ZERO,
            batch: Duration::ZERO,
            idle: Duration::ZERO,
        }
    }

    async fn store(db: &Database, id: &str, url: String) -> i64 {
        let places = db.places();
        let city_id = places.upsert_city_by_name_pl("Kraków").await.unwrap();
        let candidate = ListingCandidate {
            source: Source::Otodom,
            source_ad_id: id.to_string(),
            url,
            external_url: None,
            deal_type: DealType::Sale,
            property_type: PropertyType::Apartment,
            title: None,
            description: None,
            price: None,
            currency: None,
            city_id,
            district_id: None,
            address: None,
            area_m2: None,
            rooms: None,
            market: Market::Unknown,
            pets_allowed: None,
            child_allowed: None,
            no_comission: None,
            photos: vec![],
            raw: Value::Null,
        };
        let listings = db.listings();
        assert!(listings.add_listing(&candidate).await.unwrap());
        let stored = listings
            .find_by_source_id(Source::Otodom, id)
            .await
            .unwrap()
            .unwrap();
        // make it due
        listings
            .mark_checked(stored.id, Utc::now() - chrono::Duration::days(3))
            .await
            .unwrap();
        stored.id
    }

    fn checker(db: &Database) -> LivenessChecker {
        let http = HttpClient::direct(RetryPolicy::default()).unwrap();
        LivenessChecker::new(http, db.listings(), Duration::from_secs(2 * 3600), 2).with_pauses(quick())
    }

    #[tokio::test]
    async fn gone_is_deleted_everything_else_is_stamped() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/oferta/sold"),
                request::headers(contains(("x-nextjs-data", "1"))),
            ])
            .times(1)
            .respond_with(status_code(410)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/oferta/live"))
                .times(1)
                .respond_with(status_code(200)),
        );

        let db = Database::in_memory().await.unwrap();
        let sold = store(&db, "1", server.url_str("/oferta/sold")).await;
        let live = store(&db, "2", server.url_str("/oferta/live")).await;
        let unreachable = store(&db, "3", "http://127.0.0.1:1/oferta/x".to_string()).await;

        let before = Utc::now() - chrono::Duration::seconds(1);
        let checker = checker(&db);
        let token = CancellationToken::new();
        assert_eq!(checker.run_round(&token).await.unwrap(), 3);

        let listings = db.listings();
        assert!(listings.get(sold).await.unwrap().is_none());
        for id in [live, unreachable] {
            let row = listings.get(id).await.unwrap().unwrap();
            assert!(row.last_check.unwrap() >= before, "listing {id} not stamped");
        }

        // freshly stamped rows are not due again
        assert_eq!(checker.run_round(&token).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn other_error_statuses_keep_the_row() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/oferta/limited"))
                .times(1)
                .respond_with(status_code(429)),
        );

        let db = Database::in_memory().await.unwrap();
        let id = store(&db, "9", server.url_str("/oferta/limited")).await;
        let listing = ListingRef {
            id,
            source: Source::Otodom,
            url: server.url_str("/oferta/limited"),
        };

        let outcome = checker(&db).check_one(listing).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Stamped);
        assert!(db.listings().get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_run_returns_immediately() {
        let db = Database::in_memory().await.unwrap();
        let checker = checker(&db).with_pauses(Pauses {
            idle: Duration::from_secs(300),
            ..quick()
        });
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), checker.run(token))
            .await
            .expect("run should stop on cancel");
    }
}
