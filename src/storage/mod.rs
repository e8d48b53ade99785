//! SQLite-backed persistence: schema, place resolver and listing store.
//!
//! One [`Database`] is built at startup and cloned into every worker; each
//! repository call checks a connection out of the shared pool and commits
//! immediately.

pub mod listings;
pub mod places;

pub use listings::{ListingRef, ListingStore};
pub use places::PlaceResolver;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name_pl TEXT NOT NULL UNIQUE,
    name_uk TEXT,
    name_en TEXT,
    created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
);

CREATE TABLE IF NOT EXISTS districts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    city_id INTEGER NOT NULL REFERENCES cities(id) ON DELETE CASCADE,
    name_pl TEXT NOT NULL,
    name_uk TEXT,
    name_en TEXT,
    created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
    UNIQUE (city_id, name_pl)
);

CREATE INDEX IF NOT EXISTS ix_districts_city ON districts(city_id);

CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    source_ad_id TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    external_url TEXT,
    property_type TEXT NOT NULL CHECK (property_type IN ('apartment', 'house', 'room')),
    deal_type TEXT NOT NULL CHECK (deal_type IN ('rent', 'sale')),
    title TEXT,
    title_en TEXT,
    title_uk TEXT,
    description TEXT,
    description_en TEXT,
    description_uk TEXT,
    description_hash TEXT,
    price REAL,
    currency TEXT,
    city_id INTEGER NOT NULL REFERENCES cities(id) ON DELETE RESTRICT,
    district_id INTEGER REFERENCES districts(id) ON DELETE SET NULL,
    address TEXT,
    area_m2 REAL,
    rooms INTEGER,
    market TEXT NOT NULL DEFAULT 'unknown',
    pets_allowed INTEGER,
    child_allowed INTEGER,
    no_comission INTEGER,
    photos TEXT NOT NULL DEFAULT '[]',
    raw TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1,
    is_translated INTEGER NOT NULL DEFAULT 0,
    last_check INTEGER,
    scraped_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (source, source_ad_id)
);

CREATE INDEX IF NOT EXISTS ix_listings_external_url ON listings(external_url);
CREATE INDEX IF NOT EXISTS ix_listings_city_prop_deal_desc_hash
    ON listings(city_id, property_type, deal_type, description_hash);
CREATE INDEX IF NOT EXISTS ix_listings_last_check ON listings(last_check);
"#;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to open database pool")?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!(target: "storage", max_connections, "database ready");
        Ok(db)
    }

    /// Single-connection in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn places(&self) -> PlaceResolver {
        PlaceResolver::new(self.pool.clone())
    }

    pub fn listings(&self) -> ListingStore {
        ListingStore::new(self.pool.clone())
    }
}
