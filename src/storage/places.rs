use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{City, District};

/// Idempotent city/district name → id lookup.
///
/// Insert first; on a uniqueness conflict the insert returns no row and the
/// committed winner is selected instead.
#[derive(Clone)]
pub struct PlaceResolver {
    pool: SqlitePool,
}

impl PlaceResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_city_by_name_pl(&self, name_pl: &str) -> Result<i64> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO cities (name_pl) VALUES (?) ON CONFLICT (name_pl) DO NOTHING RETURNING id",
        )
        .bind(name_pl)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to insert city {name_pl}"))?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        sqlx::query_scalar("SELECT id FROM cities WHERE name_pl = ?")
            .bind(name_pl)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to select city {name_pl}"))
    }

    pub async fn upsert_district_by_name_pl(&self, city_id: i64, name_pl: &str) -> Result<i64> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO districts (city_id, name_pl) VALUES (?, ?)
            ON CONFLICT (city_id, name_pl) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(city_id)
        .bind(name_pl)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to insert district {name_pl} (city {city_id})"))?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        sqlx::query_scalar("SELECT id FROM districts WHERE city_id = ? AND name_pl = ?")
            .bind(city_id)
            .bind(name_pl)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to select district {name_pl} (city {city_id})"))
    }

    pub async fn find_city(&self, name_pl: &str) -> Result<Option<City>> {
        let row: Option<(i64, String, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, name_pl, name_uk, name_en FROM cities WHERE name_pl = ?")
                .bind(name_pl)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up city")?;
        Ok(row.map(|(id, name_pl, name_uk, name_en)| City {
            id,
            name_pl,
            name_uk,
            name_en,
        }))
    }

    pub async fn districts_of(&self, city_id: i64) -> Result<Vec<District>> {
        let rows: Vec<(i64, i64, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, city_id, name_pl, name_uk, name_en FROM districts WHERE city_id = ? ORDER BY id",
        )
        .bind(city_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list districts")?;
        Ok(rows
            .into_iter()
            .map(|(id, city_id, name_pl, name_uk, name_en)| District {
                id,
                city_id,
                name_pl,
                name_uk,
                name_en,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn city_upsert_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let places = db.places();

        let first = places.upsert_city_by_name_pl("Kraków").await.unwrap();
        let second = places.upsert_city_by_name_pl("Kraków").await.unwrap();
        let other = places.upsert_city_by_name_pl("Gdańsk").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_city_upserts_agree_on_one_row() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("scout-places-{}-{nanos}.db", std::process::id()));
        let db = Database::connect(&format!("sqlite://{}", path.display()), 8)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let places = db.places();
                tokio::spawn(async move { places.upsert_city_by_name_pl("Kraków").await })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap());
        }
        assert!(ids.iter().all(|id| *id == ids[0]), "{ids:?}");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cities WHERE name_pl = 'Kraków'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        db.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn district_names_are_scoped_to_city() {
        let db = Database::in_memory().await.unwrap();
        let places = db.places();
        let warsaw = places.upsert_city_by_name_pl("Warszawa").await.unwrap();
        let wroclaw = places.upsert_city_by_name_pl("Wrocław").await.unwrap();

        let a = places.upsert_district_by_name_pl(warsaw, "Śródmieście").await.unwrap();
        let again = places.upsert_district_by_name_pl(warsaw, "Śródmieście").await.unwrap();
        let b = places.upsert_district_by_name_pl(wroclaw, "Śródmieście").await.unwrap();

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(places.districts_of(warsaw).await.unwrap().len(), 1);
        let city = places.find_city("Wrocław").await.unwrap().unwrap();
        assert_eq!(city.id, wroclaw);
        assert_eq!((city.name_uk, city.name_en), (None, None));
        assert_eq!(places.districts_of(wroclaw).await.unwrap()[0].name_en, None);
    }
}
