use futures::future::BoxFuture;
use sqlx::{sqlite::SqlitePool, Row};

use super::store::{KeyValueStore, StoreEntries, StoreError};

#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn read(&self, keys: &[&str]) -> Result<StoreEntries, StoreError> {
        let mut found = StoreEntries::new();
        for key in keys {
            let row = sqlx::query(r#"SELECT value FROM kv_store WHERE key = ?1"#)
                .bind(*key)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                let raw: String = row.try_get("value")?;
                found.insert(key.to_string(), serde_json::from_str(&raw)?);
            }
        }
        Ok(found)
    }

    async fn write(&self, entries: StoreEntries) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"INSERT OR REPLACE INTO kv_store (key, value, updated_at)
                    VALUES (?1, ?2, CURRENT_TIMESTAMP)"#,
            )
            .bind(key)
            .bind(serde_json::to_string(&value)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoreEntries, StoreError>> {
        Box::pin(self.read(keys))
    }

    fn set(&self, entries: StoreEntries) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.write(entries))
    }
}
