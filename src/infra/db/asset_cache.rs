use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::query;

use crate::cache::{AssetStore, CachedAsset, StoreError};

use super::{PostgresStore, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct AssetCacheRow {
    body: Vec<u8>,
    content_type: String,
    placeholder: bool,
}

impl From<AssetCacheRow> for CachedAsset {
    fn from(row: AssetCacheRow) -> Self {
        Self {
            body: Bytes::from(row.body),
            content_type: row.content_type,
            placeholder: row.placeholder,
        }
    }
}

#[async_trait]
impl AssetStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &str) -> Result<Option<CachedAsset>, StoreError> {
        let row = sqlx::query_as::<_, AssetCacheRow>(
            r#"
            SELECT body, content_type, placeholder
            FROM asset_cache
            WHERE cache_key = $1 AND expires_at > now()
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CachedAsset::from))
    }

    async fn set(&self, key: &str, asset: CachedAsset, ttl: Duration) -> Result<(), StoreError> {
        query(
            r#"
            INSERT INTO asset_cache (cache_key, body, content_type, placeholder, stored_at, expires_at)
            VALUES ($1, $2, $3, $4, now(), now() + make_interval(secs => $5))
            ON CONFLICT (cache_key) DO UPDATE
            SET body = EXCLUDED.body,
                content_type = EXCLUDED.content_type,
                placeholder = EXCLUDED.placeholder,
                stored_at = EXCLUDED.stored_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(asset.body.as_ref())
        .bind(&asset.content_type)
        .bind(asset.placeholder)
        .bind(ttl.as_secs_f64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let result = query("DELETE FROM asset_cache WHERE expires_at <= now()")
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
