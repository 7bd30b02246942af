use std::time::Duration;

use bytes::Bytes;
use sqlx::PgPool;
use vitrine::cache::{AssetStore, CachedAsset};
use vitrine::infra::db::PostgresStore;

fn asset(body: &'static [u8], placeholder: bool) -> CachedAsset {
    CachedAsset {
        body: Bytes::from_static(body),
        content_type: if placeholder {
            "image/svg+xml".to_string()
        } else {
            "image/png".to_string()
        },
        placeholder,
    }
}

const DAY: Duration = Duration::from_secs(86_400);

#[sqlx::test(migrations = "./migrations")]
async fn stored_asset_reads_back_with_flag(pool: PgPool) {
    let store = PostgresStore::new(pool);

    assert!(
        store
            .get("cover-art-mbid-123")
            .await
            .expect("get should succeed")
            .is_none()
    );

    store
        .set("cover-art-mbid-123", asset(b"png-bytes", false), DAY)
        .await
        .expect("set should succeed");
    store
        .set("user-photo-null", asset(b"<svg/>", true), DAY)
        .await
        .expect("set should succeed");

    let cover = store
        .get("cover-art-mbid-123")
        .await
        .expect("get should succeed")
        .expect("entry should be live");
    assert_eq!(cover, asset(b"png-bytes", false));

    let photo = store
        .get("user-photo-null")
        .await
        .expect("get should succeed")
        .expect("entry should be live");
    assert!(photo.placeholder);
    assert_eq!(photo.content_type, "image/svg+xml");
}

#[sqlx::test(migrations = "./migrations")]
async fn later_write_replaces_entry(pool: PgPool) {
    let store = PostgresStore::new(pool);

    store
        .set("user-photo-7", asset(b"<svg/>", true), DAY)
        .await
        .expect("first set should succeed");
    store
        .set("user-photo-7", asset(b"real-photo", false), DAY)
        .await
        .expect("second set should succeed");

    let stored = store
        .get("user-photo-7")
        .await
        .expect("get should succeed")
        .expect("entry should be live");
    assert_eq!(stored, asset(b"real-photo", false));
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_entries_are_hidden_then_swept(pool: PgPool) {
    let store = PostgresStore::new(pool.clone());

    store
        .set("user-photo-old", asset(b"stale", false), Duration::ZERO)
        .await
        .expect("set should succeed");
    store
        .set("user-photo-new", asset(b"fresh", false), DAY)
        .await
        .expect("set should succeed");

    assert!(
        store
            .get("user-photo-old")
            .await
            .expect("get should succeed")
            .is_none()
    );

    let removed = store.sweep_expired().await.expect("sweep should succeed");
    assert_eq!(removed, 1);

    let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM asset_cache")
        .fetch_one(&pool)
        .await
        .expect("count should succeed");
    assert_eq!(remaining, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn health_check_reaches_database(pool: PgPool) {
    let store = PostgresStore::new(pool);

    assert_eq!(store.backend(), "postgres");
    store.health_check().await.expect("database should answer");
}
