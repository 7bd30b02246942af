//! Cache gateway: store lookup, origin chain on miss, store write-back.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{AssetStore, CacheConfig, CachedAsset, TtlPolicy};
use crate::domain::assets::{AssetClass, AssetId, AssetKey};

use super::chain::{ChainError, ChainResult, FallbackChain, PlaceholderReason};
use super::origins::OriginResolver;

const METRIC_CACHE_HIT: &str = "vitrine_asset_cache_hit_total";
const METRIC_CACHE_MISS: &str = "vitrine_asset_cache_miss_total";
const METRIC_STORE_ERROR: &str = "vitrine_asset_store_error_total";

/// Everything the HTTP layer needs to answer an asset request.
#[derive(Debug, Clone)]
pub struct AssetResponse {
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub served_from_cache: bool,
    pub placeholder: bool,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("asset identifier must not be empty")]
    InvalidIdentifier,
    #[error("no image could be produced for `{key}`")]
    PlaceholderUnavailable {
        key: String,
        #[source]
        source: ChainError,
    },
}

pub struct AssetGateway {
    store: Arc<dyn AssetStore>,
    resolver: OriginResolver,
    chain: FallbackChain,
    ttl: TtlPolicy,
    cache_control: String,
}

impl AssetGateway {
    pub fn new(
        store: Arc<dyn AssetStore>,
        resolver: OriginResolver,
        chain: FallbackChain,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            chain,
            ttl: config.ttl_policy(),
            cache_control: config.cache_control_header(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub async fn get_asset(
        &self,
        class: AssetClass,
        identifier: &str,
    ) -> Result<AssetResponse, GatewayError> {
        let id = AssetId::parse(identifier).map_err(|_| GatewayError::InvalidIdentifier)?;
        let key = AssetKey::new(class, id);
        let cache_key = key.cache_key();

        if let Some(cached) = self.lookup(&key, &cache_key).await {
            counter!(
                METRIC_CACHE_HIT,
                "class" => class.as_str(),
                "backend" => self.store.backend()
            )
            .increment(1);
            debug!(key = %cache_key, placeholder = cached.placeholder, "Asset served from cache");
            return Ok(self.respond(cached.body, cached.content_type, true, cached.placeholder));
        }

        counter!(
            METRIC_CACHE_MISS,
            "class" => class.as_str(),
            "backend" => self.store.backend()
        )
        .increment(1);

        let resolved = self.resolve(&key).await.map_err(|source| {
            GatewayError::PlaceholderUnavailable {
                key: cache_key.clone(),
                source,
            }
        })?;

        let placeholder = resolved.is_placeholder();
        let ttl = self.ttl.for_result(placeholder);
        let entry = CachedAsset {
            body: resolved.body.clone(),
            content_type: resolved.content_type.clone(),
            placeholder,
        };
        if let Err(err) = self.store.set(&cache_key, entry, ttl).await {
            counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
            warn!(
                key = %cache_key,
                backend = self.store.backend(),
                error = %err,
                "Asset store write failed, skipping"
            );
        }

        info!(
            key = %cache_key,
            outcome = ?resolved.outcome,
            ttl_secs = ttl.as_secs(),
            "Asset resolved"
        );
        Ok(self.respond(resolved.body, resolved.content_type, false, placeholder))
    }

    /// Cache read that degrades to a miss on store failure.
    ///
    /// The sentinel must always end on a placeholder, so a non-placeholder
    /// entry under its key is ignored.
    async fn lookup(&self, key: &AssetKey, cache_key: &str) -> Option<CachedAsset> {
        match self.store.get(cache_key).await {
            Ok(Some(cached)) if key.is_sentinel() && !cached.placeholder => {
                warn!(key = %cache_key, "Ignoring non-placeholder entry for sentinel");
                None
            }
            Ok(found) => found,
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                warn!(
                    key = %cache_key,
                    backend = self.store.backend(),
                    error = %err,
                    "Asset store read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn resolve(&self, key: &AssetKey) -> Result<ChainResult, ChainError> {
        let placeholder = self.resolver.placeholder_for(key);
        match self.resolver.resolve(key).await {
            Ok(origins) => self.chain.execute(&origins, placeholder).await,
            Err(err) => {
                warn!(key = %key, error = %err, "Origin resolution failed");
                self.chain
                    .fall_back(placeholder, PlaceholderReason::ResolutionFailed)
                    .await
            }
        }
    }

    fn respond(
        &self,
        body: Bytes,
        content_type: String,
        served_from_cache: bool,
        placeholder: bool,
    ) -> AssetResponse {
        AssetResponse {
            body,
            content_type,
            cache_control: self.cache_control.clone(),
            served_from_cache,
            placeholder,
        }
    }
}
