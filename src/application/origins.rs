//! Origin resolution: which URLs may hold the bytes for an asset, and in what order.

use std::sync::Arc;

use axum::http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{InvalidHeaderValue, USER_AGENT},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::domain::assets::{AssetClass, AssetKey};

use super::metadata::{MetadataError, ReleaseMetadataSource};

const PLACEHOLDER_SIZE: &str = "300x300";
const PLACEHOLDER_BACKGROUND: &str = "transparent";
const PLACEHOLDER_FOREGROUND: &str = "FOO";

/// One fetch attempt in a fallback chain.
#[derive(Debug, Clone)]
pub struct OriginDescriptor {
    /// Stable name for logs and metrics.
    pub label: &'static str,
    pub url: Url,
    pub headers: HeaderMap,
    success: fn(StatusCode) -> bool,
}

impl OriginDescriptor {
    pub fn new(label: &'static str, url: Url, headers: HeaderMap) -> Self {
        Self {
            label,
            url,
            headers,
            success: is_success_status,
        }
    }

    /// Whether `status` counts as this origin having the asset.
    pub fn accepts(&self, status: StatusCode) -> bool {
        (self.success)(status)
    }
}

fn is_success_status(status: StatusCode) -> bool {
    status.is_success()
}

/// Origin endpoints and limits.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    pub cover_archive_url: Url,
    pub backend_url: Url,
    pub placeholder_url: Url,
    pub user_agent: String,
    pub max_chain_length: usize,
}

impl From<&crate::config::OriginSettings> for OriginConfig {
    fn from(settings: &crate::config::OriginSettings) -> Self {
        Self {
            cover_archive_url: settings.cover_archive_url.clone(),
            backend_url: settings.backend_url.clone(),
            placeholder_url: settings.placeholder_url.clone(),
            user_agent: settings.user_agent.clone(),
            max_chain_length: settings.max_chain_length.get(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("metadata lookup for release `{id}` failed")]
    Prerequisite {
        id: String,
        #[source]
        source: MetadataError,
    },
    #[error("release `{id}` has no release group")]
    MissingGroupingId { id: String },
    #[error("`{url}` cannot be used as an origin base")]
    InvalidBase { url: String },
    #[error("invalid client identification header")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

struct Placeholders {
    cover_art: OriginDescriptor,
    cover_art_absent: OriginDescriptor,
    user_photo: OriginDescriptor,
    user_photo_absent: OriginDescriptor,
}

/// Builds the ordered origin list for an asset.
pub struct OriginResolver {
    config: OriginConfig,
    headers: HeaderMap,
    metadata: Arc<dyn ReleaseMetadataSource>,
    placeholders: Placeholders,
}

impl OriginResolver {
    pub fn new(
        config: OriginConfig,
        metadata: Arc<dyn ReleaseMetadataSource>,
    ) -> Result<Self, ResolutionError> {
        for base in [&config.cover_archive_url, &config.backend_url] {
            ensure_base(base)?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);

        let placeholder = |text: &str| -> Result<OriginDescriptor, ResolutionError> {
            let mut url = join_segments(
                &config.placeholder_url,
                &[
                    PLACEHOLDER_SIZE,
                    PLACEHOLDER_BACKGROUND,
                    PLACEHOLDER_FOREGROUND,
                ],
            )?;
            url.query_pairs_mut().append_pair("text", text);
            Ok(OriginDescriptor::new("placeholder", url, headers.clone()))
        };

        let placeholders = Placeholders {
            cover_art: placeholder("Cover Not Found")?,
            cover_art_absent: placeholder("No Cover")?,
            user_photo: placeholder("Photo Not Found")?,
            user_photo_absent: placeholder("No Photo")?,
        };

        Ok(Self {
            config,
            headers,
            metadata,
            placeholders,
        })
    }

    /// Produce the origins to try, in order.
    ///
    /// The sentinel identifier yields no origins. Cover art needs the release
    /// group first; when that lookup fails nothing is guessed.
    pub async fn resolve(&self, key: &AssetKey) -> Result<Vec<OriginDescriptor>, ResolutionError> {
        if key.is_sentinel() {
            debug!(key = %key, "sentinel identifier resolves to no origins");
            return Ok(Vec::new());
        }

        let mut origins = match key.class {
            AssetClass::CoverArt => self.cover_art_origins(key.id.as_str()).await?,
            AssetClass::UserPhoto => vec![self.user_photo_origin(key.id.as_str())?],
        };
        origins.truncate(self.config.max_chain_length);
        Ok(origins)
    }

    /// The synthetic image served when no origin can supply the asset.
    pub fn placeholder_for(&self, key: &AssetKey) -> &OriginDescriptor {
        match (key.class, key.is_sentinel()) {
            (AssetClass::CoverArt, false) => &self.placeholders.cover_art,
            (AssetClass::CoverArt, true) => &self.placeholders.cover_art_absent,
            (AssetClass::UserPhoto, false) => &self.placeholders.user_photo,
            (AssetClass::UserPhoto, true) => &self.placeholders.user_photo_absent,
        }
    }

    async fn cover_art_origins(
        &self,
        release_id: &str,
    ) -> Result<Vec<OriginDescriptor>, ResolutionError> {
        let record = self.metadata.release(release_id).await.map_err(|source| {
            ResolutionError::Prerequisite {
                id: release_id.to_string(),
                source,
            }
        })?;
        let group_id = record
            .release_group_id
            .ok_or_else(|| ResolutionError::MissingGroupingId {
                id: release_id.to_string(),
            })?;

        let base = &self.config.cover_archive_url;
        Ok(vec![
            OriginDescriptor::new(
                "release-group",
                join_segments(base, &["release-group", &group_id, "front"])?,
                self.headers.clone(),
            ),
            OriginDescriptor::new(
                "release",
                join_segments(base, &["release", release_id, "front"])?,
                self.headers.clone(),
            ),
        ])
    }

    fn user_photo_origin(&self, image_id: &str) -> Result<OriginDescriptor, ResolutionError> {
        // The backend routes photo downloads with a trailing slash.
        let url = join_segments(&self.config.backend_url, &["photos", "image", image_id, ""])?;
        Ok(OriginDescriptor::new("photo-backend", url, self.headers.clone()))
    }
}

fn ensure_base(url: &Url) -> Result<(), ResolutionError> {
    if url.cannot_be_a_base() {
        return Err(ResolutionError::InvalidBase {
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, ResolutionError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ResolutionError::InvalidBase {
            url: base.to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
