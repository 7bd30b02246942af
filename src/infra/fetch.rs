//! HTTP adapters for origin fetches and backend metadata lookups.

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::application::chain::{FetchError, FetchedResponse, OriginFetcher};
use crate::application::metadata::{MetadataError, ReleaseMetadataSource, ReleaseRecord};
use crate::application::origins::{OriginDescriptor, join_segments};
use crate::config::OriginSettings;

use super::error::InfraError;

/// Build the client shared by every outbound request.
pub fn build_http_client(settings: &OriginSettings) -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .build()
        .map_err(|err| InfraError::http_client(err.to_string()))
}

#[derive(Clone)]
pub struct HttpOriginFetcher {
    client: Client,
}

impl HttpOriginFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, origin: &OriginDescriptor) -> Result<FetchedResponse, FetchError> {
        let response = self
            .client
            .get(origin.url.clone())
            .headers(origin.headers.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| match classify(err) {
                FetchError::Connect(message) => FetchError::Body(message),
                other => other,
            })?;

        Ok(FetchedResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connect(err.to_string())
    }
}

/// Album lookups against the internal backend.
#[derive(Clone)]
pub struct BackendMetadataClient {
    client: Client,
    base: Url,
}

impl BackendMetadataClient {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl ReleaseMetadataSource for BackendMetadataClient {
    async fn release(&self, release_id: &str) -> Result<ReleaseRecord, MetadataError> {
        let url = join_segments(&self.base, &["aotd", "getAlbum", release_id])
            .map_err(MetadataError::transport)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(MetadataError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                status: status.as_u16(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| MetadataError::malformed(err.to_string()))?;
        ReleaseRecord::from_album_payload(&payload)
    }
}
