//! Fallback chain execution over resolved origins.
//!
//! Origins are tried strictly in order and the first acceptable response wins.
//! When none qualifies, the placeholder generator is asked instead. Only a
//! failing placeholder surfaces as an error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use imagesize::ImageType;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::origins::OriginDescriptor;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

const METRIC_ORIGIN_FETCH: &str = "vitrine_origin_fetch_total";
const METRIC_PLACEHOLDER_SERVED: &str = "vitrine_placeholder_served_total";
const METRIC_CHAIN_MS: &str = "vitrine_chain_ms";

/// Raw response from one origin attempt.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin request timed out")]
    Timeout,
    #[error("origin request failed: {0}")]
    Connect(String),
    #[error("origin body could not be read: {0}")]
    Body(String),
}

/// Performs a single GET against an origin. No retries.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, origin: &OriginDescriptor) -> Result<FetchedResponse, FetchError>;
}

/// Why a chain ended on the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderReason {
    /// The resolver produced nothing to try.
    NoOrigins,
    /// Every origin answered, none with a usable asset.
    NotFound,
    /// At least one origin could not be reached.
    TransportFailure,
    /// Origins could not be determined at all.
    ResolutionFailed,
}

impl PlaceholderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderReason::NoOrigins => "no_origins",
            PlaceholderReason::NotFound => "not_found",
            PlaceholderReason::TransportFailure => "transport_failure",
            PlaceholderReason::ResolutionFailed => "resolution_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Origin { index: usize, label: &'static str },
    Placeholder(PlaceholderReason),
}

#[derive(Debug, Clone)]
pub struct ChainResult {
    pub body: Bytes,
    pub content_type: String,
    pub outcome: ChainOutcome,
}

impl ChainResult {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.outcome, ChainOutcome::Placeholder(_))
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    /// `status` is `None` when the generator could not be reached at all.
    #[error("placeholder unavailable ({reason}): {detail}")]
    PlaceholderUnavailable {
        reason: &'static str,
        status: Option<StatusCode>,
        detail: String,
    },
}

enum ChainState {
    Next { index: usize, transport_failed: bool },
    Placeholder(PlaceholderReason),
}

enum Attempt {
    Accepted { body: Bytes, content_type: String },
    Rejected,
    Unreachable,
}

pub struct FallbackChain {
    fetcher: Arc<dyn OriginFetcher>,
}

impl FallbackChain {
    pub fn new(fetcher: Arc<dyn OriginFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn execute(
        &self,
        origins: &[OriginDescriptor],
        placeholder: &OriginDescriptor,
    ) -> Result<ChainResult, ChainError> {
        let started = Instant::now();
        let mut state = ChainState::Next {
            index: 0,
            transport_failed: false,
        };

        let result = loop {
            state = match state {
                ChainState::Next {
                    index,
                    transport_failed,
                } => match origins.get(index) {
                    None => ChainState::Placeholder(exhausted_reason(
                        origins.is_empty(),
                        transport_failed,
                    )),
                    Some(origin) => match self.attempt(origin).await {
                        Attempt::Accepted { body, content_type } => {
                            break Ok(ChainResult {
                                body,
                                content_type,
                                outcome: ChainOutcome::Origin {
                                    index,
                                    label: origin.label,
                                },
                            });
                        }
                        Attempt::Rejected => ChainState::Next {
                            index: index + 1,
                            transport_failed,
                        },
                        Attempt::Unreachable => ChainState::Next {
                            index: index + 1,
                            transport_failed: true,
                        },
                    },
                },
                ChainState::Placeholder(reason) => {
                    break self.fall_back(placeholder, reason).await;
                }
            };
        };

        histogram!(METRIC_CHAIN_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Serve the placeholder directly, skipping any origins.
    pub async fn fall_back(
        &self,
        placeholder: &OriginDescriptor,
        reason: PlaceholderReason,
    ) -> Result<ChainResult, ChainError> {
        let unavailable = |status: Option<StatusCode>, detail: String| {
            warn!(
                origin = %placeholder.url,
                status = status.map(|s| s.as_u16()),
                reason = reason.as_str(),
                %detail,
                "Placeholder generator failed"
            );
            ChainError::PlaceholderUnavailable {
                reason: reason.as_str(),
                status,
                detail,
            }
        };

        let response = self
            .fetcher
            .fetch(placeholder)
            .await
            .map_err(|err| unavailable(None, err.to_string()))?;

        if !placeholder.accepts(response.status) {
            return Err(unavailable(
                Some(response.status),
                format!("generator answered {}", response.status),
            ));
        }
        if response.body.is_empty() {
            return Err(unavailable(
                Some(response.status),
                "generator returned an empty body".to_string(),
            ));
        }
        let Some(content_type) =
            verify_content_type(response.content_type.as_deref(), &response.body)
        else {
            return Err(unavailable(
                Some(response.status),
                "generator returned a non-image body".to_string(),
            ));
        };

        counter!(METRIC_PLACEHOLDER_SERVED, "reason" => reason.as_str()).increment(1);
        info!(reason = reason.as_str(), "Serving placeholder");

        Ok(ChainResult {
            body: response.body,
            content_type,
            outcome: ChainOutcome::Placeholder(reason),
        })
    }

    async fn attempt(&self, origin: &OriginDescriptor) -> Attempt {
        let response = match self.fetcher.fetch(origin).await {
            Ok(response) => response,
            Err(err) => {
                record_fetch("transport_error");
                warn!(
                    origin = origin.label,
                    url = %origin.url,
                    error = %err,
                    "Origin unreachable, advancing"
                );
                return Attempt::Unreachable;
            }
        };

        if !origin.accepts(response.status) {
            if response.status == StatusCode::NOT_FOUND {
                record_fetch("not_found");
                debug!(
                    origin = origin.label,
                    url = %origin.url,
                    "Origin has no such asset"
                );
            } else {
                record_fetch("rejected_status");
                warn!(
                    origin = origin.label,
                    url = %origin.url,
                    status = response.status.as_u16(),
                    "Origin answered with unexpected status"
                );
            }
            return Attempt::Rejected;
        }

        if response.body.is_empty() {
            record_fetch("empty_body");
            warn!(
                origin = origin.label,
                url = %origin.url,
                "Origin returned an empty body"
            );
            return Attempt::Rejected;
        }

        match verify_content_type(response.content_type.as_deref(), &response.body) {
            Some(content_type) => {
                record_fetch("success");
                Attempt::Accepted {
                    body: response.body,
                    content_type,
                }
            }
            None => {
                record_fetch("invalid_content_type");
                warn!(
                    origin = origin.label,
                    url = %origin.url,
                    declared = response.content_type.as_deref().unwrap_or_default(),
                    "Origin body is not an image"
                );
                Attempt::Rejected
            }
        }
    }
}

fn exhausted_reason(no_origins: bool, transport_failed: bool) -> PlaceholderReason {
    if no_origins {
        PlaceholderReason::NoOrigins
    } else if transport_failed {
        PlaceholderReason::TransportFailure
    } else {
        PlaceholderReason::NotFound
    }
}

fn record_fetch(outcome: &'static str) {
    counter!(METRIC_ORIGIN_FETCH, "outcome" => outcome).increment(1);
}

/// Decide the content type to serve for an origin body.
///
/// An `image/*` header is trusted. A missing header is sniffed and falls back
/// to JPEG. Any other header must be contradicted by a recognisable image
/// signature, otherwise the body is refused.
pub(crate) fn verify_content_type(declared: Option<&str>, body: &[u8]) -> Option<String> {
    let declared = declared.map(str::trim).filter(|value| !value.is_empty());
    match declared {
        Some(value) if is_image_mime(value) => Some(value.to_string()),
        Some(_) => sniff_image(body).map(str::to_string),
        None => Some(sniff_image(body).unwrap_or(DEFAULT_CONTENT_TYPE).to_string()),
    }
}

fn is_image_mime(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|essence| essence.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

fn sniff_image(body: &[u8]) -> Option<&'static str> {
    let mime = match imagesize::image_type(body).ok()? {
        ImageType::Png => "image/png",
        ImageType::Jpeg => "image/jpeg",
        ImageType::Gif => "image/gif",
        ImageType::Webp => "image/webp",
        ImageType::Bmp => "image/bmp",
        ImageType::Ico => "image/x-icon",
        ImageType::Tiff => "image/tiff",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use axum::http::HeaderMap;
    use url::Url;

    use super::*;

    pub(crate) const PNG_HEADER: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
    ];

    pub(crate) type Scripted = Result<FetchedResponse, FetchError>;

    /// Fetcher answering by URL from a table, recording every request.
    #[derive(Default)]
    pub(crate) struct ScriptedFetcher {
        answers: Mutex<Vec<(String, VecDeque<Scripted>)>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub(crate) fn answer(self, url: &str, response: Scripted) -> Self {
            {
                let mut answers = self.answers.lock().expect("answers lock");
                match answers.iter_mut().find(|(known, _)| known == url) {
                    Some((_, queue)) => queue.push_back(response),
                    None => answers.push((url.to_string(), VecDeque::from([response]))),
                }
            }
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl OriginFetcher for ScriptedFetcher {
        async fn fetch(&self, origin: &OriginDescriptor) -> Result<FetchedResponse, FetchError> {
            let url = origin.url.to_string();
            self.requests
                .lock()
                .expect("requests lock")
                .push(url.clone());
            let mut answers = self.answers.lock().expect("answers lock");
            let Some((_, queue)) = answers.iter_mut().find(|(known, _)| *known == url) else {
                return Ok(status(StatusCode::NOT_FOUND));
            };
            // The last scripted answer repeats once earlier ones are used up.
            if queue.len() > 1 {
                queue.pop_front().expect("queued answer")
            } else {
                match queue.front().expect("queued answer") {
                    Ok(response) => Ok(response.clone()),
                    Err(FetchError::Timeout) => Err(FetchError::Timeout),
                    Err(FetchError::Connect(msg)) => Err(FetchError::Connect(msg.clone())),
                    Err(FetchError::Body(msg)) => Err(FetchError::Body(msg.clone())),
                }
            }
        }
    }

    pub(crate) fn ok(content_type: Option<&str>, body: &'static [u8]) -> FetchedResponse {
        FetchedResponse {
            status: StatusCode::OK,
            content_type: content_type.map(str::to_string),
            body: Bytes::from_static(body),
        }
    }

    pub(crate) fn status(status: StatusCode) -> FetchedResponse {
        FetchedResponse {
            status,
            content_type: Some("text/html".to_string()),
            body: Bytes::from_static(b"<html>nope</html>"),
        }
    }

    fn origin(label: &'static str, url: &str) -> OriginDescriptor {
        OriginDescriptor::new(label, Url::parse(url).expect("url"), HeaderMap::new())
    }

    const PRIMARY: &str = "https://origin.test/primary";
    const SECONDARY: &str = "https://origin.test/secondary";
    const PLACEHOLDER: &str = "https://placeholder.test/img";

    fn chain(fetcher: ScriptedFetcher) -> (FallbackChain, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(fetcher);
        (FallbackChain::new(fetcher.clone()), fetcher)
    }

    fn origins() -> Vec<OriginDescriptor> {
        vec![origin("primary", PRIMARY), origin("secondary", SECONDARY)]
    }

    fn placeholder_ok() -> Scripted {
        Ok(ok(Some("image/svg+xml"), b"<svg/>"))
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let (chain, fetcher) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(ok(Some("image/png"), b"primary")))
                .answer(SECONDARY, Ok(ok(Some("image/png"), b"secondary"))),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(result.body, Bytes::from_static(b"primary"));
        assert_eq!(
            result.outcome,
            ChainOutcome::Origin {
                index: 0,
                label: "primary"
            }
        );
        assert_eq!(fetcher.requested(), vec![PRIMARY.to_string()]);
    }

    #[tokio::test]
    async fn not_found_advances_to_next_origin() {
        let (chain, fetcher) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(status(StatusCode::NOT_FOUND)))
                .answer(SECONDARY, Ok(ok(Some("image/png"), b"secondary"))),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(result.body, Bytes::from_static(b"secondary"));
        assert_eq!(result.content_type, "image/png");
        assert!(!result.is_placeholder());
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_serves_placeholder() {
        let (chain, fetcher) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(status(StatusCode::NOT_FOUND)))
                .answer(SECONDARY, Ok(status(StatusCode::FORBIDDEN)))
                .answer(PLACEHOLDER, placeholder_ok()),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(
            result.outcome,
            ChainOutcome::Placeholder(PlaceholderReason::NotFound)
        );
        assert_eq!(result.content_type, "image/svg+xml");
        assert_eq!(
            fetcher.requested(),
            vec![
                PRIMARY.to_string(),
                SECONDARY.to_string(),
                PLACEHOLDER.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn transport_failure_is_remembered() {
        let (chain, _) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Err(FetchError::Timeout))
                .answer(SECONDARY, Ok(status(StatusCode::NOT_FOUND)))
                .answer(PLACEHOLDER, placeholder_ok()),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(
            result.outcome,
            ChainOutcome::Placeholder(PlaceholderReason::TransportFailure)
        );
    }

    #[tokio::test]
    async fn transport_failure_still_tries_later_origins() {
        let (chain, _) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Err(FetchError::Connect("refused".into())))
                .answer(SECONDARY, Ok(ok(Some("image/png"), b"secondary"))),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(result.body, Bytes::from_static(b"secondary"));
    }

    #[tokio::test]
    async fn empty_origin_list_goes_straight_to_placeholder() {
        let (chain, fetcher) =
            chain(ScriptedFetcher::default().answer(PLACEHOLDER, placeholder_ok()));

        let result = chain
            .execute(&[], &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(
            result.outcome,
            ChainOutcome::Placeholder(PlaceholderReason::NoOrigins)
        );
        assert_eq!(fetcher.requested(), vec![PLACEHOLDER.to_string()]);
    }

    #[tokio::test]
    async fn missing_content_type_is_sniffed_or_defaulted() {
        let (chain, _) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(ok(None, PNG_HEADER)))
                .answer(SECONDARY, Ok(ok(None, b"opaque"))),
        );
        let placeholder = origin("placeholder", PLACEHOLDER);

        let sniffed = chain
            .execute(&origins()[..1], &placeholder)
            .await
            .expect("result");
        assert_eq!(sniffed.content_type, "image/png");

        let defaulted = chain
            .execute(&origins()[1..], &placeholder)
            .await
            .expect("result");
        assert_eq!(defaulted.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn non_image_body_is_rejected() {
        let (chain, _) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(ok(Some("text/html"), b"<html>login</html>")))
                .answer(SECONDARY, Ok(ok(Some("application/octet-stream"), PNG_HEADER))),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");

        assert_eq!(
            result.outcome,
            ChainOutcome::Origin {
                index: 1,
                label: "secondary"
            }
        );
        assert_eq!(result.content_type, "image/png");
    }

    #[tokio::test]
    async fn empty_body_advances() {
        let (chain, _) = chain(
            ScriptedFetcher::default()
                .answer(PRIMARY, Ok(ok(Some("image/png"), b"")))
                .answer(SECONDARY, Ok(ok(Some("image/png"), b"secondary"))),
        );

        let result = chain
            .execute(&origins(), &origin("placeholder", PLACEHOLDER))
            .await
            .expect("result");
        assert_eq!(result.body, Bytes::from_static(b"secondary"));
    }

    #[tokio::test]
    async fn failing_placeholder_status_is_reported() {
        let (chain, _) = chain(
            ScriptedFetcher::default().answer(PLACEHOLDER, Ok(status(StatusCode::BAD_GATEWAY))),
        );

        let err = chain
            .execute(&[], &origin("placeholder", PLACEHOLDER))
            .await
            .expect_err("placeholder fails");

        let ChainError::PlaceholderUnavailable { status, reason, .. } = err;
        assert_eq!(status, Some(StatusCode::BAD_GATEWAY));
        assert_eq!(reason, "no_origins");
    }

    #[tokio::test]
    async fn unreachable_placeholder_has_no_status() {
        let (chain, _) =
            chain(ScriptedFetcher::default().answer(PLACEHOLDER, Err(FetchError::Timeout)));

        let err = chain
            .fall_back(
                &origin("placeholder", PLACEHOLDER),
                PlaceholderReason::ResolutionFailed,
            )
            .await
            .expect_err("placeholder fails");

        let ChainError::PlaceholderUnavailable { status, .. } = err;
        assert_eq!(status, None);
    }

    #[test]
    fn content_type_verification() {
        assert_eq!(
            verify_content_type(Some("image/webp"), b"anything").as_deref(),
            Some("image/webp")
        );
        assert_eq!(
            verify_content_type(Some("Image/PNG; charset=binary"), b"x").as_deref(),
            Some("Image/PNG; charset=binary")
        );
        assert_eq!(
            verify_content_type(Some("text/plain"), PNG_HEADER).as_deref(),
            Some("image/png")
        );
        assert_eq!(verify_content_type(Some("text/plain"), b"hello"), None);
        assert_eq!(
            verify_content_type(Some("  "), b"hello").as_deref(),
            Some("image/jpeg")
        );
    }
}
