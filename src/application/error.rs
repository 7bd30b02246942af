use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{chain::ChainError, gateway::GatewayError},
    cache::StoreError,
    config::LoadError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

const GATEWAY_SOURCE: &str = "application::error::gateway_error_to_http_error";

impl From<DomainError> for HttpError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::UnknownAssetClass { ref value } => HttpError::new(
                GATEWAY_SOURCE,
                StatusCode::NOT_FOUND,
                "Unknown asset class",
                format!("Asset class `{value}` is not served here"),
            ),
            DomainError::InvalidIdentifier => HttpError::from_error(
                GATEWAY_SOURCE,
                StatusCode::BAD_REQUEST,
                "Missing asset identifier",
                &error,
            ),
        }
    }
}

impl From<GatewayError> for HttpError {
    fn from(error: GatewayError) -> Self {
        match &error {
            GatewayError::InvalidIdentifier => HttpError::from_error(
                GATEWAY_SOURCE,
                StatusCode::BAD_REQUEST,
                "Missing asset identifier",
                &error,
            ),
            GatewayError::PlaceholderUnavailable {
                source: ChainError::PlaceholderUnavailable { status, .. },
                ..
            } => {
                let status = match status {
                    Some(_) => StatusCode::BAD_GATEWAY,
                    None => StatusCode::INTERNAL_SERVER_ERROR,
                };
                HttpError::from_error(GATEWAY_SOURCE, status, "Asset unavailable", &error)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: impl Into<HttpError>) -> StatusCode {
        let error: HttpError = error.into();
        error.into_response().status()
    }

    fn unavailable(status: Option<StatusCode>) -> GatewayError {
        GatewayError::PlaceholderUnavailable {
            key: "user-photo-1".to_string(),
            source: ChainError::PlaceholderUnavailable {
                reason: "not_found",
                status,
                detail: "boom".to_string(),
            },
        }
    }

    #[test]
    fn gateway_errors_map_to_statuses() {
        assert_eq!(
            status_of(GatewayError::InvalidIdentifier),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(unavailable(Some(StatusCode::SERVICE_UNAVAILABLE))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(unavailable(None)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unknown_class_is_not_found() {
        assert_eq!(
            status_of(DomainError::unknown_class("album")),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn error_report_carries_source_chain() {
        let response = HttpError::from(unavailable(None)).into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[1].contains("boom"));
    }
}
