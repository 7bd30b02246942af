use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("asset identifier must not be empty")]
    InvalidIdentifier,
    #[error("unknown asset class `{value}`")]
    UnknownAssetClass { value: String },
}

impl DomainError {
    pub fn unknown_class(value: impl Into<String>) -> Self {
        Self::UnknownAssetClass {
            value: value.into(),
        }
    }
}
