//! Asset identity: classes, identifiers, and cache keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Identifier the dashboard sends when there is no asset to show.
pub const NO_ASSET_SENTINEL: &str = "null";

/// Namespace for asset identifiers.
///
/// Identifiers are only unique within a class, so the class is always part of
/// the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetClass {
    /// Album cover art keyed by release identifier.
    CoverArt,
    /// Community photo keyed by backend image id.
    UserPhoto,
}

impl AssetClass {
    pub const ALL: [AssetClass; 2] = [AssetClass::CoverArt, AssetClass::UserPhoto];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::CoverArt => "cover-art",
            AssetClass::UserPhoto => "user-photo",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        AssetClass::ALL
            .into_iter()
            .find(|class| class.as_str() == value)
            .ok_or_else(|| DomainError::unknown_class(value))
    }
}

/// Opaque, non-empty asset identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId(String);

impl AssetId {
    /// Parse a raw identifier, trimming surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidIdentifier);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the "no asset" identifier, which always resolves to a placeholder.
    pub fn is_sentinel(&self) -> bool {
        self.0 == NO_ASSET_SENTINEL
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-qualified asset reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    pub class: AssetClass,
    pub id: AssetId,
}

impl AssetKey {
    pub fn new(class: AssetClass, id: AssetId) -> Self {
        Self { class, id }
    }

    /// Store key in the form `{class}-{identifier}`.
    ///
    /// Class slugs never appear as identifier prefixes of another class, so
    /// equal identifiers in different classes map to distinct keys.
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.class.as_str(), self.id.as_str())
    }

    pub fn is_sentinel(&self) -> bool {
        self.id.is_sentinel()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.id)
    }
}
