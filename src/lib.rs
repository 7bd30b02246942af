//! Vitrine: a caching gateway for album cover art and community photos.
//!
//! Requests for `/asset/{class}/{identifier}` are answered from an
//! [`AssetStore`](cache::AssetStore) when possible. Misses walk an ordered
//! chain of origins and end on a placeholder image when none of them has the
//! asset.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
