//! Asset resolution services: origin resolution, fallback chains, and the cache gateway.

pub mod chain;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod origins;
