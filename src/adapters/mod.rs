//! Adapters between the canonical result shape and external or legacy
//! request/response schemas.
//!
//! Adapters are pure functions: they never reach the network and never
//! mutate pipeline state. One adapter exists per (external shape,
//! canonical shape) pair.

pub mod legacy;

pub use legacy::{
    legacy_citation_score, LegacyGeoRecord, LegacyGeoResponse, LegacySearchRequest,
};
