//! Listing acquisition pipeline for Polish classifieds sites.
//!
//! Scanners walk each source's `(city, category)` matrix, normalizers shape
//! the payloads into [`models::ListingCandidate`]s and the storage engine
//! keeps exactly one row per listing. [`liveness::LivenessChecker`] retires
//! listings that disappeared upstream.

pub mod config;
pub mod http;
pub mod liveness;
pub mod models;
pub mod normalize;
pub mod scrapers;
pub mod storage;
