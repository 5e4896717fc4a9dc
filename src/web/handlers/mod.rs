//! HTTP request handlers for the Strata web API.

pub mod export;
pub mod inference;
pub mod models;
