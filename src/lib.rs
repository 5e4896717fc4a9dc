//! Strata backend: instrument a model inference pass, cache a full tensor
//! snapshot per graph node, and stream the snapshots live to a viewer.
//!
//! The pipeline has three stages. Capture observes each node as it
//! executes and builds one [`capture::CaptureRecord`] per node. The cache
//! keeps every record of the latest run for export. The stream pushes a
//! JSON-friendly projection of each record to a connected viewer as it is
//! captured, terminated by a sentinel.

pub mod capture;
pub mod error;
pub mod infer;
pub mod model;
pub mod stream;
pub mod web;

pub use error::{Result, StrataError};
