//! Capture pipeline: records, the per-run cache, eager-graph hooks, and the
//! export surface over cached records.

pub mod cache;
pub mod export;
pub mod hooks;
pub mod record;

pub use cache::{CaptureCache, SharedCache};
pub use hooks::HookSet;
pub use record::{compute_stats, normalize_id, CaptureRecord, StreamRecord, TensorStats};
