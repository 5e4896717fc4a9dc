//! In-memory capture cache keyed by node id.
//!
//! The cache is cleared and fully repopulated on every inference run; it is
//! never incrementally diffed. One run writes at a time while export
//! handlers read concurrently, so readers may observe a transiently empty
//! cache mid-run. That is accepted single-writer behavior, not a bug.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::record::{normalize_id, CaptureRecord};

/// Cache handle shared between the run in progress and export handlers.
pub type SharedCache = Arc<RwLock<CaptureCache>>;

/// Mapping from node id to its full capture record, insertion order kept.
#[derive(Debug, Default)]
pub struct CaptureCache {
    entries: HashMap<String, Arc<CaptureRecord>>,
    order: Vec<String>,
}

impl CaptureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Remove every entry. Called once before each run starts capturing.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Unconditional upsert. An overwrite keeps the key's original position
    /// in insertion order.
    pub fn put(&mut self, id: impl Into<String>, record: Arc<CaptureRecord>) {
        let id = id.into();
        if self.entries.insert(id.clone(), record).is_none() {
            self.order.push(id);
        }
    }

    /// Exact-match lookup.
    pub fn get(&self, id: &str) -> Option<Arc<CaptureRecord>> {
        self.entries.get(id).cloned()
    }

    /// Tolerant lookup used by export and inspection flows.
    ///
    /// Tries, in order: exact match, match on the normalized id, then the
    /// first entry (insertion order) whose key contains the raw id or the
    /// non-empty normalized id as a substring. The substring fallback is a
    /// deliberately loose best-effort match, not a closest match.
    pub fn get_any(&self, id: &str) -> Option<Arc<CaptureRecord>> {
        if let Some(record) = self.entries.get(id) {
            return Some(record.clone());
        }
        let normalized = normalize_id(id);
        if let Some(record) = self.entries.get(&normalized) {
            return Some(record.clone());
        }
        self.order
            .iter()
            .find(|key| {
                key.contains(id) || (!normalized.is_empty() && key.contains(&normalized))
            })
            .and_then(|key| self.entries.get(key))
            .cloned()
    }

    /// Captured ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::{compute_stats, empty_tensor};
    use candle_core::{Device, Tensor};
    use proptest::prelude::*;

    fn record(id: &str) -> Arc<CaptureRecord> {
        let output =
            Tensor::from_vec(vec![1.0f32, 2.0], (2,), &Device::Cpu).expect("tensor");
        let stats = compute_stats(&output).expect("stats");
        Arc::new(CaptureRecord {
            id: id.to_string(),
            display_name: id.to_string(),
            kind: "Linear".to_string(),
            param_count: 0,
            trainable_param_count: 0,
            input_value: empty_tensor().expect("empty"),
            output_value: output,
            input_shape: vec![],
            output_shape: vec![2],
            stats,
        })
    }

    #[test]
    fn put_then_get_returns_same_record() {
        let mut cache = CaptureCache::new();
        let rec = record("encoder_layer_0");
        cache.put("encoder_layer_0", rec.clone());
        let got = cache.get("encoder_layer_0").expect("present");
        // Reference-identical, not a copy.
        assert!(Arc::ptr_eq(&rec, &got));
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = CaptureCache::new();
        cache.put("a", record("a"));
        cache.put("b", record("b"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
        assert!(cache.get_any("a").is_none());
        assert!(cache.ids().is_empty());
    }

    #[test]
    fn get_any_prefers_exact_match() {
        let mut cache = CaptureCache::new();
        cache.put("layer", record("layer"));
        cache.put("layer_0", record("layer_0"));
        // "layer_0" contains "layer" as a substring, but the exact entry wins.
        let got = cache.get_any("layer").expect("present");
        assert_eq!(got.id, "layer");
    }

    #[test]
    fn get_any_falls_back_to_normalized_id() {
        let mut cache = CaptureCache::new();
        cache.put("encoder_layer_0", record("encoder_layer_0"));
        let got = cache.get_any("encoder.layer.0").expect("present");
        assert_eq!(got.id, "encoder_layer_0");
    }

    #[test]
    fn get_any_substring_match_follows_insertion_order() {
        let mut cache = CaptureCache::new();
        cache.put("model_block_attn", record("model_block_attn"));
        cache.put("model_block_mlp", record("model_block_mlp"));
        let got = cache.get_any("block").expect("present");
        assert_eq!(got.id, "model_block_attn");
    }

    #[test]
    fn get_any_absent_when_nothing_matches() {
        let mut cache = CaptureCache::new();
        cache.put("alpha", record("alpha"));
        assert!(cache.get_any("omega").is_none());
    }

    #[test]
    fn ids_preserve_insertion_order_across_overwrites() {
        let mut cache = CaptureCache::new();
        cache.put("a", record("a"));
        cache.put("b", record("b"));
        cache.put("a", record("a"));
        assert_eq!(cache.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reader_between_clear_and_repopulate_sees_empty_cache() {
        // Single-writer discipline: a reader that lands between a run's
        // clear and its first put observes an empty cache, by contract.
        let shared = CaptureCache::shared();
        shared.write().put("old", record("old"));

        shared.write().clear();
        assert!(shared.read().get_any("old").is_none());

        shared.write().put("new", record("new"));
        assert!(shared.read().get("new").is_some());
    }

    proptest! {
        /// Final cache content equals a mapping built by folding upserts in
        /// call order: last write per id wins.
        #[test]
        fn put_sequence_folds_to_last_write_wins(
            ops in proptest::collection::vec(("[a-d]{1,2}", 0usize..100), 1..40)
        ) {
            let mut cache = CaptureCache::new();
            let mut reference = std::collections::HashMap::new();
            for (id, marker) in &ops {
                let mut rec = (*record(id)).clone();
                rec.param_count = *marker;
                cache.put(id.clone(), Arc::new(rec));
                reference.insert(id.clone(), *marker);
            }
            prop_assert_eq!(cache.len(), reference.len());
            for (id, marker) in &reference {
                let got = cache.get(id).expect("present");
                prop_assert_eq!(got.param_count, *marker);
            }
        }
    }
}
