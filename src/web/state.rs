//! Shared application state for the web server.

use std::sync::Arc;

use tokenizers::Tokenizer;
use tokio::sync::{Mutex, RwLock};

use crate::capture::cache::{CaptureCache, SharedCache};
use crate::infer::ModelState;
use crate::model::loader::LoaderRegistry;
use crate::stream::{stream_channel, StreamReceiver, StreamSender};

/// State shared by every handler: the capture cache, the currently loaded
/// model, both ends of the stream queue, and the loader registry.
///
/// The receiving end lives behind an async mutex because there is exactly
/// one stream consumer at a time; a connected viewer holds the lock while
/// it forwards items.
#[derive(Clone)]
pub struct AppState {
    cache: SharedCache,
    model: Arc<RwLock<Option<Arc<ModelState>>>>,
    stream_tx: StreamSender,
    stream_rx: Arc<Mutex<StreamReceiver>>,
    loaders: Arc<LoaderRegistry>,
    tokenizer: Option<Arc<Tokenizer>>,
}

impl AppState {
    pub fn new(queue_capacity: usize, tokenizer: Option<Arc<Tokenizer>>) -> Self {
        let (stream_tx, stream_rx) = stream_channel(queue_capacity);
        Self {
            cache: CaptureCache::shared(),
            model: Arc::new(RwLock::new(None)),
            stream_tx,
            stream_rx: Arc::new(Mutex::new(stream_rx)),
            loaders: Arc::new(LoaderRegistry::with_defaults()),
            tokenizer,
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn model(&self) -> &Arc<RwLock<Option<Arc<ModelState>>>> {
        &self.model
    }

    pub fn stream_sender(&self) -> &StreamSender {
        &self.stream_tx
    }

    pub fn stream_receiver(&self) -> &Arc<Mutex<StreamReceiver>> {
        &self.stream_rx
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn tokenizer(&self) -> Option<&Arc<Tokenizer>> {
        self.tokenizer.as_ref()
    }
}
