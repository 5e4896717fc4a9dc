//! Bounded stream transport between an inference run and live consumers.
//!
//! The producer side never blocks: when the queue is full the newest item is
//! dropped with a warning. The system favors producer liveness over
//! completeness of the stream; viewers always have the cache to fall back
//! on. The sentinel terminates one run's stream and is itself subject to the
//! same drop policy (a documented lossy edge case).

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::capture::record::StreamRecord;

/// One item on the stream: a record projection or the terminal sentinel.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Record(Box<StreamRecord>),
    /// No further records for this run.
    Sentinel,
}

/// Create a bounded stream channel.
pub fn stream_channel(capacity: usize) -> (StreamSender, StreamReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (StreamSender { tx }, StreamReceiver { rx })
}

/// Producer handle held by the inference run.
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamItem>,
}

impl StreamSender {
    /// Push a record snapshot; drops it with a warning if the queue is full
    /// or no receiver exists.
    pub fn push_record(&self, record: StreamRecord) {
        self.push(StreamItem::Record(Box::new(record)));
    }

    /// Push the terminal sentinel. Best-effort: a full queue drops it.
    pub fn push_sentinel(&self) {
        self.push(StreamItem::Sentinel);
    }

    fn push(&self, item: StreamItem) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                tracing::warn!(item = item.describe(), "stream queue full; dropping item");
            }
            Err(TrySendError::Closed(item)) => {
                tracing::debug!(item = item.describe(), "stream closed; dropping item");
            }
        }
    }
}

impl StreamItem {
    fn describe(&self) -> &'static str {
        match self {
            StreamItem::Record(_) => "record",
            StreamItem::Sentinel => "sentinel",
        }
    }
}

/// Consumer handle; a single consumer drains items cooperatively.
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::Receiver<StreamItem>,
}

impl StreamReceiver {
    /// Suspend until the next item is available. `None` means every sender
    /// has gone away.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }

    /// Non-blocking receive; `None` when the queue is currently empty or
    /// closed.
    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.rx.try_recv().ok()
    }

    /// Discard whatever a previous run left unread.
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}
