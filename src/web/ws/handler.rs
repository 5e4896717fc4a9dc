//! WebSocket handler streaming capture records to a viewer.

use axum::extract::ws::{Message, WebSocket};

use crate::stream::{StreamItem, StreamReceiver};
use crate::web::state::AppState;

/// Destination for serialized record frames. Lets the forward loop run
/// against an in-memory sink in tests.
trait FrameSink {
    async fn send_frame(&mut self, text: String) -> Result<(), ()>;
}

impl FrameSink for WebSocket {
    async fn send_frame(&mut self, text: String) -> Result<(), ()> {
        self.send(Message::Text(text.into())).await.map_err(|_| ())
    }
}

/// Forward stream items to the socket as JSON text frames until the run's
/// sentinel arrives, then close. The receiver lock is held for the duration
/// of the connection; there is one live stream consumer at a time.
pub async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    let receiver = state.stream_receiver().clone();
    let mut rx = receiver.lock().await;

    forward_stream(&mut rx, &mut socket).await;

    let _ = socket.send(Message::Close(None)).await;
}

/// Forward records as JSON text until the sentinel, a closed channel, or a
/// sink failure. Items after the sentinel stay queued for the next
/// consumer.
async fn forward_stream<S: FrameSink>(rx: &mut StreamReceiver, sink: &mut S) {
    loop {
        let Some(item) = rx.recv().await else {
            break;
        };
        match item {
            StreamItem::Sentinel => break,
            StreamItem::Record(record) => {
                let text = match serde_json::to_string(&record) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not serialize stream record");
                        continue;
                    }
                };
                if sink.send_frame(text).await.is_err() {
                    tracing::debug!("stream socket closed by peer");
                    break;
                }
            }
        }
    }
}
