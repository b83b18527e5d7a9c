use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TransportError;

/// Write half of an accepted text-message connection.
///
/// Shared between the session task that owns the connection and whichever
/// other tasks need to push frames to it (broadcasts, forwarded commands).
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Best-effort close. Never fails; errors are swallowed.
    async fn close(&self);
}

/// Read half of an accepted connection, owned by its session task.
#[async_trait]
pub trait Inbound: Send {
    /// Next text frame. `Ok(None)` once the peer has closed.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// Split an upgraded axum socket into the relay's connection halves.
pub fn split_websocket(socket: WebSocket) -> (WsOutbound, WsInbound) {
    let (sink, stream) = socket.split();
    (
        WsOutbound {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        },
        WsInbound { stream },
    )
}

pub struct WsOutbound {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

#[async_trait]
impl Outbound for WsOutbound {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl Inbound for WsInbound {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(|e| TransportError::WebSocket(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text)),
                // Some firmware websocket clients only emit binary frames.
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("dropping non-UTF8 binary frame"),
                },
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

/// In-memory connections for exercising sessions without a socket.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    #[derive(Default)]
    struct Shared {
        closed: AtomicBool,
        close_notify: Notify,
        fail_sends: AtomicBool,
    }

    pub struct MemoryOutbound {
        to_peer: mpsc::UnboundedSender<String>,
        shared: Arc<Shared>,
    }

    pub struct MemoryInbound {
        from_peer: mpsc::UnboundedReceiver<String>,
        shared: Arc<Shared>,
    }

    /// The remote end of a memory connection, as the test sees it.
    pub struct MemoryPeer {
        to_relay: Option<mpsc::UnboundedSender<String>>,
        from_relay: mpsc::UnboundedReceiver<String>,
        shared: Arc<Shared>,
    }

    pub fn pair() -> (Arc<MemoryOutbound>, MemoryInbound, MemoryPeer) {
        let (to_peer, from_relay) = mpsc::unbounded_channel();
        let (to_relay, from_peer) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Arc::new(MemoryOutbound {
                to_peer,
                shared: shared.clone(),
            }),
            MemoryInbound {
                from_peer,
                shared: shared.clone(),
            },
            MemoryPeer {
                to_relay: Some(to_relay),
                from_relay,
                shared,
            },
        )
    }

    #[async_trait]
    impl Outbound for MemoryOutbound {
        async fn send_text(&self, text: String) -> Result<(), TransportError> {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if self.shared.fail_sends.load(Ordering::Acquire) {
                return Err(TransportError::WebSocket("broken pipe".into()));
            }
            self.to_peer.send(text).map_err(|_| TransportError::Closed)
        }

        async fn close(&self) {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.close_notify.notify_waiters();
        }
    }

    #[async_trait]
    impl Inbound for MemoryInbound {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            let closed = self.shared.close_notify.notified();
            if self.shared.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            tokio::select! {
                biased;
                _ = closed => Ok(None),
                frame = self.from_peer.recv() => Ok(frame),
            }
        }
    }

    impl MemoryPeer {
        pub fn send(&self, text: impl Into<String>) {
            if let Some(tx) = &self.to_relay {
                tx.send(text.into()).expect("relay side dropped");
            }
        }

        pub fn send_json(&self, value: Value) {
            self.send(value.to_string());
        }

        /// Drop the peer's write half, which the relay observes as a close.
        pub fn hang_up(&mut self) {
            self.to_relay = None;
        }

        /// Make every further relay-side send fail as a transport error.
        pub fn break_pipe(&self) {
            self.shared.fail_sends.store(true, Ordering::Release);
        }

        pub fn is_closed(&self) -> bool {
            self.shared.closed.load(Ordering::Acquire)
        }

        pub async fn next_json(&mut self) -> Value {
            let text = tokio::time::timeout(Duration::from_secs(2), self.from_relay.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("relay side dropped");
            serde_json::from_str(&text).expect("relay sent invalid json")
        }

        pub fn try_next_json(&mut self) -> Option<Value> {
            self.from_relay
                .try_recv()
                .ok()
                .map(|text| serde_json::from_str(&text).expect("relay sent invalid json"))
        }
    }
}
