//! Serialized socket output.
//!
//! Every socket has exactly one writer task draining an mpsc queue; flows
//! only ever enqueue whole encoded frames, so two flows can never interleave
//! partial JSON on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;

use crate::error::{RelayError, RelayResult};
use crate::protocol::{encode, Frame};

#[derive(Debug)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Cloneable handle onto one socket's output queue.
#[derive(Clone, Debug)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<AtomicBool>,
}

impl FrameWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn send_text(&self, text: String) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::WebSocketUnavailable("socket closed".into()));
        }
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| RelayError::WebSocketUnavailable("socket closed".into()))
    }

    /// Encode and enqueue a frame, wrapped for `destination` when given.
    pub fn send_frame(&self, destination: Option<&str>, frame: &Frame) -> RelayResult<()> {
        self.send_text(encode(destination, frame))
    }

    /// Ask the writer task to send a close frame. Later sends fail.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Outgoing::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Drain `rx` into `sink` until closed. `text` and `close` build the
/// transport's message type.
pub async fn pump<S, M>(
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    mut sink: S,
    text: impl Fn(String) -> M,
    close: impl Fn() -> M,
) where
    S: Sink<M> + Unpin,
{
    while let Some(out) = rx.recv().await {
        match out {
            Outgoing::Text(t) => {
                if sink.send(text(t)).await.is_err() {
                    break;
                }
            }
            Outgoing::Close => {
                let _ = sink.send(close()).await;
                break;
            }
        }
    }
    rx.close();
    let _ = sink.close().await;
}
