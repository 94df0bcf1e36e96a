use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use subtle::ConstantTimeEq;
use tokio::sync::oneshot;

use crate::chunker::Reassembly;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{Frame, Headers, StreamHead, TunneledResponse};

/// Body of a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelatedBody {
    Inline(Bytes),
    /// Stored in the blob store under this key.
    Blob(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: CorrelatedBody,
}

impl From<TunneledResponse> for CorrelatedResponse {
    fn from(response: TunneledResponse) -> Self {
        let body = match (response.body, response.blob_key) {
            (_, Some(key)) => CorrelatedBody::Blob(key),
            (Some(body), None) => CorrelatedBody::Inline(body),
            (None, None) => CorrelatedBody::Empty,
        };
        Self {
            status: response.head.status,
            headers: response.head.headers,
            body,
        }
    }
}

struct FlowState {
    reassembly: Reassembly,
    resolved: bool,
    tx: Option<oneshot::Sender<CorrelatedResponse>>,
}

struct Listener {
    id: u64,
    req_id: String,
    state: Mutex<FlowState>,
}

impl Listener {
    fn matches(&self, req_id: &str) -> bool {
        self.req_id.as_bytes().ct_eq(req_id.as_bytes()).into()
    }
}

#[derive(Default)]
struct Inner {
    listeners: Mutex<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
}

/// Matches response frames to waiting requests.
#[derive(Clone, Default)]
pub struct Correlator {
    inner: Arc<Inner>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for the response to `req_id`.
    pub fn register(&self, req_id: impl Into<String>) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(Listener {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            req_id: req_id.into(),
            state: Mutex::new(FlowState {
                reassembly: Reassembly::new(),
                resolved: false,
                tx: Some(tx),
            }),
        });
        lock(&self.inner.listeners).push(listener.clone());
        PendingResponse {
            correlator: self.clone(),
            listener,
            rx,
        }
    }

    /// Offer an inbound frame to every listener.
    ///
    /// Returns how many listeners accepted it; zero means nobody is waiting
    /// for that request id any more.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let Some(req_id) = frame.req_id() else {
            return 0;
        };
        let snapshot: Vec<Arc<Listener>> = lock(&self.inner.listeners).clone();

        let mut matched = 0;
        for listener in snapshot {
            if !listener.matches(req_id) {
                continue;
            }
            let resolved_now = {
                let mut state = lock(&listener.state);
                if state.resolved {
                    continue;
                }
                matched += 1;
                match apply(&mut state.reassembly, frame) {
                    Some(response) => {
                        state.resolved = true;
                        if let Some(tx) = state.tx.take() {
                            let _ = tx.send(response);
                        }
                        true
                    }
                    None => false,
                }
            };
            if resolved_now {
                self.deregister(listener.id);
            }
        }
        matched
    }

    /// Number of flows currently waiting.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn deregister(&self, id: u64) {
        lock(&self.inner.listeners).retain(|l| l.id != id);
    }
}

/// Fold one frame into a flow; returns the response once it is complete.
fn apply(reassembly: &mut Reassembly, frame: &Frame) -> Option<CorrelatedResponse> {
    match frame {
        Frame::Response { response, .. } => Some(response.clone().into()),
        Frame::Chunk { index, payload, .. } => {
            reassembly.add_chunk(*index, payload.clone());
            take_if_complete(reassembly)
        }
        Frame::Terminal {
            req_id,
            total_chunks,
            tail,
            head,
        } => {
            let StreamHead::Response(_) = head else {
                tracing::warn!(req_id = %req_id, "Request terminal marker sent to the gateway");
                return None;
            };
            if let Some((index, payload)) = tail {
                reassembly.add_chunk(*index, payload.clone());
            }
            reassembly.set_terminal(*total_chunks, head.clone());
            take_if_complete(reassembly)
        }
        Frame::Request { .. } | Frame::Control(_) => None,
    }
}

fn take_if_complete(reassembly: &mut Reassembly) -> Option<CorrelatedResponse> {
    if !reassembly.is_complete() {
        return None;
    }
    match std::mem::take(reassembly).take()? {
        (StreamHead::Response(head), body) => Some(CorrelatedResponse {
            status: head.status,
            headers: head.headers,
            body: CorrelatedBody::Inline(body),
        }),
        (StreamHead::Request(_), _) => None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A registered flow. Dropping it deregisters the listener.
pub struct PendingResponse {
    correlator: Correlator,
    listener: Arc<Listener>,
    rx: oneshot::Receiver<CorrelatedResponse>,
}

impl PendingResponse {
    pub fn req_id(&self) -> &str {
        &self.listener.req_id
    }

    /// Wait for the correlated response, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> RelayResult<CorrelatedResponse> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RelayError::WebSocketUnavailable(
                "response channel closed".into(),
            )),
            Err(_) => {
                {
                    let mut state = lock(&self.listener.state);
                    state.resolved = true;
                    state.tx = None;
                    state.reassembly = Reassembly::new();
                }
                // A resolve that took the lock before us has already sent.
                if let Ok(response) = self.rx.try_recv() {
                    return Ok(response);
                }
                metrics::record_correlator_timeout();
                tracing::warn!(req_id = %self.listener.req_id, "Timed out waiting for response");
                Err(RelayError::ResponseTimeout {
                    req_id: self.listener.req_id.clone(),
                })
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.correlator.deregister(self.listener.id);
    }
}
