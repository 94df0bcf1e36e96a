//! Client-side frame handling: reassemble tunneled requests, replay them on
//! the local server, deliver the responses.

use std::sync::Arc;
use std::time::Duration;

use super::delivery::Deliverer;
use super::forwarder::LocalForwarder;
use crate::blob::BlobStore;
use crate::chunker::ReassemblyArena;
use crate::config::schema::DeliveryConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::protocol::{Delivered, Frame, StreamHead, TunneledRequest};
use crate::relay::{FrameHandler, FrameWriter};

struct Inner {
    forwarder: LocalForwarder,
    blobs: Arc<dyn BlobStore>,
    delivery: DeliveryConfig,
    frame_size: usize,
    arena: ReassemblyArena,
}

/// Frame handler of the long-lived client session.
#[derive(Clone)]
pub struct TunnelClient {
    inner: Arc<Inner>,
}

impl TunnelClient {
    pub fn new(
        forwarder: LocalForwarder,
        blobs: Arc<dyn BlobStore>,
        delivery: DeliveryConfig,
        frame_size: usize,
        arena: ReassemblyArena,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                forwarder,
                blobs,
                delivery,
                frame_size,
                arena,
            }),
        }
    }

    /// Requests still being reassembled.
    pub fn pending_reassemblies(&self) -> usize {
        self.inner.arena.len()
    }

    /// Sweep abandoned reassemblies every `period` until shutdown.
    pub async fn run_sweeper(self, period: Duration, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.inner.arena.sweep();
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn serve(self, source: String, req_id: String, request: TunneledRequest, writer: FrameWriter) {
        let url = request.head.original_url.clone();
        tracing::info!(
            req_id = %req_id,
            method = %request.head.method,
            url = %url,
            "Forwarding to local server"
        );
        let deliverer = Deliverer::new(
            writer,
            source,
            self.inner.blobs.clone(),
            self.inner.delivery.clone(),
            self.inner.frame_size,
        );
        let outcome = match self.inner.forwarder.forward(request).await {
            Ok(response) => deliverer.deliver(&req_id, &url, response).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            deliverer.fail(&req_id, &e);
        }
    }
}

impl FrameHandler for TunnelClient {
    fn on_frame(&self, delivered: Delivered, writer: &FrameWriter) {
        let Some(source) = delivered.source else {
            metrics::record_frame_dropped("no_source");
            tracing::debug!(kind = delivered.frame.kind(), "Dropping frame without source connection");
            return;
        };

        let request = match delivered.frame {
            Frame::Request { req_id, request } => Some((req_id, request)),
            frame @ (Frame::Chunk { .. } | Frame::Terminal { .. }) => {
                self.inner.arena.accept(frame).and_then(|flow| match flow.head {
                    StreamHead::Request(head) => Some((
                        flow.req_id,
                        TunneledRequest {
                            head,
                            body: Some(flow.body),
                        },
                    )),
                    StreamHead::Response(_) => {
                        metrics::record_frame_dropped("unexpected_response");
                        None
                    }
                })
            }
            other => {
                metrics::record_frame_dropped("unexpected");
                tracing::debug!(kind = other.kind(), "Ignoring frame");
                None
            }
        };

        if let Some((req_id, request)) = request {
            tokio::spawn(self.clone().serve(source, req_id, request, writer.clone()));
        }
    }
}
