//! Relay session: the single WebSocket a process keeps to the hub.
//!
//! ```text
//! DISCONNECTED --ensure_open--> CONNECTING --open--> OPEN --close--> DISCONNECTED
//!                                   |                  |
//!                                   +-- error ---------+--> waiters get Err
//! ```
//!
//! Callers arriving while CONNECTING queue behind the attempt and are all
//! released with its outcome. While OPEN an inactivity watchdog closes idle
//! sockets, and an optional heartbeat closes a socket after one missed PONG.
//! A FORCE_CLIENT_DISCONNECT stops the session for good.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::writer::{pump, FrameWriter};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{decode, Control, Delivered, Frame};
use crate::registry::Role;
use crate::resilience::ReconnectBackoff;
use crate::security::UrlSigner;

/// Receives every decoded inbound frame except session-level control
/// (PONG, FORCE_CLIENT_DISCONNECT). Runs on the read loop, so it must not block.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, delivered: Delivered, writer: &FrameWriter);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Another client claimed the host.
    Displaced,
    /// `close()` was called.
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub role: Role,
    pub host_key: Option<String>,
    /// Reconnect on its own after an unexpected close.
    pub auto_reconnect: bool,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub inactivity: Duration,
    pub heartbeat: Option<Duration>,
}

impl SessionOptions {
    /// Long-lived client session: reconnects and heartbeats.
    pub fn client(host_key: impl Into<String>, session: &crate::config::schema::SessionConfig) -> Self {
        Self {
            role: Role::Client,
            host_key: Some(host_key.into()),
            auto_reconnect: true,
            reconnect_base: Duration::from_millis(session.reconnect_base_ms),
            reconnect_max: Duration::from_millis(session.reconnect_max_ms),
            inactivity: Duration::from_secs(session.inactivity_secs),
            heartbeat: Some(Duration::from_secs(session.heartbeat_secs)),
        }
    }

    /// Gateway session: opened on demand, no heartbeat.
    pub fn server(session: &crate::config::schema::SessionConfig) -> Self {
        Self {
            role: Role::Server,
            host_key: None,
            auto_reconnect: false,
            reconnect_base: Duration::from_millis(session.reconnect_base_ms),
            reconnect_max: Duration::from_millis(session.reconnect_max_ms),
            inactivity: Duration::from_secs(session.inactivity_secs),
            heartbeat: None,
        }
    }
}

type Waiter = oneshot::Sender<RelayResult<FrameWriter>>;

enum Slot {
    Disconnected,
    Connecting(Vec<Waiter>),
    Open { writer: FrameWriter, epoch: u64 },
}

struct Inner {
    endpoint: Url,
    signer: UrlSigner,
    options: SessionOptions,
    handler: Arc<dyn FrameHandler>,
    slot: Mutex<Slot>,
    epoch: AtomicU64,
    backoff: Mutex<ReconnectBackoff>,
    stop: watch::Sender<Option<StopReason>>,
}

#[derive(Clone)]
pub struct RelaySession {
    inner: Arc<Inner>,
}

impl RelaySession {
    /// `endpoint` is the unsigned hub URL (`ws://host/wormholeWs`).
    pub fn new(
        endpoint: Url,
        signer: UrlSigner,
        options: SessionOptions,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        let backoff = ReconnectBackoff::new(options.reconnect_base, options.reconnect_max);
        let (stop, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                signer,
                options,
                handler,
                slot: Mutex::new(Slot::Disconnected),
                epoch: AtomicU64::new(0),
                backoff: Mutex::new(backoff),
                stop,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        match &*lock(&self.inner.slot) {
            Slot::Disconnected => SessionState::Disconnected,
            Slot::Connecting(_) => SessionState::Connecting,
            Slot::Open { writer, .. } if !writer.is_closed() => SessionState::Open,
            Slot::Open { .. } => SessionState::Disconnected,
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.inner.stop.borrow()
    }

    /// Writer for the open socket, connecting first if needed.
    pub async fn ensure_open(&self) -> RelayResult<FrameWriter> {
        let rx = {
            let mut slot = lock(&self.inner.slot);
            if let Some(reason) = self.stop_reason() {
                return Err(RelayError::WebSocketUnavailable(format!(
                    "session stopped ({:?})",
                    reason
                )));
            }
            let (tx, rx) = oneshot::channel();
            match &mut *slot {
                Slot::Open { writer, .. } if !writer.is_closed() => return Ok(writer.clone()),
                Slot::Connecting(waiters) => waiters.push(tx),
                _ => {
                    *slot = Slot::Connecting(vec![tx]);
                    let session = self.clone();
                    tokio::spawn(async move { session.establish().await });
                }
            }
            rx
        };
        rx.await
            .map_err(|_| RelayError::WebSocketUnavailable("connect attempt abandoned".into()))?
    }

    /// Stop the session and close the socket. No reconnect follows.
    pub fn close(&self) {
        self.stop_with(StopReason::Closed);
    }

    /// Resolve once the session has stopped for good.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.inner.stop.subscribe();
        let reason = match rx.wait_for(|r| r.is_some()).await {
            Ok(reason) => (*reason).unwrap_or(StopReason::Closed),
            Err(_) => StopReason::Closed,
        };
        reason
    }

    fn stop_with(&self, reason: StopReason) {
        self.inner.stop.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        let slot = std::mem::replace(&mut *lock(&self.inner.slot), Slot::Disconnected);
        match slot {
            Slot::Open { writer, .. } => writer.close(),
            Slot::Connecting(waiters) => release(
                waiters,
                Err(RelayError::WebSocketUnavailable("session stopped".into())),
            ),
            Slot::Disconnected => {}
        }
    }

    async fn establish(self) {
        let outcome = self.connect_once().await;
        let waiters = {
            let mut slot = lock(&self.inner.slot);
            let waiters = match std::mem::replace(&mut *slot, Slot::Disconnected) {
                Slot::Connecting(waiters) => waiters,
                other => {
                    // Stopped while connecting.
                    *slot = other;
                    Vec::new()
                }
            };
            if let Ok((writer, epoch)) = &outcome {
                if self.stop_reason().is_none() {
                    *slot = Slot::Open {
                        writer: writer.clone(),
                        epoch: *epoch,
                    };
                } else {
                    writer.close();
                }
            }
            waiters
        };

        match outcome {
            Ok((writer, _)) => {
                lock(&self.inner.backoff).reset();
                release(waiters, Ok(writer));
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.inner.endpoint, error = %e, "WebSocket connect failed");
                release(waiters, Err(e));
                self.schedule_reconnect();
            }
        }
    }

    async fn connect_once(&self) -> RelayResult<(FrameWriter, u64)> {
        let mut url = self.inner.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("clientType", self.inner.options.role.as_str());
            if let Some(host) = &self.inner.options.host_key {
                query.append_pair("clientForHost", host);
            }
        }
        let signed = self.inner.signer.sign(&url);

        let (socket, _) = tokio_tungstenite::connect_async(signed.as_str())
            .await
            .map_err(|e| RelayError::WebSocketUnavailable(e.to_string()))?;
        let (sink, stream) = socket.split();

        let (writer, rx) = FrameWriter::channel();
        tokio::spawn(pump(
            rx,
            sink,
            |t| Message::Text(t.into()),
            || Message::Close(None),
        ));

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            role = %self.inner.options.role,
            host = ?self.inner.options.host_key,
            epoch,
            "Relay session open"
        );

        let session = self.clone();
        let loop_writer = writer.clone();
        tokio::spawn(async move {
            session.read_loop(stream, loop_writer.clone()).await;
            loop_writer.close();
            session.on_closed(epoch);
        });

        Ok((writer, epoch))
    }

    async fn read_loop<S>(&self, mut stream: S, writer: FrameWriter)
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let options = &self.inner.options;
        let inactivity = tokio::time::sleep(options.inactivity);
        tokio::pin!(inactivity);
        let mut heartbeat = options
            .heartbeat
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut awaiting_pong = false;
        let mut stop = self.inner.stop.subscribe();
        if stop.borrow().is_some() {
            return;
        }

        loop {
            tokio::select! {
                message = stream.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                metrics::record_frame_dropped("binary");
                                continue;
                            }
                        },
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = false;
                            inactivity.as_mut().reset(Instant::now() + options.inactivity);
                            continue;
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {
                            inactivity.as_mut().reset(Instant::now() + options.inactivity);
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket read failed");
                            break;
                        }
                    };
                    inactivity.as_mut().reset(Instant::now() + options.inactivity);

                    let delivered = match decode(&text) {
                        Ok(delivered) => delivered,
                        Err(e) => {
                            metrics::record_frame_dropped("malformed");
                            tracing::warn!(error = %e, "Dropping malformed frame");
                            continue;
                        }
                    };
                    match delivered.frame {
                        Frame::Control(Control::Pong) => awaiting_pong = false,
                        Frame::Control(Control::ForceClientDisconnect) => {
                            tracing::error!(
                                host = ?options.host_key,
                                "Forcefully disconnected by another client for the same host"
                            );
                            self.stop_with(StopReason::Displaced);
                            break;
                        }
                        _ => self.inner.handler.on_frame(delivered, &writer),
                    }
                }
                _ = &mut inactivity => {
                    tracing::info!(idle_secs = options.inactivity.as_secs(), "Closing inactive WebSocket");
                    break;
                }
                _ = tick(&mut heartbeat) => {
                    if awaiting_pong {
                        tracing::warn!("Missed PONG, closing WebSocket");
                        break;
                    }
                    awaiting_pong = true;
                    tracing::debug!(">> PING");
                    if writer.send_frame(None, &Frame::Control(Control::Ping)).is_err() {
                        break;
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }

    fn on_closed(&self, epoch: u64) {
        {
            let mut slot = lock(&self.inner.slot);
            if let Slot::Open { epoch: current, .. } = &*slot {
                if *current == epoch {
                    *slot = Slot::Disconnected;
                }
            }
        }
        tracing::info!(role = %self.inner.options.role, epoch, "Relay session closed");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if !self.inner.options.auto_reconnect || self.stop_reason().is_some() {
            return;
        }
        let delay = lock(&self.inner.backoff).next_delay();
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if session.stop_reason().is_some() {
                return;
            }
            metrics::record_reconnect(session.inner.options.role.as_str());
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting to WebSocket");
            // Failures schedule the next attempt from establish().
            let _ = session.ensure_open().await;
        });
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn release(waiters: Vec<Waiter>, outcome: RelayResult<FrameWriter>) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use axum::extract::ws::{self, WebSocketUpgrade};
    use axum::routing::get;
    use tokio::net::TcpListener;

    use crate::config::schema::HubConfig;
    use crate::hub::Hub;
    use crate::protocol::encode;
    use crate::registry::{ConnectionRegistry, MemoryRegistry};

    struct Ignore;

    impl FrameHandler for Ignore {
        fn on_frame(&self, _delivered: Delivered, _writer: &FrameWriter) {}
    }

    fn signer() -> UrlSigner {
        UrlSigner::new(b"secret", Duration::from_secs(60))
    }

    fn options(role: Role) -> SessionOptions {
        SessionOptions {
            role,
            host_key: (role == Role::Client).then(|| "a.example".to_string()),
            auto_reconnect: role == Role::Client,
            reconnect_base: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(200),
            inactivity: Duration::from_secs(60),
            heartbeat: None,
        }
    }

    fn session(endpoint: &Url, options: SessionOptions) -> RelaySession {
        RelaySession::new(endpoint.clone(), signer(), options, Arc::new(Ignore))
    }

    async fn serve(app: axum::Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("ws://{}/wormholeWs", addr)).unwrap()
    }

    async fn real_hub() -> (Url, Hub, MemoryRegistry) {
        let registry = MemoryRegistry::new();
        let hub = Hub::new(Arc::new(registry.clone()), signer(), HubConfig::default());
        let url = serve(hub.router()).await;
        (url, hub, registry)
    }

    /// Accepts every upgrade, optionally sends `greeting`, then never replies.
    async fn silent_hub(greeting: Option<String>) -> (Url, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let app = axum::Router::new().route(
            "/wormholeWs",
            get(move |upgrade: WebSocketUpgrade| {
                let counter = counter.clone();
                let greeting = greeting.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    upgrade.on_upgrade(move |mut socket| async move {
                        if let Some(text) = greeting {
                            let _ = socket.send(ws::Message::Text(text.into())).await;
                        }
                        while let Some(Ok(_)) = socket.recv().await {}
                    })
                }
            }),
        );
        (serve(app).await, connects)
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        false
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        let (url, hub, _) = real_hub().await;
        let session = session(&url, options(Role::Server));

        let results =
            futures_util::future::join_all((0..5).map(|_| session.ensure_open())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.inner.epoch.load(Ordering::SeqCst), 1);
        assert!(eventually(|| hub.connection_count() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn failed_connect_releases_every_waiter() {
        let url = Url::parse("ws://127.0.0.1:1/wormholeWs").unwrap();
        let session = session(&url, options(Role::Server));

        let results =
            futures_util::future::join_all((0..3).map(|_| session.ensure_open())).await;

        assert_eq!(results.len(), 3);
        for result in results {
            assert!(matches!(result, Err(RelayError::WebSocketUnavailable(_))));
        }
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn client_reconnects_after_the_hub_drops_it() {
        let (url, hub, registry) = real_hub().await;
        let session = session(&url, options(Role::Client));
        session.ensure_open().await.unwrap();
        assert!(eventually(|| hub.connection_count() == 1).await);
        let first = registry.query_by_host_key("a.example").await.unwrap().unwrap();

        hub.close_all();

        assert!(
            eventually(|| {
                session.inner.epoch.load(Ordering::SeqCst) >= 2
                    && session.state() == SessionState::Open
            })
            .await
        );
        let mut second = None;
        for _ in 0..100 {
            second = registry.query_by_host_key("a.example").await.unwrap();
            if second.as_ref().is_some_and(|e| e.connection_id != first.connection_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert_ne!(second.unwrap().connection_id, first.connection_id);
        session.close();
    }

    #[tokio::test]
    async fn idle_socket_is_closed() {
        let (url, _hub, _) = real_hub().await;
        let mut options = options(Role::Server);
        options.inactivity = Duration::from_millis(200);
        let session = session(&url, options);

        session.ensure_open().await.unwrap();
        assert_eq!(session.state(), SessionState::Open);

        assert!(eventually(|| session.state() == SessionState::Disconnected).await);
        assert_eq!(session.stop_reason(), None);
    }

    #[tokio::test]
    async fn missed_pong_forces_a_reconnect() {
        let (url, connects) = silent_hub(None).await;
        let mut options = options(Role::Client);
        options.heartbeat = Some(Duration::from_millis(100));
        let session = session(&url, options);

        session.ensure_open().await.unwrap();

        assert!(eventually(|| connects.load(Ordering::SeqCst) >= 2).await);
        session.close();
    }

    #[tokio::test]
    async fn force_disconnect_stops_the_session_for_good() {
        let greeting = encode(None, &Frame::Control(Control::ForceClientDisconnect));
        let (url, connects) = silent_hub(Some(greeting)).await;
        let session = session(&url, options(Role::Client));

        let _ = session.ensure_open().await;
        let reason = tokio::time::timeout(Duration::from_secs(5), session.stopped())
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Displaced);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(session.ensure_open().await.is_err());
    }

    #[tokio::test]
    async fn close_releases_stopped_waiters() {
        let (url, _hub, _) = real_hub().await;
        let session = session(&url, options(Role::Server));
        session.ensure_open().await.unwrap();

        session.close();

        assert_eq!(session.stopped().await, StopReason::Closed);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.ensure_open().await.is_err());
    }
}
