//! NewBlock stream supervisor.
//!
//! Owns at most one WebSocket subscription at a time, alternates between the
//! primary and backup endpoint after every failure, and forces a reconnect
//! when the liveness watchdog sees no progress. Decoded blocks are pushed
//! into a bounded queue in strictly increasing height order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use valwatch_core::BlockCommitEvent;

use crate::backoff::Backoff;
use crate::decode::{self, StreamMessage};
use crate::error::TransportError;

pub const SUBSCRIBE_NEW_BLOCK: &str =
    r#"{"jsonrpc":"2.0","method":"subscribe","id":"0","params":{"query":"tm.event='NewBlock'"}}"#;
pub const UNSUBSCRIBE_ALL: &str =
    r#"{"jsonrpc":"2.0","method":"unsubscribe_all","id":"0","params":{}}"#;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the stream supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// e.g. `ws://localhost:26657/websocket`
    pub primary_url: String,
    pub backup_url: Option<String>,
    pub watchdog_interval_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Bound of the block queue between the supervisor and the engine.
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            primary_url: "ws://localhost:26657/websocket".into(),
            backup_url: None,
            watchdog_interval_secs: 120,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 60_000,
            queue_capacity: 256,
        }
    }
}

/// Cloneable read handle on the last delivered height.
#[derive(Debug, Clone, Default)]
pub struct LatestHeight(Arc<AtomicU64>);

impl LatestHeight {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, height: u64) {
        self.0.store(height, Ordering::Release);
    }
}

/// Detects a stalled stream. Fires once per stall on a connection; a stall
/// ends when the observed height changes or a new connection re-arms it.
#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    last_seen: u64,
    fired_at: Option<u64>,
}

impl Watchdog {
    /// Called on every timer tick with the current height. Returns `true`
    /// when a reconnect should be forced.
    pub fn tick(&mut self, height: u64) -> bool {
        if height != self.last_seen {
            self.last_seen = height;
            self.fired_at = None;
            return false;
        }
        if self.fired_at == Some(height) {
            return false;
        }
        self.fired_at = Some(height);
        true
    }

    /// Start watching a fresh connection from `height`.
    pub fn rearm(&mut self, height: u64) {
        self.last_seen = height;
        self.fired_at = None;
    }
}

/// Primary/backup endpoint pair.
#[derive(Debug, Clone)]
pub struct Endpoints {
    primary: String,
    backup: Option<String>,
    on_backup: bool,
}

impl Endpoints {
    pub fn new(primary: impl Into<String>, backup: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            backup: backup.filter(|b| !b.is_empty()),
            on_backup: false,
        }
    }

    pub fn current(&self) -> &str {
        match (&self.backup, self.on_backup) {
            (Some(backup), true) => backup,
            _ => &self.primary,
        }
    }

    /// Switch to the other endpoint, if there is one.
    pub fn rotate(&mut self) {
        if self.backup.is_some() {
            self.on_backup = !self.on_backup;
        }
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    /// The block consumer dropped its receiver.
    ConsumerGone,
    Failed(TransportError),
}

pub struct StreamSupervisor {
    config: StreamConfig,
    latest: LatestHeight,
}

impl StreamSupervisor {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            latest: LatestHeight::default(),
        }
    }

    pub fn latest_height(&self) -> LatestHeight {
        self.latest.clone()
    }

    /// Start the supervisor on its own task and return the block queue.
    pub fn spawn(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<BlockCommitEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let handle = tokio::spawn(self.run(tx, shutdown));
        (rx, handle)
    }

    /// Connect, subscribe and deliver blocks until shutdown or until the
    /// consumer goes away. Connection failures are never fatal.
    pub async fn run(self, events: mpsc::Sender<BlockCommitEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut endpoints = Endpoints::new(&self.config.primary_url, self.config.backup_url.clone());
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.reconnect_initial_ms),
            Duration::from_millis(self.config.reconnect_max_ms),
        );
        let mut watchdog = Watchdog::default();
        let period = Duration::from_secs(self.config.watchdog_interval_secs.max(1));
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let url = endpoints.current().to_string();
            tracing::info!(url = %url, "connecting via WebSocket");

            let conn = tokio::select! {
                conn = tokio_tungstenite::connect_async(url.as_str()) => conn,
                _ = shutdown.changed() => break,
            };
            match conn {
                Err(e) => tracing::warn!(url = %url, error = %e, "WS connect failed"),
                Ok((ws, _)) => {
                    watchdog.rearm(self.latest.get());
                    ticker.reset();
                    let end = self
                        .session(ws, &events, &mut shutdown, &mut watchdog, &mut ticker, &mut backoff)
                        .await;
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::ConsumerGone => {
                            tracing::info!("block consumer closed, stopping stream");
                            return;
                        }
                        SessionEnd::Failed(e) => tracing::warn!(url = %url, error = %e, "WS session ended"),
                    }
                }
            }

            endpoints.rotate();
            let delay = backoff.next_delay();
            tracing::warn!(
                delay_ms = delay.as_millis() as u64,
                next = %endpoints.current(),
                "reconnecting"
            );
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(latest_height = self.latest.get(), "stream supervisor stopped");
    }

    async fn session(
        &self,
        ws: WsStream,
        events: &mpsc::Sender<BlockCommitEvent>,
        shutdown: &mut watch::Receiver<bool>,
        watchdog: &mut Watchdog,
        ticker: &mut Interval,
        backoff: &mut Backoff,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        if let Err(e) = sink.send(Message::Text(SUBSCRIBE_NEW_BLOCK.into())).await {
            return SessionEnd::Failed(TransportError::WebSocket(e.to_string()));
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Text(UNSUBSCRIBE_ALL.into())).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = events.closed() => {
                    let _ = sink.send(Message::Text(UNSUBSCRIBE_ALL.into())).await;
                    let _ = sink.close().await;
                    return SessionEnd::ConsumerGone;
                }
                _ = ticker.tick() => {
                    let height = self.latest.get();
                    if watchdog.tick(height) {
                        tracing::warn!(height, "no new block since last watchdog tick, forcing reconnect");
                        let _ = sink.send(Message::Text(UNSUBSCRIBE_ALL.into())).await;
                        let _ = sink.close().await;
                        return SessionEnd::Failed(TransportError::Other(format!("stream stalled at height {height}")));
                    }
                }
                msg = stream.next() => {
                    let text = match msg {
                        None => return SessionEnd::Failed(TransportError::WebSocket("stream closed".into())),
                        Some(Err(e)) => return SessionEnd::Failed(TransportError::WebSocket(e.to_string())),
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Failed(TransportError::WebSocket(format!("closed by peer: {frame:?}")));
                        }
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    match decode::stream_message(text.as_str()) {
                        Ok(StreamMessage::Ack) => tracing::info!("subscribed to NewBlock events"),
                        Ok(StreamMessage::NewBlock(event)) => {
                            let previous = self.latest.get();
                            if event.height <= previous {
                                tracing::debug!(height = event.height, previous, "dropping replayed block");
                                continue;
                            }
                            self.latest.set(event.height);
                            backoff.reset();
                            tokio::select! {
                                sent = events.send(event) => {
                                    if sent.is_err() {
                                        return SessionEnd::ConsumerGone;
                                    }
                                }
                                _ = shutdown.changed() => return SessionEnd::Shutdown,
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "dropping undecodable stream message"),
                    }
                }
            }
        }
    }
}
