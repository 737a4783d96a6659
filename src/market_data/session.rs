//! Transport seam and its WebSocket implementation.
//!
//! [`WsSession`] owns at most one live connection. It is opened lazily by
//! the first subscribe and reopened with exponential backoff after a drop,
//! replaying every recorded subscription. Inbound frames are handed to the
//! registered handler one at a time, in arrival order, from the single
//! connection task.

use std::collections::HashSet;
use std::io::Read;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{FeedError, FeedResult};

/// What the feed needs from a connection.
pub trait Transport: Send + Sync {
    /// Send a subscribe request. Safe to call repeatedly with the same
    /// request; duplicates are not re-sent.
    fn subscribe(&self, request: &Value) -> FeedResult<()>;
}

pub type FrameHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type Decompressor = Arc<dyn Fn(&[u8]) -> FeedResult<Vec<u8>> + Send + Sync>;
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Raw-deflate (no zlib header) inflater, for venues that compress binary
/// frames.
pub fn inflate_raw(data: &[u8]) -> FeedResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| FeedError::decode("deflate", e))?;
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 0 = retry forever
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            max_retries: 0,
        }
    }
}

/// `initial * 2^attempt` capped at `max`, plus up to 50% jitter.
pub(crate) fn calculate_backoff(initial: &Duration, max: &Duration, attempt: u32) -> Duration {
    let base = initial.saturating_mul(2u32.saturating_pow(attempt)).min(*max);
    let jitter = Duration::from_secs_f64(base.as_secs_f64() * rand::random::<f64>() * 0.5);
    base + jitter
}

struct SessionConfig {
    url: String,
    auto_reconnect: bool,
    heartbeat: Option<(String, Duration)>,
    decompress: Option<Decompressor>,
    on_reconnect: Option<ReconnectHook>,
    policy: ReconnectPolicy,
}

pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: SessionConfig {
                url: url.into(),
                auto_reconnect: true,
                heartbeat: None,
                decompress: None,
                on_reconnect: None,
                policy: ReconnectPolicy::default(),
            },
        }
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Text payload sent every `interval` while connected.
    pub fn heartbeat(mut self, payload: impl Into<String>, interval: Duration) -> Self {
        self.config.heartbeat = Some((payload.into(), interval));
        self
    }

    /// Applied to binary frames before the handler sees them.
    pub fn decompress(mut self, f: Decompressor) -> Self {
        self.config.decompress = Some(f);
        self
    }

    /// Runs after every successful reconnect, before subscriptions replay.
    pub fn on_reconnect(mut self, f: ReconnectHook) -> Self {
        self.config.on_reconnect = Some(f);
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn build(self, handler: FrameHandler) -> WsSession {
        WsSession {
            config: Arc::new(self.config),
            handler,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            outbox: OnceLock::new(),
        }
    }
}

enum Command {
    Subscribe(Value),
}

pub struct WsSession {
    config: Arc<SessionConfig>,
    handler: FrameHandler,
    subscriptions: Arc<Mutex<Vec<Value>>>,
    outbox: OnceLock<mpsc::UnboundedSender<Command>>,
}

impl WsSession {
    pub fn builder(url: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Requests replayed on every (re)connect.
    pub fn subscriptions(&self) -> Vec<Value> {
        self.subscriptions.lock().clone()
    }

    /// Starts the connection task on first use; later calls are no-ops.
    pub fn connect(&self) -> FeedResult<()> {
        self.sender().map(|_| ())
    }

    fn sender(&self) -> FeedResult<&mpsc::UnboundedSender<Command>> {
        if let Some(tx) = self.outbox.get() {
            return Ok(tx);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FeedError::Transport(format!("no tokio runtime to connect from: {e}")))?;
        Ok(self.outbox.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = ConnectionTask {
                config: Arc::clone(&self.config),
                handler: Arc::clone(&self.handler),
                subscriptions: Arc::clone(&self.subscriptions),
            };
            runtime.spawn(task.run(rx));
            tx
        }))
    }
}

impl Transport for WsSession {
    fn subscribe(&self, request: &Value) -> FeedResult<()> {
        if self.subscriptions.lock().contains(request) {
            debug!(%request, "already subscribed");
            return Ok(());
        }
        self.sender()?
            .send(Command::Subscribe(request.clone()))
            .map_err(|_| FeedError::Transport(format!("session for {} has stopped", self.config.url)))?;

        let mut subs = self.subscriptions.lock();
        if !subs.contains(request) {
            subs.push(request.clone());
        }
        Ok(())
    }
}

struct ConnectionTask {
    config: Arc<SessionConfig>,
    handler: FrameHandler,
    subscriptions: Arc<Mutex<Vec<Value>>>,
}

impl ConnectionTask {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let url = self.config.url.as_str();
        let policy = &self.config.policy;
        let mut attempt: u32 = 0;
        let mut connected_before = false;

        loop {
            if attempt > 0 {
                if !self.config.auto_reconnect {
                    warn!(%url, "connection lost and auto-reconnect is off, session stopped");
                    return;
                }
                if policy.max_retries > 0 && attempt > policy.max_retries {
                    error!(%url, retries = policy.max_retries, "giving up reconnecting");
                    return;
                }
                let backoff =
                    calculate_backoff(&policy.initial_backoff, &policy.max_backoff, attempt - 1);
                info!(%url, attempt, backoff_ms = backoff.as_millis() as u64, "reconnecting");
                tokio::time::sleep(backoff).await;
            }

            let ws = match tokio_tungstenite::connect_async(url).await {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    error!(%url, error = %e, "websocket connect failed");
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };
            let (mut sink, mut stream) = ws.split();
            info!(%url, "websocket connected");

            if connected_before {
                metrics::counter!("lobx_feed_reconnects_total").increment(1);
                if let Some(hook) = &self.config.on_reconnect {
                    hook();
                }
            }
            connected_before = true;

            // requests already on the wire for this connection
            let mut sent: HashSet<String> = HashSet::new();
            let replay = self.subscriptions.lock().clone();
            let mut replay_failed = false;
            for request in replay {
                let text = request.to_string();
                if sent.insert(text.clone()) {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        error!(%url, error = %e, "subscription replay failed");
                        replay_failed = true;
                        break;
                    }
                }
            }
            if replay_failed {
                attempt = 1;
                continue;
            }

            let mut heartbeat = self.config.heartbeat.as_ref().map(|(payload, every)| {
                let mut interval = tokio::time::interval(*every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                (payload.clone(), interval)
            });
            // interval fires immediately once; skip that tick
            if let Some((_, interval)) = heartbeat.as_mut() {
                interval.reset();
            }

            let reason = loop {
                let beat = async {
                    match heartbeat.as_mut() {
                        Some((_, interval)) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(Command::Subscribe(request)) => {
                            let text = request.to_string();
                            if !sent.insert(text.clone()) {
                                continue;
                            }
                            debug!(%url, request = %text, "sending subscribe");
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                break format!("send failed: {e}");
                            }
                        }
                        None => {
                            debug!(%url, "session dropped, closing connection");
                            let _ = sink.close().await;
                            return;
                        }
                    },
                    _ = beat => {
                        if let Some((payload, _)) = heartbeat.as_ref() {
                            if let Err(e) = sink.send(Message::Text(payload.clone())).await {
                                break format!("heartbeat failed: {e}");
                            }
                        }
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => (self.handler)(text.as_bytes()),
                        Some(Ok(Message::Binary(bytes))) => match &self.config.decompress {
                            Some(inflate) => match inflate(&bytes) {
                                Ok(plain) => (self.handler)(&plain),
                                Err(e) => warn!(%url, error = %e, "dropping undecodable binary frame"),
                            },
                            None => (self.handler)(&bytes),
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = sink.send(Message::Pong(payload)).await {
                                break format!("pong failed: {e}");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => break format!("closed by peer: {frame:?}"),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("read error: {e}"),
                        None => break "stream ended".to_string(),
                    },
                }
            };

            warn!(%url, %reason, "websocket disconnected");
            attempt = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(30);
        for attempt in 0..12 {
            let base = initial.saturating_mul(2u32.saturating_pow(attempt)).min(max);
            let backoff = calculate_backoff(&initial, &max, attempt);
            assert!(backoff >= base);
            assert!(backoff <= base + base / 2);
        }
        assert!(calculate_backoff(&initial, &max, 40) >= max);
    }

    #[test]
    fn inflate_round_trips_raw_deflate() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"table":"spot/ticker"}"#).unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(inflate_raw(&packed).unwrap(), br#"{"table":"spot/ticker"}"#);
        assert_eq!(inflate_raw(b"\xff\xff\xff").unwrap_err().kind(), "decode");
    }

    #[test]
    fn subscribe_outside_a_runtime_is_a_transport_error() {
        let session = WsSession::builder("ws://127.0.0.1:9").build(Arc::new(|_: &[u8]| {}));
        let err = session.subscribe(&serde_json::json!({"op": "subscribe"})).unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(session.subscriptions().is_empty());
    }
}
