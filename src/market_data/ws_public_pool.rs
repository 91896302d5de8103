//! Bounded pool of public WebSocket sockets with per-socket subscription
//! accounting, generalized from the teacher's single-socket
//! `infrastructure::binance::websocket::BinanceWebSocketManager`
//! (reconnect-with-exponential-backoff, `tokio::spawn`'d read loop, an
//! `mpsc` writer task feeding the `Sink` half) to N pooled sockets each
//! holding at most `MAX_SUBS_PER_SOCKET` subscriptions (spec §4.8).

use crate::market_data::symbols::SymbolResolver;
use crate::errors::CoreError;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ticker,
    Trades,
    Candles,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Ticker => "ticker",
            Channel::Trades => "trades",
            Channel::Candles => "candles",
        }
    }
}

/// Canonical subscription key: `channel|[tf:]symbol`.
pub fn sub_key(channel: Channel, symbol: &str, timeframe: Option<&str>) -> String {
    match timeframe {
        Some(tf) => format!("{}|{}:{}", channel.as_str(), tf, symbol),
        None => format!("{}|{}", channel.as_str(), symbol),
    }
}

struct SocketEntry {
    id: u64,
    subs: std::collections::HashSet<String>,
    outgoing: mpsc::Sender<Message>,
    handle: tokio::task::JoinHandle<()>,
}

struct PoolInner {
    sockets: Vec<SocketEntry>,
    sub_owner: HashMap<String, u64>,
}

/// Bounded pool of public sockets per spec §4.8; `sub → socket` and
/// `socket → sub_count` bookkeeping lives in `PoolInner`, serialized by a
/// single mutex (consistent with the rest of the crate's single-writer
/// file/state-owner discipline).
pub struct WSPublicPool {
    ws_url: String,
    max_sockets: usize,
    max_subs_per_socket: usize,
    resolver: Arc<SymbolResolver>,
    inner: Mutex<PoolInner>,
    // Shared across all sockets so a reconnect (which re-spawns `run_socket`
    // with a fresh `chanId` namespace) keeps dispatching to the same
    // `sub_key`-registered handlers without re-subscribing callers.
    handlers: Arc<Mutex<HashMap<String, EventHandler>>>,
    next_socket_id: AtomicU64,
}

pub struct SubHandle {
    pub sub_key: String,
}

impl WSPublicPool {
    pub fn new(ws_url: String, max_sockets: usize, max_subs_per_socket: usize, resolver: Arc<SymbolResolver>) -> Self {
        Self {
            ws_url,
            max_sockets,
            max_subs_per_socket,
            resolver,
            inner: Mutex::new(PoolInner {
                sockets: Vec::new(),
                sub_owner: HashMap::new(),
            }),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_socket_id: AtomicU64::new(1),
        }
    }

    pub async fn subscribe(
        &self,
        channel: Channel,
        symbol: &str,
        timeframe: Option<&str>,
        handler: EventHandler,
    ) -> Result<SubHandle, CoreError> {
        let symbol = self.resolver.resolve(symbol)?;
        let key = sub_key(channel, &symbol, timeframe);

        let mut inner = self.inner.lock().await;

        // Idempotent: an already-owned sub key coalesces into the existing
        // subscription, no second network frame (spec §8 round-trip law).
        if inner.sub_owner.contains_key(&key) {
            self.handlers.lock().await.insert(key.clone(), handler);
            return Ok(SubHandle { sub_key: key });
        }

        let socket_idx = self.pick_or_open_socket(&mut inner).await?;
        let socket = &mut inner.sockets[socket_idx];
        socket.subs.insert(key.clone());
        let socket_id = socket.id;

        let frame = subscribe_frame(channel, &symbol, timeframe);
        if socket
            .outgoing
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            warn!("WSPublicPool: socket {} closed while subscribing {}", socket_id, key);
        }

        inner.sub_owner.insert(key.clone(), socket_id);
        self.handlers.lock().await.insert(key.clone(), handler);

        Ok(SubHandle { sub_key: key })
    }

    pub async fn unsubscribe(&self, sub_key: &str) {
        let mut inner = self.inner.lock().await;
        let Some(socket_id) = inner.sub_owner.remove(sub_key) else {
            return;
        };
        self.handlers.lock().await.remove(sub_key);

        if let Some(entry) = inner.sockets.iter_mut().find(|s| s.id == socket_id) {
            entry.subs.remove(sub_key);
            let frame = serde_json::json!({ "event": "unsubscribe", "chanId": sub_key });
            let _ = entry.outgoing.send(Message::Text(frame.to_string().into())).await;
        }

        // Warm-pool threshold: keep at least one idle socket around rather
        // than thrashing open/close on every unsubscribe.
        const WARM_POOL_MIN_IDLE_SOCKETS: usize = 1;
        let empty_count = inner.sockets.iter().filter(|s| s.subs.is_empty()).count();
        if empty_count > WARM_POOL_MIN_IDLE_SOCKETS {
            if let Some(pos) = inner.sockets.iter().position(|s| s.subs.is_empty()) {
                let entry = inner.sockets.remove(pos);
                entry.handle.abort();
            }
        }
    }

    /// Shrinks the pool at runtime: drains empty sockets down to the new
    /// cap. Never force-drops a socket with active subs.
    pub async fn apply_max_sockets(&self, new_max: usize) {
        let mut inner = self.inner.lock().await;
        while inner.sockets.len() > new_max {
            if let Some(pos) = inner.sockets.iter().position(|s| s.subs.is_empty()) {
                let entry = inner.sockets.remove(pos);
                entry.handle.abort();
            } else {
                break;
            }
        }
    }

    pub async fn socket_count(&self) -> usize {
        self.inner.lock().await.sockets.len()
    }

    pub async fn sub_count(&self) -> usize {
        self.inner.lock().await.sub_owner.len()
    }

    async fn pick_or_open_socket(&self, inner: &mut PoolInner) -> Result<usize, CoreError> {
        if let Some(idx) = inner
            .sockets
            .iter()
            .position(|s| s.subs.len() < self.max_subs_per_socket)
        {
            return Ok(idx);
        }
        if inner.sockets.len() >= self.max_sockets {
            return Err(CoreError::PoolSaturated);
        }

        let id = self.next_socket_id.fetch_add(1, Ordering::SeqCst);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(256);
        let url = self.ws_url.clone();
        let handlers = self.handlers.clone();
        let handle = tokio::spawn(run_socket(id, url, outgoing_rx, handlers));

        inner.sockets.push(SocketEntry {
            id,
            subs: std::collections::HashSet::new(),
            outgoing: outgoing_tx,
            handle,
        });
        Ok(inner.sockets.len() - 1)
    }
}

fn subscribe_frame(channel: Channel, symbol: &str, timeframe: Option<&str>) -> Value {
    match (channel, timeframe) {
        (Channel::Candles, Some(tf)) => serde_json::json!({
            "event": "subscribe",
            "channel": "candles",
            "key": format!("trade:{}:{}", tf, symbol),
        }),
        _ => serde_json::json!({
            "event": "subscribe",
            "channel": channel.as_str(),
            "symbol": symbol,
        }),
    }
}

/// Reconstructs the `sub_key` a `{"event":"subscribed",...}` ack confirms,
/// from the ack's own `channel`/`symbol`/`key` fields -- the ack carries
/// everything needed to rebuild the key without correlating against a
/// separate pending-subscription table.
fn subscribed_ack_key(value: &Value) -> Option<String> {
    if value.get("event").and_then(|v| v.as_str()) != Some("subscribed") {
        return None;
    }
    let channel = match value.get("channel").and_then(|v| v.as_str())? {
        "ticker" => Channel::Ticker,
        "trades" => Channel::Trades,
        "candles" => Channel::Candles,
        _ => return None,
    };
    match channel {
        Channel::Candles => {
            let key = value.get("key").and_then(|v| v.as_str())?;
            let mut parts = key.splitn(3, ':');
            let _prefix = parts.next()?;
            let tf = parts.next()?;
            let symbol = parts.next()?;
            Some(sub_key(Channel::Candles, symbol, Some(tf)))
        }
        _ => {
            let symbol = value.get("symbol").and_then(|v| v.as_str())?;
            Some(sub_key(channel, symbol, None))
        }
    }
}

/// Owns one socket's whole lifetime: connect, writer-forwarding task,
/// read loop, and exponential-backoff reconnect -- mirrors the teacher's
/// `BinanceWebSocketManager::run_websocket`/`connect_and_stream` split.
async fn run_socket(
    id: u64,
    url: String,
    mut outgoing_rx: mpsc::Receiver<Message>,
    handlers: Arc<Mutex<HashMap<String, EventHandler>>>,
) {
    let mut backoff = 1u64;
    const MAX_BACKOFF: u64 = 60;

    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                info!("WSPublicPool: socket {} connected", id);
                backoff = 1;
                let (mut write, mut read) = stream.split();

                // chanId is reassigned by the exchange on every connection,
                // so this binding is rebuilt from scratch per reconnect.
                let mut chan_ids: HashMap<u64, String> = HashMap::new();

                let pump = async {
                    while let Some(msg) = outgoing_rx.recv().await {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                };
                let listen = async {
                    while let Some(Ok(msg)) = read.next().await {
                        let Message::Text(text) = msg else { continue };
                        debug!("WSPublicPool: socket {} <- {}", id, text);
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };

                        if value.is_object() {
                            if let Some(key) = subscribed_ack_key(&value) {
                                if let Some(chan_id) = value.get("chanId").and_then(|v| v.as_u64()) {
                                    chan_ids.insert(chan_id, key);
                                }
                            }
                            continue;
                        }

                        let Some(arr) = value.as_array() else { continue };
                        let Some(chan_id) = arr.first().and_then(|v| v.as_u64()) else { continue };
                        // Heartbeats carry no payload worth dispatching.
                        if arr.get(1).and_then(|v| v.as_str()) == Some("hb") {
                            continue;
                        }
                        let Some(key) = chan_ids.get(&chan_id) else { continue };

                        let handler = handlers.lock().await.get(key).cloned();
                        if let Some(handler) = handler {
                            handler(value.clone());
                        }
                    }
                };
                tokio::select! {
                    _ = pump => {}
                    _ = listen => {}
                }
                warn!("WSPublicPool: socket {} disconnected, reconnecting", id);
            }
            Err(e) => {
                error!("WSPublicPool: socket {} connect failed: {}. retry in {}s", id, e, backoff);
            }
        }
        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_key_includes_timeframe_when_present() {
        assert_eq!(sub_key(Channel::Candles, "tBTCUSD", Some("1m")), "candles|1m:tBTCUSD");
        assert_eq!(sub_key(Channel::Ticker, "tBTCUSD", None), "ticker|tBTCUSD");
    }

    #[test]
    fn subscribe_frame_uses_key_form_for_candles() {
        let frame = subscribe_frame(Channel::Candles, "tBTCUSD", Some("1m"));
        assert_eq!(frame["key"], "trade:1m:tBTCUSD");
        let frame = subscribe_frame(Channel::Ticker, "tBTCUSD", None);
        assert_eq!(frame["symbol"], "tBTCUSD");
    }

    #[test]
    fn subscribed_ack_key_reconstructs_ticker_sub_key() {
        let ack = serde_json::json!({
            "event": "subscribed",
            "channel": "ticker",
            "chanId": 5,
            "symbol": "tBTCUSD",
        });
        assert_eq!(subscribed_ack_key(&ack).unwrap(), sub_key(Channel::Ticker, "tBTCUSD", None));
    }

    #[test]
    fn subscribed_ack_key_reconstructs_candle_sub_key() {
        let ack = serde_json::json!({
            "event": "subscribed",
            "channel": "candles",
            "chanId": 9,
            "key": "trade:1m:tBTCUSD",
        });
        assert_eq!(
            subscribed_ack_key(&ack).unwrap(),
            sub_key(Channel::Candles, "tBTCUSD", Some("1m"))
        );
    }

    #[test]
    fn subscribed_ack_key_ignores_non_subscribed_events() {
        let info = serde_json::json!({ "event": "info", "version": 2 });
        assert!(subscribed_ack_key(&info).is_none());
    }
}
