//! Single authenticated WS session with dead-man-switch and typed private
//! event fan-out (spec §4.9), grounded on the teacher's
//! `BinanceExecutionService`'s `broadcast::Sender<OrderUpdate>` fan-out
//! pattern, generalized to the exchange's full private event vocabulary
//! (`os/on/ou/oc/te/tu/ps/pn/pu/pc/ws/wu`).

use crate::errors::CoreError;
use crate::transport::signer::Signer;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum PrivateEvent {
    OrderSnapshot(Value),
    OrderNew(Value),
    OrderUpdate(Value),
    OrderCancel(Value),
    TradeExecuted(Value),
    TradeUpdate(Value),
    PositionSnapshot(Value),
    PositionNew(Value),
    PositionUpdate(Value),
    PositionClose(Value),
    WalletSnapshot(Value),
    WalletUpdate(Value),
}

impl PrivateEvent {
    /// Parses one `[0, <code>, <payload>]` private-channel frame (spec §6).
    fn from_code(code: &str, payload: Value) -> Option<Self> {
        match code {
            "os" => Some(PrivateEvent::OrderSnapshot(payload)),
            "on" => Some(PrivateEvent::OrderNew(payload)),
            "ou" => Some(PrivateEvent::OrderUpdate(payload)),
            "oc" => Some(PrivateEvent::OrderCancel(payload)),
            "te" => Some(PrivateEvent::TradeExecuted(payload)),
            "tu" => Some(PrivateEvent::TradeUpdate(payload)),
            "ps" => Some(PrivateEvent::PositionSnapshot(payload)),
            "pn" => Some(PrivateEvent::PositionNew(payload)),
            "pu" => Some(PrivateEvent::PositionUpdate(payload)),
            "pc" => Some(PrivateEvent::PositionClose(payload)),
            "ws" => Some(PrivateEvent::WalletSnapshot(payload)),
            "wu" => Some(PrivateEvent::WalletUpdate(payload)),
            _ => None,
        }
    }

    /// The order id an event pertains to, when applicable -- used to route
    /// `te/tu/on/ou/oc` for one order through a single-consumer channel so
    /// per-order-id ordering is preserved (spec §5).
    pub fn order_id(&self) -> Option<i64> {
        let payload = match self {
            PrivateEvent::OrderNew(v)
            | PrivateEvent::OrderUpdate(v)
            | PrivateEvent::OrderCancel(v) => v,
            PrivateEvent::TradeExecuted(v) | PrivateEvent::TradeUpdate(v) => {
                return v.get(3).and_then(|x| x.as_i64());
            }
            _ => return None,
        };
        payload.get(0).and_then(|x| x.as_i64())
    }
}

/// Dead-man-switch: exchange-side cancel-all-orders-on-disconnect, armed on
/// every successful `auth` and re-armed on each reconnect (spec §4.9, §9
/// default timeout 60s).
fn dead_man_switch_frame(timeout_ms: u64) -> Value {
    serde_json::json!({
        "event": "conf",
        "flags": 1 << 17, // SYNC_CANCELLED: dead-man-switch behavior flag
        "dms_timeout_ms": timeout_ms,
    })
}

pub struct WSPrivateSession {
    ws_url: String,
    signer: Arc<Signer>,
    nonce_source: Arc<crate::transport::nonce::NonceSource>,
    nonce_key: String,
    dead_man_switch_timeout_ms: u64,
    authenticated: Arc<AtomicBool>,
    events_tx: broadcast::Sender<PrivateEvent>,
    outgoing: Mutex<Option<mpsc::Sender<Message>>>,
}

impl WSPrivateSession {
    pub fn new(
        ws_url: String,
        signer: Arc<Signer>,
        nonce_source: Arc<crate::transport::nonce::NonceSource>,
        nonce_key: String,
        dead_man_switch_timeout_ms: u64,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            ws_url,
            signer,
            nonce_source,
            nonce_key,
            dead_man_switch_timeout_ms,
            authenticated: Arc::new(AtomicBool::new(false)),
            events_tx,
            outgoing: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrivateEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Sends an order-submit frame `[0, "on", null, {...}]` over the live
    /// session; fails with `ws_not_connected` if no socket is up.
    pub async fn submit_order(&self, order_payload: Value) -> Result<(), CoreError> {
        let frame = serde_json::json!([0, "on", Value::Null, order_payload]);
        self.send(frame).await
    }

    /// Sends a cancel frame `[0, "oc", null, {id}]`.
    pub async fn cancel_order(&self, order_id: i64) -> Result<(), CoreError> {
        let frame = serde_json::json!([0, "oc", Value::Null, { "id": order_id }]);
        self.send(frame).await
    }

    async fn send(&self, frame: Value) -> Result<(), CoreError> {
        let guard = self.outgoing.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(Message::Text(frame.to_string().into()))
                .await
                .map_err(|_| CoreError::WsNotConnected),
            None => Err(CoreError::WsNotConnected),
        }
    }

    /// Runs the connect/auth/read loop forever, reconnecting with
    /// exponential backoff. Spawn this once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 60;

        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    warn!("WSPrivateSession: socket closed cleanly, reconnecting");
                    backoff = 1;
                }
                Err(e) => {
                    error!("WSPrivateSession: connection error: {}. retry in {}s", e, backoff);
                }
            }
            self.authenticated.store(false, Ordering::SeqCst);
            *self.outgoing.lock().await = None;
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_and_serve(&self) -> Result<(), String> {
        let (stream, _) = connect_async(&self.ws_url).await.map_err(|e| e.to_string())?;
        info!("WSPrivateSession: connected");
        let (mut write, mut read) = stream.split();

        let nonce = self.nonce_source.next(&self.nonce_key).await;
        let auth_frame = self.signer.ws_auth_payload(nonce);
        write
            .send(Message::Text(auth_frame.to_string().into()))
            .await
            .map_err(|e| e.to_string())?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel(256);
        *self.outgoing.lock().await = Some(outgoing_tx);

        loop {
            tokio::select! {
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(msg) => { let _ = write.send(msg).await; }
                        None => return Ok(()),
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.to_string()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return;
        };

        if let Some(event) = value.get("event").and_then(|v| v.as_str()) {
            if event == "auth" {
                let status = value.get("status").and_then(|v| v.as_str()).unwrap_or("");
                if status == "OK" {
                    self.authenticated.store(true, Ordering::SeqCst);
                    info!("WSPrivateSession: authenticated, arming dead-man-switch");
                    let frame = dead_man_switch_frame(self.dead_man_switch_timeout_ms);
                    let _ = self.send(frame).await;
                } else {
                    warn!("WSPrivateSession: auth failed: {:?}", value);
                }
            }
            return;
        }

        // Private channel frames: [0, <code>, <payload>]
        if let Some(arr) = value.as_array() {
            if arr.len() >= 3 {
                if let Some(code) = arr[1].as_str() {
                    if let Some(event) = PrivateEvent::from_code(code, arr[2].clone()) {
                        // Non-blocking fan-out: handlers subscribe via `subscribe()`
                        // and must not block this read loop.
                        let _ = self.events_tx.send(event);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_event_codes() {
        let te = PrivateEvent::from_code("te", serde_json::json!([1, "tBTCUSD", 0, 111, 0.1, 50000]));
        assert!(matches!(te, Some(PrivateEvent::TradeExecuted(_))));
        assert!(PrivateEvent::from_code("xx", Value::Null).is_none());
    }

    #[test]
    fn trade_event_order_id_is_fourth_element() {
        let te = PrivateEvent::from_code("te", serde_json::json!([999999, "tBTCUSD", 1700000000000i64, 111, 0.1, 50000])).unwrap();
        assert_eq!(te.order_id(), Some(111));
    }

    #[test]
    fn order_event_order_id_is_first_element() {
        let on = PrivateEvent::from_code("on", serde_json::json!([123, "tBTCUSD"])).unwrap();
        assert_eq!(on.order_id(), Some(123));
    }

    #[test]
    fn dead_man_switch_frame_carries_timeout() {
        let frame = dead_man_switch_frame(60_000);
        assert_eq!(frame["dms_timeout_ms"], 60_000);
    }
}
