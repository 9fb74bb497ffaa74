//! EVM ledger over JSON-RPC WebSocket
//!
//! One socket carries both requests and subscriptions:
//! - requests are matched to responses by id through a pending table
//! - `eth_subscription` notifications are routed by subscription id
//! - a dead socket fails all pending requests, ends all subscription
//!   streams and is replaced on the next call

use crate::{
    abi,
    error::LedgerError,
    ledger::{ChainEvent, ChainEventStream, LedgerClient},
};
use agar_types::{
    ActionId, Address, GameConstants, Height, Participant, Receipt, ReceiptStatus,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{stream, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

/// Default timeout for a single JSON-RPC request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingRequest {
    reply: oneshot::Sender<Result<Value, LedgerError>>,
    /// Set for `eth_subscribe`; registered as soon as the id comes back
    notify: Option<mpsc::UnboundedSender<Value>>,
}

/// One live socket and its routing tables
struct Connection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: DashMap<u64, PendingRequest>,
    subscriptions: DashMap<String, mpsc::UnboundedSender<Value>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    async fn open(url: &str) -> Result<Arc<Self>, LedgerError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let conn = Arc::new(Self {
            outgoing,
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        // Writer task
        let writer_conn = conn.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            writer_conn.shutdown("writer closed");
        });

        // Reader task
        let reader_conn = conn.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_conn.dispatch(&text),
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        warn!("Ledger socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_conn.shutdown("socket closed");
        });

        // `shutdown` marks the connection closed before draining the task
        // list, so a socket that already died gets its tasks aborted here
        {
            let mut tasks = conn.tasks.lock();
            if conn.is_closed() {
                writer.abort();
                reader.abort();
            } else {
                tasks.extend([writer, reader]);
            }
        }
        Ok(conn)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Dropping malformed ledger frame: {}", e);
                return;
            }
        };

        if value.get("method").and_then(Value::as_str) == Some("eth_subscription") {
            let params = &value["params"];
            let Some(sub_id) = params["subscription"].as_str() else {
                return;
            };
            match self.subscriptions.get(sub_id) {
                Some(tx) => {
                    let _ = tx.send(params["result"].clone());
                }
                None => trace!("Notification for unknown subscription {}", sub_id),
            }
            return;
        }

        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            return;
        };
        let Some((_, request)) = self.pending.remove(&id) else {
            return;
        };

        let result = if let Some(error) = value.get("error") {
            Err(LedgerError::Rpc {
                code: error["code"].as_i64().unwrap_or(0),
                message: error["message"].as_str().unwrap_or("unknown").to_string(),
            })
        } else {
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            if let (Some(notify), Some(sub_id)) = (request.notify, result.as_str()) {
                self.subscriptions.insert(sub_id.to_string(), notify);
            }
            Ok(result)
        };
        let _ = request.reply.send(result);
    }

    fn shutdown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Ledger connection closed: {}", reason);
        let ids: Vec<u64> = self.pending.iter().map(|r| *r.key()).collect();
        for id in ids {
            if let Some((_, request)) = self.pending.remove(&id) {
                let _ = request.reply.send(Err(LedgerError::Transport(reason.to_string())));
            }
        }
        // Dropping the senders ends every subscription stream
        self.subscriptions.clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        notify: Option<mpsc::UnboundedSender<Value>>,
        timeout: Duration,
    ) -> Result<Value, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::Transport("connection closed".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.pending.insert(id, PendingRequest { reply, notify });

        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if self.outgoing.send(Message::Text(body.to_string())).is_err() {
            self.pending.remove(&id);
            return Err(LedgerError::Transport("connection closed".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LedgerError::Transport("connection closed".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(LedgerError::Timeout(timeout))
            }
        }
    }

    /// Detach a subscription; the server's reply is ignored
    fn unsubscribe(&self, sub_id: &str) {
        self.subscriptions.remove(sub_id);
        if self.is_closed() {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": "eth_unsubscribe", "params": [sub_id] });
        let _ = self.outgoing.send(Message::Text(body.to_string()));
    }
}

/// Unsubscribes when the owning stream is dropped
struct SubscriptionGuard {
    conn: Arc<Connection>,
    ids: Vec<String>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for id in &self.ids {
            self.conn.unsubscribe(id);
        }
        debug!("Detached {} ledger subscriptions", self.ids.len());
    }
}

struct GuardedStream {
    inner: ChainEventStream,
    _guard: SubscriptionGuard,
}

impl Stream for GuardedStream {
    type Item = Result<ChainEvent, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// `LedgerClient` backed by an EVM node's WebSocket JSON-RPC endpoint
pub struct EvmLedger {
    url: String,
    contract: Address,
    request_timeout: Duration,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl EvmLedger {
    pub fn new(url: impl Into<String>, contract: Address) -> Self {
        Self {
            url: url.into(),
            contract,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// Current socket, reconnecting if the previous one died
    async fn connection(&self) -> Result<Arc<Connection>, LedgerError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }
        info!("Connecting to ledger at {}", self.url);
        let conn = Connection::open(&self.url).await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let conn = self.connection().await?;
        conn.request(method, params, None, self.request_timeout).await
    }

    async fn call(&self, data: String) -> Result<Vec<u8>, LedgerError> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": self.contract.as_str(), "data": data }, "latest"]),
            )
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| LedgerError::Decode("eth_call result is not a string".to_string()))?;
        abi::decode_hex(raw)
    }

    async fn call_uint(&self, signature: &str) -> Result<u128, LedgerError> {
        abi::decode_uint(&self.call(abi::encode_call(signature)).await?)
    }

    async fn call_u64(&self, signature: &str) -> Result<u64, LedgerError> {
        let value = self.call_uint(signature).await?;
        u64::try_from(value).map_err(|_| LedgerError::Decode(format!("{} exceeds 64 bits", signature)))
    }
}

fn decode_head(value: Value) -> Result<ChainEvent, LedgerError> {
    let number = value["number"]
        .as_str()
        .ok_or_else(|| LedgerError::Decode("block header without number".to_string()))?;
    Ok(ChainEvent::Block(abi::parse_quantity(number)?))
}

fn decode_log_value(value: Value) -> Option<Result<ChainEvent, LedgerError>> {
    // Logs dropped by a reorg are not replayed; the next resync corrects state
    if value["removed"].as_bool() == Some(true) {
        return None;
    }
    let topics: Vec<String> = value["topics"]
        .as_array()
        .map(|t| t.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let data = value["data"].as_str().unwrap_or("0x");
    match abi::decode_log(&topics, data) {
        Ok(Some(event)) => Some(Ok(ChainEvent::Domain(event))),
        Ok(None) => None,
        Err(e) => {
            warn!("Skipping undecodable log: {}", e);
            None
        }
    }
}

#[async_trait]
impl LedgerClient for EvmLedger {
    async fn block_number(&self) -> Result<Height, LedgerError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        abi::parse_quantity(result.as_str().unwrap_or_default())
    }

    async fn game_constants(&self) -> Result<GameConstants, LedgerError> {
        let (move_fee, board_width, board_height, min_value, max_value, velocity_min, velocity_max) = tokio::try_join!(
            self.call_uint("moveFee()"),
            self.call_u64("boardWidth()"),
            self.call_u64("boardHeight()"),
            self.call_uint("minMonAmount()"),
            self.call_uint("getMaxSize()"),
            self.call_u64("velocityMin()"),
            self.call_u64("velocityMax()"),
        )?;
        Ok(GameConstants {
            move_fee,
            min_value,
            max_value,
            board_width,
            board_height,
            velocity_min,
            velocity_max,
        })
    }

    async fn participant_addresses(&self) -> Result<Vec<Address>, LedgerError> {
        abi::decode_address_array(&self.call(abi::encode_call("getAllPlayers()")).await?)
    }

    async fn participant(&self, address: &Address) -> Result<Option<Participant>, LedgerError> {
        let data = self
            .call(abi::encode_call_with_address("players(address)", address))
            .await?;
        let (value, position) = abi::decode_player(&data)?;
        if value == 0 {
            return Ok(None);
        }
        Ok(Some(Participant::new(address.clone(), value, position)))
    }

    async fn receipt(&self, action_id: &ActionId) -> Result<Option<Receipt>, LedgerError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([action_id.as_str()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let status = match result["status"].as_str() {
            Some("0x1") => ReceiptStatus::Success,
            _ => ReceiptStatus::Reverted,
        };
        let block_number = abi::parse_quantity(result["blockNumber"].as_str().unwrap_or("0x0"))?;
        Ok(Some(Receipt {
            action_id: action_id.clone(),
            status,
            block_number,
        }))
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, LedgerError> {
        let result = self
            .request("eth_getTransactionCount", json!([address.as_str(), "latest"]))
            .await?;
        abi::parse_quantity(result.as_str().unwrap_or_default())
    }

    async fn subscribe(&self) -> Result<ChainEventStream, LedgerError> {
        let conn = self.connection().await?;

        let (heads_tx, heads_rx) = mpsc::unbounded_channel();
        let heads_id = conn
            .request("eth_subscribe", json!(["newHeads"]), Some(heads_tx), self.request_timeout)
            .await?;

        let (logs_tx, logs_rx) = mpsc::unbounded_channel();
        let logs_id = match conn
            .request(
                "eth_subscribe",
                json!(["logs", { "address": self.contract.as_str() }]),
                Some(logs_tx),
                self.request_timeout,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Some(id) = heads_id.as_str() {
                    conn.unsubscribe(id);
                }
                return Err(e);
            }
        };

        let ids: Vec<String> = [heads_id, logs_id]
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        debug!("Subscribed to ledger: {:?}", ids);

        let heads = stream::unfold(heads_rx, |mut rx| async move {
            rx.recv().await.map(|v| (decode_head(v), rx))
        });
        let logs = stream::unfold(logs_rx, |mut rx| async move {
            rx.recv().await.map(|v| (v, rx))
        })
        .filter_map(|v| async move { decode_log_value(v) });

        // Ends as soon as either side ends, which happens when the socket dies
        let heads = heads.map(Some).chain(stream::once(async { None }));
        let logs = logs.map(Some).chain(stream::once(async { None }));
        let merged = stream::select(heads, logs)
            .take_while(|item| futures::future::ready(item.is_some()))
            .filter_map(|item| async move { item });

        Ok(Box::pin(GuardedStream {
            inner: Box::pin(merged),
            _guard: SubscriptionGuard { conn, ids },
        }))
    }
}
