//! JSON-RPC client against the validator.
//!
//! One HTTP session carries one-shot queries; completions are delivered in
//! submission order through an ordered future queue keyed by a monotonic
//! request id. One websocket session carries slot and account
//! subscriptions. Encoding of transactions and account data follows the
//! validator conventions (bincode + base64).

use std::collections::{HashMap, VecDeque};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::LocalBoxFuture;
use futures::stream::FuturesOrdered;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::{json, Value};
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::Transaction};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::error::{DaemonError, Result};

pub type RequestId = u64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsResult = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>;
type HttpOutcome = (RequestId, Result<Value>);

/// One outstanding RPC operation. Response routing consults the variant.
#[derive(Debug, Clone)]
pub enum Request {
    /// Mapping-table fetch while walking the chain.
    GetMapping { key: Pubkey },
    /// Initial price-account fetch after discovery.
    GetPrice { key: Pubkey },
    /// Recent block hash for transaction signing.
    GetBlockHash,
    /// Pre-encoded signed transaction; `origin` is the local client awaiting
    /// the completion, if any.
    SendTransaction { tx: String, origin: Option<u64> },
}

struct Pending {
    id: RequestId,
    request: Request,
}

#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub request: Request,
    pub result: Result<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    Slot,
    Account(Pubkey),
}

#[derive(Debug)]
pub enum RpcEvent {
    /// An HTTP request finished, in submission order.
    Completion(Completion),
    /// The slot subscription advanced.
    Slot(u64),
    /// A subscribed account changed.
    Account { key: Pubkey, data: Vec<u8>, slot: u64 },
    /// A subscription was acknowledged by the validator.
    Subscribed(SubKind),
    /// The websocket dropped; the caller fails all in-flight requests.
    Disconnected(String),
    /// Frame with no action attached.
    Noop,
}

pub struct RpcClient {
    http: reqwest::Client,
    http_url: String,
    ws_url: String,
    ws: Option<WsStream>,
    next_id: RequestId,
    pending: VecDeque<Pending>,
    inflight: FuturesOrdered<LocalBoxFuture<'static, HttpOutcome>>,
    /// Subscription requests awaiting their ack, by request id.
    sub_acks: HashMap<RequestId, SubKind>,
    /// Acknowledged subscriptions, by server subscription id.
    subs: HashMap<u64, SubKind>,
}

impl RpcClient {
    pub fn new(http_url: String, ws_url: String) -> Self {
        RpcClient {
            http: reqwest::Client::new(),
            http_url,
            ws_url,
            ws: None,
            next_id: 1,
            pending: VecDeque::new(),
            inflight: FuturesOrdered::new(),
            sub_acks: HashMap::new(),
            subs: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    pub fn has_inflight(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn active(&self) -> bool {
        self.is_connected() || self.has_inflight()
    }

    pub async fn connect(&mut self) -> Result<()> {
        let (ws, _) = connect_async(self.ws_url.as_str()).await?;
        self.ws = Some(ws);
        Ok(())
    }

    /// Drop the session and empty the pending queue, returning the cancelled
    /// requests so the caller can complete them with a disconnect error.
    pub fn disconnect(&mut self) -> Vec<Request> {
        self.ws = None;
        self.subs.clear();
        self.sub_acks.clear();
        self.inflight = FuturesOrdered::new();
        self.pending.drain(..).map(|p| p.request).collect()
    }

    /// Queue a one-shot request on the HTTP session.
    pub fn submit(&mut self, request: Request) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        let body = encode_request(id, &request);
        let client = self.http.clone();
        let url = self.http_url.clone();
        self.inflight
            .push_back(async move { (id, post(client, url, body).await) }.boxed_local());
        self.pending.push_back(Pending { id, request });
        id
    }

    pub async fn subscribe_slot(&mut self) -> Result<RequestId> {
        self.send_sub(SubKind::Slot, "slotSubscribe", json!([])).await
    }

    pub async fn subscribe_account(&mut self, key: &Pubkey) -> Result<RequestId> {
        let params = json!([
            key.to_string(),
            { "encoding": "base64", "commitment": "confirmed" }
        ]);
        self.send_sub(SubKind::Account(*key), "accountSubscribe", params)
            .await
    }

    async fn send_sub(&mut self, kind: SubKind, method: &str, params: Value) -> Result<RequestId> {
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| DaemonError::Transport("not connected".into()))?;
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        ws.send(Message::Text(frame.to_string())).await?;
        self.sub_acks.insert(id, kind);
        Ok(id)
    }

    /// Wait for the next completion or websocket frame. Pends forever when
    /// the client is idle, so it composes under an outer `select!`.
    pub async fn next_event(&mut self) -> RpcEvent {
        enum Raw {
            Http(Option<HttpOutcome>),
            Ws(Option<WsResult>),
        }

        let has_http = !self.pending.is_empty();
        let has_ws = self.ws.is_some();
        if !has_http && !has_ws {
            return futures::future::pending().await;
        }

        let raw = tokio::select! {
            out = self.inflight.next(), if has_http => Raw::Http(out),
            msg = next_ws(&mut self.ws), if has_ws => Raw::Ws(msg),
        };

        match raw {
            Raw::Http(Some((id, result))) => {
                let Some(head) = self.pending.pop_front() else {
                    return RpcEvent::Noop;
                };
                if head.id != id {
                    warn!(expected = head.id, got = id, "response order skew");
                }
                RpcEvent::Completion(Completion {
                    id: head.id,
                    request: head.request,
                    result,
                })
            }
            Raw::Http(None) => RpcEvent::Noop,
            Raw::Ws(Some(Ok(msg))) => self.on_ws_message(msg).await,
            Raw::Ws(Some(Err(e))) => RpcEvent::Disconnected(e.to_string()),
            Raw::Ws(None) => RpcEvent::Disconnected("websocket closed".into()),
        }
    }

    async fn on_ws_message(&mut self, msg: Message) -> RpcEvent {
        match msg {
            Message::Text(text) => self.on_ws_text(&text),
            Message::Ping(payload) => {
                if let Some(ws) = self.ws.as_mut() {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        return RpcEvent::Disconnected(e.to_string());
                    }
                }
                RpcEvent::Noop
            }
            Message::Close(_) => RpcEvent::Disconnected("websocket closed".into()),
            _ => RpcEvent::Noop,
        }
    }

    fn on_ws_text(&mut self, text: &str) -> RpcEvent {
        let v: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable rpc frame");
                return RpcEvent::Noop;
            }
        };
        match v.get("method").and_then(Value::as_str) {
            Some("slotNotification") => match v.pointer("/params/result/slot").and_then(Value::as_u64)
            {
                Some(slot) => RpcEvent::Slot(slot),
                None => RpcEvent::Noop,
            },
            Some("accountNotification") => self.on_account_notification(&v),
            Some(_) => RpcEvent::Noop,
            None => self.on_ws_reply(&v),
        }
    }

    fn on_account_notification(&self, v: &Value) -> RpcEvent {
        let sub = v.pointer("/params/subscription").and_then(Value::as_u64);
        let Some(SubKind::Account(key)) = sub.and_then(|s| self.subs.get(&s)).copied() else {
            return RpcEvent::Noop;
        };
        let slot = v
            .pointer("/params/result/context/slot")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let Some(b64) = v
            .pointer("/params/result/value/data/0")
            .and_then(Value::as_str)
        else {
            warn!(%key, "account notification without data");
            return RpcEvent::Noop;
        };
        match BASE64.decode(b64) {
            Ok(data) => RpcEvent::Account { key, data, slot },
            Err(e) => {
                warn!(%key, error = %e, "undecodable account data");
                RpcEvent::Noop
            }
        }
    }

    /// Subscription acks and websocket-side errors.
    fn on_ws_reply(&mut self, v: &Value) -> RpcEvent {
        if let (Some(id), Some(result)) = (v.get("id").and_then(Value::as_u64), v.get("result")) {
            if let Some(kind) = self.sub_acks.remove(&id) {
                if let Some(sub_id) = result.as_u64() {
                    self.subs.insert(sub_id, kind);
                    return RpcEvent::Subscribed(kind);
                }
            }
        }
        if let Some(err) = v.get("error") {
            warn!(%err, "rpc subscription error");
        }
        RpcEvent::Noop
    }
}

async fn next_ws(ws: &mut Option<WsStream>) -> Option<WsResult> {
    match ws {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

async fn post(client: reqwest::Client, url: String, body: Value) -> Result<Value> {
    let resp = client.post(&url).json(&body).send().await?;
    let v: Value = resp.json().await?;
    if let Some(err) = v.get("error") {
        return Err(DaemonError::Account(err.to_string()));
    }
    v.get("result")
        .cloned()
        .ok_or_else(|| DaemonError::Protocol("response without result".into()))
}

fn encode_request(id: RequestId, request: &Request) -> Value {
    let (method, params) = match request {
        Request::GetMapping { key } | Request::GetPrice { key } => (
            "getAccountInfo",
            json!([
                key.to_string(),
                { "encoding": "base64", "commitment": "confirmed" }
            ]),
        ),
        Request::GetBlockHash => ("getLatestBlockhash", json!([{ "commitment": "confirmed" }])),
        Request::SendTransaction { tx, .. } => (
            "sendTransaction",
            json!([tx, { "encoding": "base64" }]),
        ),
    };
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Serialize and base64-encode a signed transaction for `sendTransaction`.
pub fn encode_transaction(tx: &Transaction) -> Result<String> {
    let bytes = bincode::serialize(tx).map_err(|e| DaemonError::Protocol(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

/// Extract the block hash from a `getLatestBlockhash` result.
pub fn parse_blockhash(value: &Value) -> Result<Hash> {
    value
        .pointer("/value/blockhash")
        .and_then(Value::as_str)
        .ok_or_else(|| DaemonError::Protocol("response without blockhash".into()))?
        .parse()
        .map_err(|e| DaemonError::Protocol(format!("blockhash: {e}")))
}

/// Extract raw account bytes from a `getAccountInfo` result.
pub fn parse_account_data(value: &Value) -> Result<Vec<u8>> {
    let account = value
        .get("value")
        .filter(|v| !v.is_null())
        .ok_or_else(|| DaemonError::Account("account not found".into()))?;
    let b64 = account
        .pointer("/data/0")
        .and_then(Value::as_str)
        .ok_or_else(|| DaemonError::Protocol("account without data".into()))?;
    BASE64
        .decode(b64)
        .map_err(|e| DaemonError::Protocol(format!("account data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RpcClient {
        RpcClient::new(
            "http://127.0.0.1:8899".into(),
            "ws://127.0.0.1:8900".into(),
        )
    }

    #[test]
    fn parses_slot_notification() {
        let mut c = client();
        let ev = c.on_ws_text(
            r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"result":{"parent":4,"root":3,"slot":5},"subscription":1}}"#,
        );
        assert!(matches!(ev, RpcEvent::Slot(5)));
    }

    #[test]
    fn routes_account_notification_through_subscription() {
        let mut c = client();
        let key = Pubkey::new_unique();
        c.subs.insert(7, SubKind::Account(key));
        let payload = BASE64.encode([1u8, 2, 3]);
        let frame = format!(
            r#"{{"jsonrpc":"2.0","method":"accountNotification","params":{{"result":{{"context":{{"slot":42}},"value":{{"data":["{payload}","base64"],"lamports":1}}}},"subscription":7}}}}"#
        );
        match c.on_ws_text(&frame) {
            RpcEvent::Account { key: k, data, slot } => {
                assert_eq!(k, key);
                assert_eq!(data, vec![1, 2, 3]);
                assert_eq!(slot, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_subscription_is_ignored() {
        let mut c = client();
        let ev = c.on_ws_text(
            r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"value":{"data":["AQID","base64"]}},"subscription":9}}"#,
        );
        assert!(matches!(ev, RpcEvent::Noop));
    }

    #[test]
    fn acks_bind_server_subscription_ids() {
        let mut c = client();
        c.sub_acks.insert(3, SubKind::Slot);
        let ev = c.on_ws_text(r#"{"jsonrpc":"2.0","result":17,"id":3}"#);
        assert!(matches!(ev, RpcEvent::Subscribed(SubKind::Slot)));
        assert_eq!(c.subs.get(&17), Some(&SubKind::Slot));
    }

    #[test]
    fn disconnect_cancels_every_pending_request() {
        let mut c = client();
        c.pending.push_back(Pending {
            id: 1,
            request: Request::GetBlockHash,
        });
        c.pending.push_back(Pending {
            id: 2,
            request: Request::GetMapping {
                key: Pubkey::new_unique(),
            },
        });
        c.subs.insert(4, SubKind::Slot);

        let cancelled = c.disconnect();
        assert_eq!(cancelled.len(), 2);
        assert!(c.pending.is_empty());
        assert!(c.subs.is_empty());
        assert!(!c.active());
    }

    #[test]
    fn request_ids_are_monotonic() {
        let mut c = client();
        let a = c.submit(Request::GetBlockHash);
        let b = c.submit(Request::GetBlockHash);
        assert!(b > a);
        assert_eq!(c.pending.len(), 2);
    }

    #[test]
    fn encodes_get_account_info() {
        let key = Pubkey::new_unique();
        let body = encode_request(5, &Request::GetMapping { key });
        assert_eq!(body["method"], "getAccountInfo");
        assert_eq!(body["id"], 5);
        assert_eq!(body["params"][0], key.to_string());
        assert_eq!(body["params"][1]["encoding"], "base64");
    }

    #[test]
    fn parses_blockhash_result() {
        let hash = parse_blockhash(&serde_json::json!({
            "context": { "slot": 1 },
            "value": { "blockhash": Hash::new_unique().to_string(), "lastValidBlockHeight": 10 }
        }))
        .unwrap();
        assert_ne!(hash, Hash::default());
    }

    #[test]
    fn missing_account_is_an_account_error() {
        let err = parse_account_data(&serde_json::json!({ "context": {}, "value": null }))
            .unwrap_err();
        assert!(matches!(err, DaemonError::Account(_)));
    }

    #[test]
    fn parses_account_result_data() {
        let payload = BASE64.encode([9u8; 16]);
        let data = parse_account_data(&serde_json::json!({
            "context": { "slot": 3 },
            "value": { "data": [payload, "base64"], "lamports": 1, "owner": "11111111111111111111111111111111" }
        }))
        .unwrap();
        assert_eq!(data, vec![9u8; 16]);
    }
}
