//! Connection management and the event loop.
//!
//! The manager owns every other component and runs them from one thread:
//! the RPC client, the account registry, the publish scheduler, the local
//! publisher server and the optional capture sink. Bootstrap is a status
//! bitmap driven from connected, through block hash, to a fully walked
//! mapping chain.

use std::mem::size_of;
use std::time::Duration;

use chrono::Utc;
use polaris_oracle::instruction::{CmdUpdPrice, CMD_AGG_PRICE, CMD_UPD_PRICE};
use polaris_oracle::state::{MapTable, Symbol, MAGIC};
use serde_json::{json, Value};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signer::Signer,
    sysvar,
    transaction::Transaction,
};
use tracing::{debug, error, info, warn};

use crate::capture::Capture;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::keys::KeyStore;
use crate::registry::{EntryKind, PendingQuote, Registry};
use crate::rpc::{self, Completion, Request, RpcClient, RpcEvent};
use crate::scheduler::Scheduler;
use crate::server::{self, LocalServer, ServerEvent, UserId, UserRequest};

// status bits
pub const STATUS_RPC_CONNECTED: u32 = 1 << 0;
pub const STATUS_HAS_BLOCK_HASH: u32 = 1 << 1;
pub const STATUS_HAS_MAPPING: u32 = 1 << 2;

const CONNECTION_BITS: u32 = STATUS_RPC_CONNECTED | STATUS_HAS_BLOCK_HASH | STATUS_HAS_MAPPING;

/// Smoothing divisor for the slot-interval estimate.
const SLOT_INT_WINDOW: i64 = 8;
/// Bounded wait for a blocking poll, microseconds.
const POLL_TIMEOUT_US: u64 = 120_000;

/// Lifecycle hooks for embedders.
pub trait ManagerSub {
    /// Connected to the validator, before bootstrap completes.
    fn on_connect(&mut self) {}
    fn on_disconnect(&mut self) {}
    /// Account bootstrap finished after a connect or reconnect.
    fn on_init(&mut self) {}
    /// A new symbol appeared in the mapping chain.
    fn on_add_symbol(&mut self, _symbol: &Symbol, _price_key: &Pubkey) {}
}

enum LoopEvent {
    Rpc(RpcEvent),
    Server(ServerEvent),
    Tick,
}

pub struct Manager {
    cfg: DaemonConfig,
    keys: KeyStore,
    rpc: RpcClient,
    registry: Registry,
    sched: Scheduler,
    server: LocalServer,
    capture: Option<Capture>,
    sub: Option<Box<dyn ManagerSub>>,

    status: u32,
    /// In-flight bootstrap fetches (mapping tables and initial prices).
    num_sub: u32,
    /// The mapping chain walk reached the tail.
    map_done: bool,
    block_hash: Option<Hash>,

    // slot clock
    slot: u64,
    slot_ts: i64,
    slot_int: i64,
    slot_min: i64,
    slot_cnt: u64,
    first_ack: bool,

    /// Last reconnect attempt; attempts are paced by `ctimeout`.
    cts: i64,
    ctimeout: i64,
}

impl Manager {
    /// Build the daemon: load keys, bind the local server, open the capture
    /// sink. Only configuration faults abort here.
    pub async fn init(cfg: DaemonConfig) -> Result<Self> {
        let keys = KeyStore::load(&cfg.key_dir)?;
        let server = LocalServer::bind(cfg.listen_port).await?;
        let capture = match (&cfg.capture.enabled, &cfg.capture.file) {
            (true, Some(path)) => Some(Capture::create(path)?),
            (true, None) => {
                return Err(DaemonError::Config("capture enabled without a file".into()))
            }
            _ => None,
        };
        let rpc = RpcClient::new(cfg.http_url(), cfg.ws_url());
        info!(
            rpc = %cfg.http_url(),
            listen = server.local_port(),
            publisher = %keys.publish.pubkey(),
            "daemon initialized"
        );
        let slot_min = cfg.slot_min_us;
        let ctimeout = cfg.conn_timeout_us;
        Ok(Manager {
            cfg,
            keys,
            rpc,
            registry: Registry::new(),
            sched: Scheduler::new(),
            server,
            capture,
            sub: None,
            status: 0,
            num_sub: 0,
            map_done: false,
            block_hash: None,
            slot: 0,
            slot_ts: 0,
            slot_int: 0,
            slot_min,
            slot_cnt: 0,
            first_ack: true,
            cts: 0,
            ctimeout,
        })
    }

    pub fn set_manager_sub(&mut self, sub: Box<dyn ManagerSub>) {
        self.sub = Some(sub);
    }

    pub fn has_status(&self, bits: u32) -> bool {
        self.status & bits == bits
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn get_slot(&self) -> u64 {
        self.slot
    }

    /// Wall time at the start of the current slot, microseconds.
    pub fn get_slot_time(&self) -> i64 {
        self.slot_ts
    }

    /// Estimated inter-slot interval, microseconds.
    pub fn get_slot_interval(&self) -> i64 {
        self.slot_int.max(self.slot_min)
    }

    /// Slot notifications observed since startup.
    pub fn get_slot_count(&self) -> u64 {
        self.slot_cnt
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn listen_port(&self) -> u16 {
        self.server.local_port()
    }

    /// Drive the loop until the account bootstrap completes.
    pub async fn bootstrap(&mut self) {
        while !self.has_status(STATUS_HAS_MAPPING) {
            self.poll(true).await;
        }
    }

    /// One turn of the event loop: housekeeping, then at most one event.
    /// `wait` bounds the idle timeout; `poll(false)` returns immediately.
    pub async fn poll(&mut self, wait: bool) {
        self.housekeeping().await;

        let timeout = if wait {
            Duration::from_micros(POLL_TIMEOUT_US)
        } else {
            Duration::ZERO
        };
        let event = tokio::select! {
            ev = self.rpc.next_event(), if self.rpc.active() => LoopEvent::Rpc(ev),
            sev = self.server.next_event() => LoopEvent::Server(sev),
            _ = tokio::time::sleep(timeout) => LoopEvent::Tick,
        };
        match event {
            LoopEvent::Rpc(ev) => self.on_rpc_event(ev).await,
            LoopEvent::Server(sev) => self.on_server_event(sev),
            LoopEvent::Tick => {}
        }

        // poll-boundary reap of departed clients
        for user in self.server.reap() {
            self.registry.forget_user(user);
        }
    }

    /// Schedule a client for termination at the next poll boundary.
    pub fn del_user(&mut self, user: UserId) {
        self.server.del_user(user);
    }

    pub fn teardown(&mut self) {
        info!("tearing down");
        for request in self.rpc.disconnect() {
            self.fail_request(request, "shutting down");
        }
        self.server.teardown();
        if let Some(cap) = self.capture.take() {
            if let Err(e) = cap.finish() {
                warn!(error = %e, "capture close failed");
            }
        }
        self.status = 0;
    }

    fn set_status(&mut self, bits: u32) {
        self.status |= bits;
    }

    fn reset_status(&mut self, bits: u32) {
        self.status &= !bits;
    }

    /// Time-driven work: reconnect pacing.
    async fn housekeeping(&mut self) {
        if self.rpc.is_connected() {
            return;
        }
        let now = Utc::now().timestamp_micros();
        if now - self.cts < self.ctimeout {
            return;
        }
        self.cts = now;
        match self.rpc.connect().await {
            Ok(()) => self.on_rpc_connect().await,
            Err(e) => warn!(error = %e, "rpc connect failed"),
        }
    }

    /// Fresh session: subscribe slots, refresh the block hash, and walk the
    /// mapping chain from the root. Registry contents survive reconnects;
    /// only subscriptions and status bits are rebuilt.
    async fn on_rpc_connect(&mut self) {
        info!("rpc session established");
        self.set_status(STATUS_RPC_CONNECTED);
        self.first_ack = true;
        if let Some(sub) = self.sub.as_mut() {
            sub.on_connect();
        }

        if let Err(e) = self.rpc.subscribe_slot().await {
            self.drop_rpc(e.to_string());
            return;
        }
        self.rpc.submit(Request::GetBlockHash);

        self.map_done = false;
        self.num_sub = 0;
        let root = self.keys.mapping;
        self.registry.add_mapping(root);
        if let Err(e) = self.rpc.subscribe_account(&root).await {
            self.drop_rpc(e.to_string());
            return;
        }
        self.num_sub += 1;
        self.rpc.submit(Request::GetMapping { key: root });

        // Re-arm subscriptions and refresh data for already-known prices.
        for idx in 0..self.registry.num_prices() {
            let key = self.registry.price(idx).key;
            if let Err(e) = self.rpc.subscribe_account(&key).await {
                self.drop_rpc(e.to_string());
                return;
            }
            self.num_sub += 1;
            self.rpc.submit(Request::GetPrice { key });
        }
    }

    /// Session loss: cancel every in-flight request with a disconnect
    /// error, revert the connection status bits, keep bootstrap state.
    fn drop_rpc(&mut self, reason: String) {
        warn!(%reason, "rpc disconnected");
        let cancelled = self.rpc.disconnect();
        self.reset_status(CONNECTION_BITS);
        self.block_hash = None;
        self.num_sub = 0;
        self.map_done = false;
        for request in cancelled {
            self.fail_request(request, "disconnected");
        }
        if let Some(sub) = self.sub.as_mut() {
            sub.on_disconnect();
        }
    }

    fn fail_request(&mut self, request: Request, reason: &str) {
        if let Request::SendTransaction {
            origin: Some(user), ..
        } = request
        {
            self.server
                .send(user, json!({ "method": "on_upd_price", "error": reason }).to_string());
        }
    }

    async fn on_rpc_event(&mut self, event: RpcEvent) {
        match event {
            RpcEvent::Completion(c) => self.on_completion(c).await,
            RpcEvent::Slot(slot) => self.on_slot(slot),
            RpcEvent::Account { key, data, slot } => self.on_account(key, &data, slot).await,
            RpcEvent::Subscribed(kind) => debug!(?kind, "subscription live"),
            RpcEvent::Disconnected(reason) => self.drop_rpc(reason),
            RpcEvent::Noop => {}
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        match completion.request {
            Request::GetBlockHash => {
                match completion.result.and_then(|v| rpc::parse_blockhash(&v)) {
                    Ok(hash) => {
                        self.block_hash = Some(hash);
                        self.set_status(STATUS_HAS_BLOCK_HASH);
                    }
                    Err(e) => warn!(error = %e, "block hash request failed"),
                }
            }
            Request::GetMapping { key } => {
                self.num_sub = self.num_sub.saturating_sub(1);
                self.on_mapping_fetched(key, completion.result).await;
                self.check_init();
            }
            Request::GetPrice { key } => {
                self.num_sub = self.num_sub.saturating_sub(1);
                match completion.result.and_then(|v| rpc::parse_account_data(&v)) {
                    Ok(data) => self.ingest_account(key, &data).await,
                    Err(e) => warn!(%key, error = %e, "price fetch failed"),
                }
                self.check_init();
            }
            Request::SendTransaction { origin, .. } => {
                self.on_tx_result(origin, completion.result)
            }
        }
    }

    /// One step of the fetch-driven mapping walk.
    async fn on_mapping_fetched(&mut self, key: Pubkey, result: Result<Value>) {
        let data = match result.and_then(|v| rpc::parse_account_data(&v)) {
            Ok(data) => data,
            Err(e) => {
                warn!(%key, error = %e, "mapping fetch failed");
                self.map_done = true;
                return;
            }
        };
        self.write_capture(&key, &data);
        let table = match parse_map_table(&data) {
            Ok(t) => t,
            Err(e) => {
                warn!(%key, error = %e, "mapping table rejected");
                self.map_done = true;
                return;
            }
        };
        self.absorb_symbols(&table).await;
        if table.next.is_zero() {
            self.map_done = true;
        } else {
            let next = table.next.to_pubkey();
            if self.registry.add_mapping(next) {
                if let Err(e) = self.rpc.subscribe_account(&next).await {
                    self.drop_rpc(e.to_string());
                    return;
                }
            }
            self.num_sub += 1;
            self.rpc.submit(Request::GetMapping { key: next });
        }
    }

    async fn absorb_symbols(&mut self, table: &MapTable) {
        for node in &table.nodes[..table.num as usize] {
            self.add_symbol(node.sym, node.price_acc.to_pubkey()).await;
        }
    }

    async fn add_symbol(&mut self, symbol: Symbol, price_key: Pubkey) {
        let (product, fresh) = self.registry.add_product(symbol);
        if fresh {
            debug!(symbol = %symbol_text(&symbol), "symbol discovered");
            if let Some(sub) = self.sub.as_mut() {
                sub.on_add_symbol(&symbol, &price_key);
            }
        }
        self.add_price(price_key, product).await;
    }

    /// Register a price account: schedule it, subscribe, and fetch its
    /// initial state.
    async fn add_price(&mut self, key: Pubkey, product: usize) {
        let Some(idx) = self.registry.add_price(key, product) else {
            return;
        };
        self.sched.add(idx);
        if self.rpc.is_connected() {
            if let Err(e) = self.rpc.subscribe_account(&key).await {
                self.drop_rpc(e.to_string());
                return;
            }
        }
        self.num_sub += 1;
        self.rpc.submit(Request::GetPrice { key });
    }

    /// All mapping fetches returned and no bootstrap fetch is in flight.
    fn check_init(&mut self) {
        if self.map_done && self.num_sub == 0 && !self.has_status(STATUS_HAS_MAPPING) {
            self.set_status(STATUS_HAS_MAPPING);
            info!(
                products = self.registry.num_products(),
                prices = self.registry.num_prices(),
                "account bootstrap complete"
            );
            if let Some(sub) = self.sub.as_mut() {
                sub.on_init();
            }
        }
    }

    /// Slot subscription callback: advance the slot clock and hand every
    /// schedule entry its publish opportunity.
    fn on_slot(&mut self, slot: u64) {
        // out-of-order and duplicate slots are ignored
        if slot <= self.slot {
            return;
        }
        let now = Utc::now().timestamp_micros();
        if self.first_ack {
            // First ack after (re)connect seeds the clock without skewing
            // the interval estimate.
            self.first_ack = false;
        } else if self.slot_ts > 0 {
            let delta = now - self.slot_ts;
            let est = if self.slot_int > 0 {
                self.slot_int + (delta - self.slot_int) / SLOT_INT_WINDOW
            } else {
                delta
            };
            self.slot_int = est.max(self.slot_min);
        }
        self.slot = slot;
        self.slot_ts = now;
        self.slot_cnt += 1;

        // keep the signing hash fresh
        if self.rpc.is_connected() {
            self.rpc.submit(Request::GetBlockHash);
        }

        if self.has_status(STATUS_HAS_MAPPING) && self.block_hash.is_some() {
            for idx in self.sched.on_slot() {
                self.publish(idx);
            }
        }
    }

    /// Submit the pending quote for one schedule entry, if any.
    fn publish(&mut self, idx: usize) {
        let Some(hash) = self.block_hash else {
            return;
        };
        let publish_key = self.keys.publish.pubkey();
        let entry = self.registry.price_mut(idx);
        if !entry.present {
            return;
        }
        let Some(quote) = entry.pending.take() else {
            return;
        };
        let cmd = CmdUpdPrice {
            ver: self.cfg.version,
            cmd: if quote.aggregate_only {
                CMD_AGG_PRICE
            } else {
                CMD_UPD_PRICE
            },
            sym: entry.account.sym,
            ptype: entry.account.ptype,
            status: quote.status,
            price: quote.price,
            conf: quote.conf,
        };
        let instruction = Instruction {
            program_id: self.keys.program,
            accounts: vec![
                AccountMeta::new(publish_key, true),
                AccountMeta::new(entry.key, false),
                AccountMeta::new_readonly(sysvar::clock::id(), false),
            ],
            data: bytemuck::bytes_of(&cmd).to_vec(),
        };
        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&publish_key),
            &[&self.keys.publish],
            hash,
        );
        match rpc::encode_transaction(&tx) {
            Ok(encoded) => {
                self.rpc.submit(Request::SendTransaction {
                    tx: encoded,
                    origin: quote.origin,
                });
            }
            Err(e) => error!(error = %e, "transaction encoding failed"),
        }
    }

    fn on_tx_result(&mut self, origin: Option<UserId>, result: Result<Value>) {
        match result {
            Ok(signature) => {
                debug!(%signature, "quote submitted");
                if let Some(user) = origin {
                    self.server.send(
                        user,
                        json!({ "method": "on_upd_price", "result": signature }).to_string(),
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "quote submission failed");
                if let Some(user) = origin {
                    self.server.send(
                        user,
                        json!({ "method": "on_upd_price", "error": e.to_string() }).to_string(),
                    );
                }
            }
        }
    }

    /// Subscription update or initial fetch for a registered account.
    async fn on_account(&mut self, key: Pubkey, data: &[u8], _slot: u64) {
        self.ingest_account(key, data).await;
    }

    async fn ingest_account(&mut self, key: Pubkey, data: &[u8]) {
        match self.registry.lookup(&key) {
            Some(EntryKind::Price(_)) => {
                match self.registry.update_price(&key, data, self.cfg.version) {
                    Ok((idx, chained)) => {
                        self.write_capture(&key, data);
                        self.notify_subscribers(idx);
                        if let Some(next) = chained {
                            let product = self.registry.price(idx).product;
                            self.add_price(next, product).await;
                        }
                    }
                    Err(e) => warn!(%key, error = %e, "price update rejected"),
                }
            }
            Some(EntryKind::Mapping) => {
                self.write_capture(&key, data);
                match parse_map_table(data) {
                    // A mapping update may carry new symbols or a new tail.
                    Ok(table) => self.absorb_mapping_update(&table).await,
                    Err(e) => warn!(%key, error = %e, "mapping update rejected"),
                }
            }
            None => debug!(%key, "update for unknown account"),
        }
    }

    async fn absorb_mapping_update(&mut self, table: &MapTable) {
        self.absorb_symbols(table).await;
        if !table.next.is_zero() {
            let next = table.next.to_pubkey();
            if self.registry.add_mapping(next) {
                if let Err(e) = self.rpc.subscribe_account(&next).await {
                    self.drop_rpc(e.to_string());
                    return;
                }
                self.num_sub += 1;
                self.rpc.submit(Request::GetMapping { key: next });
            }
        }
    }

    fn notify_subscribers(&mut self, idx: usize) {
        let entry = self.registry.price(idx);
        if entry.subscribers.is_empty() {
            return;
        }
        let product = self.registry.product(entry.product);
        let line = json!({
            "method": "on_price",
            "params": {
                "symbol": symbol_text(&product.symbol),
                "price_type": server::price_type_name(entry.account.ptype),
                "price": entry.account.agg.price,
                "conf": entry.account.agg.conf,
                "status": server::status_name(entry.account.agg.status),
                "expo": entry.account.expo,
                "valid_slot": entry.account.valid_slot,
                "pub_slot": entry.account.agg.pub_slot,
            }
        })
        .to_string();
        for &user in &entry.subscribers {
            self.server.send(user, line.clone());
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(_) => {}
            ServerEvent::Request { user, line } => self.on_user_request(user, &line),
            ServerEvent::Closed(user) => self.del_user(user),
        }
    }

    fn on_user_request(&mut self, user: UserId, line: &str) {
        let outcome = server::parse_request(line)
            .and_then(|request| self.apply_user_request(user, request));
        if let Err(e) = outcome {
            debug!(user, error = %e, "client request rejected");
            self.server
                .send(user, json!({ "method": "error", "error": e.to_string() }).to_string());
        }
    }

    fn apply_user_request(&mut self, user: UserId, request: UserRequest) -> Result<()> {
        match request {
            UserRequest::UpdPrice {
                symbol,
                price_type,
                price,
                conf,
                status,
            } => {
                let idx = self.resolve_price(&symbol, &price_type)?;
                let status = server::parse_status(&status)
                    .ok_or_else(|| DaemonError::Client(format!("unknown status {status}")))?;
                self.registry.price_mut(idx).pending = Some(PendingQuote {
                    price,
                    conf,
                    status,
                    aggregate_only: false,
                    origin: Some(user),
                });
                Ok(())
            }
            UserRequest::AggPrice { symbol, price_type } => {
                let idx = self.resolve_price(&symbol, &price_type)?;
                self.registry.price_mut(idx).pending = Some(PendingQuote {
                    price: 0,
                    conf: 0,
                    status: 0,
                    aggregate_only: true,
                    origin: Some(user),
                });
                Ok(())
            }
            UserRequest::SubPrice { symbol, price_type } => {
                let idx = self.resolve_price(&symbol, &price_type)?;
                let subscribers = &mut self.registry.price_mut(idx).subscribers;
                if !subscribers.contains(&user) {
                    subscribers.push(user);
                }
                self.notify_subscribers(idx);
                Ok(())
            }
        }
    }

    fn resolve_price(&self, symbol: &str, price_type: &str) -> Result<usize> {
        let ptype = server::parse_price_type(price_type)
            .ok_or_else(|| DaemonError::Client(format!("unknown price type {price_type}")))?;
        let sym = Symbol::from_str(symbol);
        self.registry
            .find_price(&sym, ptype)
            .ok_or_else(|| DaemonError::Client(format!("unknown symbol {symbol}")))
    }

    fn write_capture(&mut self, key: &Pubkey, data: &[u8]) {
        if let Some(cap) = self.capture.as_mut() {
            if let Err(e) = cap.write(Utc::now().timestamp_micros(), key, data) {
                warn!(error = %e, "capture write failed");
            }
        }
    }
}

fn parse_map_table(data: &[u8]) -> Result<MapTable> {
    if data.len() < size_of::<MapTable>() {
        return Err(DaemonError::Account(format!(
            "mapping table truncated to {} bytes",
            data.len()
        )));
    }
    let table: MapTable = bytemuck::pod_read_unaligned(&data[..size_of::<MapTable>()]);
    if table.magic != MAGIC {
        return Err(DaemonError::Account("mapping table not initialized".into()));
    }
    Ok(table)
}

/// Symbol bytes as display text, stopping at the padding.
pub fn symbol_text(symbol: &Symbol) -> String {
    let bytes = symbol.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
