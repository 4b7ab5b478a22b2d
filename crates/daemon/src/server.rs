//! Local publisher server.
//!
//! Publisher processes connect over TCP and speak a line-delimited JSON
//! protocol: quote submissions and aggregate subscriptions inbound,
//! completion callbacks and price notifications outbound. Reader and writer
//! tasks run on the event-loop thread; all state mutation stays with the
//! manager. Client removal is two-phase: marked immediately, reaped at the
//! next poll boundary so callback dispatch never invalidates live entries.

use polaris_oracle::state::{
    PTYPE_PRICE, PTYPE_TWAP, PTYPE_VOLATILITY, STATUS_AUCTION, STATUS_HALTED, STATUS_TRADING,
    STATUS_UNKNOWN,
};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{DaemonError, Result};

pub type UserId = u64;

#[derive(Debug)]
pub enum ServerEvent {
    Connected(UserId),
    Request { user: UserId, line: String },
    Closed(UserId),
}

/// Requests a publisher client may issue.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum UserRequest {
    /// Quote to publish at the next schedule opportunity.
    UpdPrice {
        symbol: String,
        price_type: String,
        price: i64,
        conf: u64,
        status: String,
    },
    /// Trigger aggregation without contributing a quote.
    AggPrice { symbol: String, price_type: String },
    /// Subscribe to aggregate updates for a price.
    SubPrice { symbol: String, price_type: String },
}

pub fn parse_request(line: &str) -> Result<UserRequest> {
    serde_json::from_str(line).map_err(|e| DaemonError::Client(e.to_string()))
}

pub fn parse_price_type(name: &str) -> Option<u32> {
    match name {
        "price" => Some(PTYPE_PRICE),
        "twap" => Some(PTYPE_TWAP),
        "volatility" => Some(PTYPE_VOLATILITY),
        _ => None,
    }
}

pub fn price_type_name(ptype: u32) -> &'static str {
    match ptype {
        PTYPE_PRICE => "price",
        PTYPE_TWAP => "twap",
        PTYPE_VOLATILITY => "volatility",
        _ => "unknown",
    }
}

pub fn parse_status(name: &str) -> Option<u32> {
    match name {
        "unknown" => Some(STATUS_UNKNOWN),
        "trading" => Some(STATUS_TRADING),
        "halted" => Some(STATUS_HALTED),
        "auction" => Some(STATUS_AUCTION),
        _ => None,
    }
}

pub fn status_name(status: u32) -> &'static str {
    match status {
        STATUS_TRADING => "trading",
        STATUS_HALTED => "halted",
        STATUS_AUCTION => "auction",
        _ => "unknown",
    }
}

/// One connected publisher client.
struct User {
    id: UserId,
    tx: mpsc::UnboundedSender<String>,
    dead: bool,
}

pub struct LocalServer {
    listener: TcpListener,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    users: Vec<User>,
    next_id: UserId,
}

impl LocalServer {
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(LocalServer {
            listener,
            events_tx,
            events_rx,
            users: Vec::new(),
            next_id: 1,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn num_users(&self) -> usize {
        self.users.iter().filter(|u| !u.dead).count()
    }

    /// Next accepted connection or client event.
    pub async fn next_event(&mut self) -> ServerEvent {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((sock, addr)) => {
                        let id = self.accept(sock);
                        info!(%addr, user = id, "publisher client connected");
                        return ServerEvent::Connected(id);
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                ev = self.events_rx.recv() => {
                    if let Some(ev) = ev {
                        return ev;
                    }
                }
            }
        }
    }

    /// Register a connection: a reader task feeds parsed lines into the
    /// event channel, a writer task drains the outbound queue.
    pub fn accept(&mut self, sock: TcpStream) -> UserId {
        let id = self.next_id;
        self.next_id += 1;
        let (read_half, mut write_half) = sock.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if events.send(ServerEvent::Request { user: id, line }).is_err() {
                    return;
                }
            }
            let _ = events.send(ServerEvent::Closed(id));
        });

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        self.users.push(User {
            id,
            tx,
            dead: false,
        });
        id
    }

    /// Queue a line to a client. Dead or departed clients drop it silently.
    pub fn send(&self, user: UserId, line: String) {
        if let Some(u) = self.users.iter().find(|u| u.id == user && !u.dead) {
            let _ = u.tx.send(line);
        }
    }

    /// Schedule a client for removal at the next poll boundary.
    pub fn del_user(&mut self, user: UserId) {
        if let Some(u) = self.users.iter_mut().find(|u| u.id == user) {
            u.dead = true;
        }
    }

    /// Remove marked clients, returning their ids so callers can scrub any
    /// state bound to them.
    pub fn reap(&mut self) -> Vec<UserId> {
        let mut gone = Vec::new();
        self.users.retain(|u| {
            if u.dead {
                gone.push(u.id);
                false
            } else {
                true
            }
        });
        gone
    }

    /// Drop every client; their writer tasks end when the queues close.
    pub fn teardown(&mut self) {
        self.users.clear();
    }
}
