//! The two outbound delivery transports.
//!
//! Raw broadcaster: every attached socket gets every frame as bytes; a
//! failed or clogged subscriber is removed alone, the rest keep receiving.
//! Pub/sub: a broadcast channel fans enriched JSON lines out to one
//! forwarding task per consumer connection, so a slow consumer never blocks
//! the others.

use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SUBSCRIBER_QUEUE_SIZE: usize = 1024;
pub const PUBSUB_BUFFER_SIZE: usize = 10000;

/// Control chatter a fan-out consumer may send; acknowledged in the log only,
/// every connected consumer receives the full stream.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    msg_type: String,
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Default)]
pub struct RawBroadcaster {
    clients: Arc<DashMap<Uuid, mpsc::Sender<Arc<[u8]>>>>,
}

impl RawBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Hands the connection to its own writer task and registers it.
    pub fn attach(&self, stream: TcpStream, peer: SocketAddr) -> Uuid {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel::<Arc<[u8]>>(SUBSCRIBER_QUEUE_SIZE);
        let clients = self.clients.clone();

        tokio::spawn(async move {
            let mut stream = stream;
            while let Some(frame) = rx.recv().await {
                if stream.write_all(&frame).await.is_err() {
                    break;
                }
            }
            clients.remove(&id);
            gauge!("stream_receiver.raw_subscribers").set(clients.len() as f64);
            info!(%id, %peer, "raw subscriber disconnected");
        });

        self.clients.insert(id, tx);
        gauge!("stream_receiver.raw_subscribers").set(self.clients.len() as f64);
        info!(%id, %peer, "raw subscriber connected");
        id
    }

    /// Drops every subscriber, closing their connections. Used at service
    /// shutdown.
    pub fn clear(&self) {
        self.clients.clear();
        gauge!("stream_receiver.raw_subscribers").set(0.0);
    }

    /// Queues `frame` for every subscriber. Removal on failure touches only
    /// the failing subscriber.
    pub fn broadcast(&self, frame: &[u8]) {
        if self.clients.is_empty() {
            return;
        }
        let frame: Arc<[u8]> = frame.into();
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(frame.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            if self.clients.remove(&id).is_some() {
                counter!("stream_receiver.raw_subscribers_dropped").increment(1);
                debug!(%id, "dropping unresponsive raw subscriber");
            }
        }
    }
}

/// Accepts raw subscribers until the stop signal fires.
pub async fn run_raw_listener(
    listener: TcpListener,
    broadcaster: Arc<RawBroadcaster>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    broadcaster.attach(stream, peer);
                }
                Err(e) => warn!(error = %e, "raw fan-out accept failed"),
            }
        }
    }
}

/// Accepts pub/sub consumers until the stop signal fires.
pub async fn run_pubsub_listener(
    listener: TcpListener,
    tx: broadcast::Sender<Arc<str>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_pubsub_client(
                        stream,
                        peer,
                        tx.subscribe(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "fan-out accept failed"),
            }
        }
    }
}

async fn serve_pubsub_client(
    stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<Arc<str>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let id = Uuid::new_v4();
    info!(%id, %peer, "fan-out subscriber connected");
    counter!("stream_receiver.fanout_connections").increment(1);

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if writer.write_all(frame.as_bytes()).await.is_err()
                        || writer.write_all(b"\r\n").await.is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%id, skipped, "fan-out subscriber lagging, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(text)) => handle_client_message(id, &text),
                // Consumer went away.
                Ok(None) | Err(_) => break,
            }
        }
    }

    info!(%id, %peer, "fan-out subscriber disconnected");
}

fn handle_client_message(id: Uuid, text: &str) {
    if let Ok(msg) = serde_json::from_str::<ClientMessage>(text) {
        match msg.msg_type.as_str() {
            "subscribe" => info!(%id, symbols = ?msg.symbols, "subscriber interest noted"),
            "unsubscribe" => info!(%id, "subscriber interest withdrawn"),
            other => debug!(%id, msg_type = other, "ignoring client message"),
        }
    }
}
