//! The streaming receiver engine.
//!
//! One `StreamingService` per port pair. `start()` binds the listeners and
//! spawns the accept/poll cycle; the caller keeps its own thread of control.
//! Every blocking point inside the cycle is bounded, so `stop()` is observed
//! within a small multiple of the poll timeout. Cancellation is cooperative:
//! an in-flight read or producer callback finishes its iteration first.

use bridge_protocol::{FrameBuffer, ProtocolError};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::enrich::enrich_timestamps;
use crate::tasks::{Producer, TaskParams, TaskTable};
use crate::transport::{
    run_pubsub_listener, run_raw_listener, RawBroadcaster, PUBSUB_BUFFER_SIZE,
};

pub type FrameCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Shared fan-out path: enrich once, then callback + both transports.
struct Delivery {
    callback: RwLock<Option<FrameCallback>>,
    pubsub_tx: broadcast::Sender<Arc<str>>,
    raw: Arc<RawBroadcaster>,
}

impl Delivery {
    fn deliver(&self, mut record: Value) {
        enrich_timestamps(&mut record);
        let serialized = record.to_string();
        counter!("stream_receiver.frames_delivered").increment(1);

        let callback = self.callback.read().clone();
        if let Some(cb) = callback {
            cb(&serialized);
        }

        let mut line = Vec::with_capacity(serialized.len() + 2);
        line.extend_from_slice(serialized.as_bytes());
        line.extend_from_slice(b"\r\n");
        self.raw.broadcast(&line);

        // No pub/sub consumers connected is not an error.
        let _ = self.pubsub_tx.send(Arc::from(serialized.into_boxed_str()));
    }
}

pub struct StreamingService {
    config: ReceiverConfig,
    delivery: Arc<Delivery>,
    tasks: Arc<TaskTable>,
    running: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stream_addr: Mutex<Option<SocketAddr>>,
    fanout_addr: Mutex<Option<SocketAddr>>,
    raw_fanout_addr: Mutex<Option<SocketAddr>>,
}

impl StreamingService {
    pub fn new(config: ReceiverConfig) -> Self {
        let (pubsub_tx, _) = broadcast::channel(PUBSUB_BUFFER_SIZE);
        Self {
            config,
            delivery: Arc::new(Delivery {
                callback: RwLock::new(None),
                pubsub_tx,
                raw: Arc::new(RawBroadcaster::new()),
            }),
            tasks: Arc::new(TaskTable::new()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
            stream_addr: Mutex::new(None),
            fanout_addr: Mutex::new(None),
            raw_fanout_addr: Mutex::new(None),
        }
    }

    /// Binds the listeners and spawns the accept/poll cycle. A failed bind
    /// is reported here so the service never runs half-initialized.
    pub async fn start(&self) -> Result<(), ProtocolError> {
        if self.is_running() {
            warn!("streaming service already running");
            return Ok(());
        }

        let stream_listener = bind(&self.config.stream_addr()).await?;
        let stream_addr = stream_listener
            .local_addr()
            .map_err(ProtocolError::ConnectionLost)?;
        *self.stream_addr.lock() = Some(stream_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if self.config.fanout_enabled {
            let fanout_listener = bind(&self.config.fanout_addr()).await?;
            *self.fanout_addr.lock() = fanout_listener.local_addr().ok();
            tokio::spawn(run_pubsub_listener(
                fanout_listener,
                self.delivery.pubsub_tx.clone(),
                shutdown_rx.clone(),
            ));

            let raw_listener = bind(&self.config.raw_fanout_addr()).await?;
            *self.raw_fanout_addr.lock() = raw_listener.local_addr().ok();
            tokio::spawn(run_raw_listener(
                raw_listener,
                self.delivery.raw.clone(),
                shutdown_rx.clone(),
            ));
        }

        self.running.store(true, Ordering::Release);
        let handle = tokio::spawn(run_accept_loop(
            stream_listener,
            self.delivery.clone(),
            self.tasks.clone(),
            self.running.clone(),
            shutdown_rx,
            Duration::from_millis(self.config.poll_timeout_ms),
        ));

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.handle.lock() = Some(handle);

        info!(
            stream = %stream_addr,
            fanout = self.config.fanout_enabled,
            "streaming service listening"
        );
        Ok(())
    }

    /// Signals the cycle, joins it and closes the listeners. Idempotent and
    /// safe to call even if `start()` never ran.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.delivery.raw.clear();
        self.running.store(false, Ordering::Release);
        info!("streaming service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Replaces the consumer callback; takes effect on the next delivered
    /// frame. Frames already handed to the previous callback are not
    /// replayed.
    pub fn set_callback(&self, callback: FrameCallback) {
        *self.delivery.callback.write() = Some(callback);
    }

    pub fn subscribe(
        &self,
        request_id: &str,
        symbols: &[String],
        interval: Duration,
        producer: Producer,
        params: TaskParams,
    ) -> usize {
        let added = self
            .tasks
            .subscribe(request_id, symbols, interval, producer, params);
        gauge!("stream_receiver.stream_tasks").set(self.tasks.len() as f64);
        added
    }

    pub fn unsubscribe(&self, request_id: &str, symbols: &[String]) -> usize {
        let removed = self.tasks.unsubscribe(request_id, symbols);
        gauge!("stream_receiver.stream_tasks").set(self.tasks.len() as f64);
        removed
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn raw_subscriber_count(&self) -> usize {
        self.delivery.raw.client_count()
    }

    /// Bound addresses, available after `start()`; useful when configured
    /// with port 0.
    pub fn local_stream_addr(&self) -> Option<SocketAddr> {
        *self.stream_addr.lock()
    }

    pub fn local_fanout_addr(&self) -> Option<SocketAddr> {
        *self.fanout_addr.lock()
    }

    pub fn local_raw_fanout_addr(&self) -> Option<SocketAddr> {
        *self.raw_fanout_addr.lock()
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ProtocolError> {
    TcpListener::bind(addr).await.map_err(|e| ProtocolError::Bind {
        addr: addr.to_string(),
        source: e,
    })
}

async fn run_accept_loop(
    listener: TcpListener,
    delivery: Arc<Delivery>,
    tasks: Arc<TaskTable>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    poll_timeout: Duration,
) {
    let mut poll = tokio::time::interval(poll_timeout);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    counter!("stream_receiver.terminal_connections").increment(1);
                    tokio::spawn(read_terminal_connection(
                        stream,
                        peer,
                        delivery.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "inbound accept failed"),
            },
            _ = poll.tick() => {
                for (key, producer, params) in tasks.due() {
                    if let Some(record) = producer(&key.symbol, &params) {
                        delivery.deliver(record);
                    }
                }
            }
        }
    }

    running.store(false, Ordering::Release);
    info!("streaming receiver loop exited");
}

/// Reads framed records from one terminal connection. A parse failure closes
/// only this connection; the service keeps serving.
async fn read_terminal_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    delivery: Arc<Delivery>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%peer, "terminal stream connected");
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 8192];

    'conn: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!(%peer, "terminal stream closed");
                    break;
                }
                Ok(n) => {
                    frames.extend(&buf[..n]);
                    while let Some(frame) = frames.next_frame() {
                        let record = frame.and_then(|line| {
                            serde_json::from_str::<Value>(&line)
                                .map_err(|e| ProtocolError::ParseFailure(e.to_string()))
                        });
                        match record {
                            Ok(record) => {
                                counter!("stream_receiver.frames_received").increment(1);
                                delivery.deliver(record);
                            }
                            Err(e) => {
                                counter!("stream_receiver.parse_failures").increment(1);
                                warn!(%peer, error = %e, "unparseable frame, closing connection");
                                break 'conn;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(%peer, error = %e, "terminal stream read error");
                    break;
                }
            }
        }
    }
}
