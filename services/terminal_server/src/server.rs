//! Accept/poll loop for the terminal side.
//!
//! The server owns two listening sockets and no thread: `tick()` is invoked
//! by whatever scheduler the host environment provides and must return
//! quickly. Each call accepts at most one pending connection per socket and
//! serves at most one command exchange. Nothing here blocks unbounded; the
//! only suspension point is the bounded read of an accepted command
//! connection.

use bridge_protocol::{FrameBuffer, Message, ProtocolError};
use metrics::{counter, gauge};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::terminal::TerminalApi;

pub struct CommandServer {
    dispatcher: Dispatcher,
    command_listener: TcpListener,
    stream_listener: TcpListener,
    stream_clients: Vec<TcpStream>,
    stream_only: bool,
    read_timeout: Duration,
}

impl CommandServer {
    /// Binds both listening sockets. A failed bind is the one startup error
    /// this subsystem reports instead of swallowing.
    pub fn bind(
        config: &ServerConfig,
        terminal: Arc<dyn TerminalApi>,
    ) -> Result<Self, ProtocolError> {
        let command_listener = bind_listener(&config.command_addr())?;
        let stream_listener = bind_listener(&config.stream_addr())?;

        info!(
            command = %command_listener.local_addr().map_err(ProtocolError::ConnectionLost)?,
            stream = %stream_listener.local_addr().map_err(ProtocolError::ConnectionLost)?,
            stream_only = config.stream_only,
            "command server bound"
        );

        Ok(Self {
            dispatcher: Dispatcher::new(terminal),
            command_listener,
            stream_listener,
            stream_clients: Vec::new(),
            stream_only: config.stream_only,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    pub fn command_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.command_listener.local_addr()
    }

    pub fn stream_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream_listener.local_addr()
    }

    pub fn stream_client_count(&self) -> usize {
        self.stream_clients.len()
    }

    /// One cooperative polling cycle.
    pub fn tick(&mut self) {
        self.accept_stream_client();
        self.serve_one_command();
    }

    fn accept_stream_client(&mut self) {
        match self.stream_listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nodelay(true).ok();
                stream.set_write_timeout(Some(self.read_timeout)).ok();
                info!(%peer, "streaming subscriber connected");
                self.stream_clients.push(stream);
                gauge!("terminal_server.stream_subscribers")
                    .set(self.stream_clients.len() as f64);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "failed to accept streaming subscriber"),
        }
    }

    fn serve_one_command(&mut self) {
        let (mut stream, peer) = match self.command_listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "failed to accept command connection");
                return;
            }
        };
        counter!("terminal_server.command_connections").increment(1);

        // Accepted sockets do not inherit the listener's non-blocking mode;
        // bound reads keep the tick short either way.
        stream.set_nonblocking(false).ok();
        stream.set_read_timeout(Some(self.read_timeout)).ok();

        let reply = match read_one_frame(&mut stream, self.read_timeout) {
            Some(Ok(line)) => match Message::decode(&line) {
                Ok(request) => {
                    debug!(%peer, command = %request.command, "dispatching");
                    self.dispatcher.dispatch(&request)
                }
                Err(e) => {
                    debug!(%peer, error = %e, "malformed request");
                    counter!("terminal_server.malformed_requests").increment(1);
                    Message::error_reply()
                }
            },
            Some(Err(e)) => {
                debug!(%peer, error = %e, "unreadable request frame");
                counter!("terminal_server.malformed_requests").increment(1);
                Message::error_reply()
            }
            // Nothing arrived within the bound: a no-op for this cycle.
            None => {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        };

        if self.stream_only {
            self.push_stream(&reply);
        } else if let Err(e) = stream.write_all(&reply.encode_bytes()) {
            // ConnectionLost aborts only this exchange; the loop continues.
            debug!(%peer, error = %e, "reply send failed");
        }
        let _ = stream.shutdown(Shutdown::Both);
    }

    /// Broadcasts a message to every attached streaming subscriber. A dead
    /// subscriber is dropped; the rest keep receiving.
    pub fn push_stream(&mut self, message: &Message) {
        let bytes = message.encode_bytes();
        let before = self.stream_clients.len();
        self.stream_clients.retain_mut(|client| {
            match client.write_all(&bytes) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "dropping dead streaming subscriber");
                    false
                }
            }
        });
        let dropped = before - self.stream_clients.len();
        if dropped > 0 {
            counter!("terminal_server.stream_disconnects").increment(dropped as u64);
            gauge!("terminal_server.stream_subscribers")
                .set(self.stream_clients.len() as f64);
        }
        counter!("terminal_server.stream_frames").increment(1);
    }
}

fn bind_listener(addr: &str) -> Result<TcpListener, ProtocolError> {
    let listener = TcpListener::bind(addr).map_err(|e| ProtocolError::Bind {
        addr: addr.to_string(),
        source: e,
    })?;
    listener.set_nonblocking(true).map_err(|e| ProtocolError::Bind {
        addr: addr.to_string(),
        source: e,
    })?;
    Ok(listener)
}

/// Reads until one complete frame, the deadline, or the peer goes away.
fn read_one_frame(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Option<Result<String, ProtocolError>> {
    let deadline = Instant::now() + timeout;
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 4096];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => return None,
            Ok(n) => {
                frames.extend(&buf[..n]);
                if let Some(frame) = frames.next_frame() {
                    return Some(frame);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return None;
            }
            Err(e) => {
                debug!(error = %e, "command read error");
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}
