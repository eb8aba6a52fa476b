use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use terminal_server::{CommandServer, ServerConfig, SimTerminal};

struct RunningServer {
    command_addr: SocketAddr,
    stream_addr: SocketAddr,
    stop: Arc<AtomicBool>,
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Binds on ephemeral ports and drives `tick()` from a plain thread timer,
/// standing in for the terminal's charting runtime.
fn spawn_server(stream_only: bool) -> RunningServer {
    let config = ServerConfig {
        command_port: 0,
        stream_port: 0,
        stream_only,
        ..ServerConfig::default()
    };
    let mut server = CommandServer::bind(&config, Arc::new(SimTerminal::new())).unwrap();
    let command_addr = server.command_addr().unwrap();
    let stream_addr = server.stream_addr().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let ticker_stop = stop.clone();
    thread::spawn(move || {
        while !ticker_stop.load(Ordering::Relaxed) {
            server.tick();
            thread::sleep(Duration::from_millis(2));
        }
    });

    RunningServer {
        command_addr,
        stream_addr,
        stop,
    }
}

/// One command exchange: connect, send, read until the server closes.
fn exchange(addr: SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(line.as_bytes()).unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    reply.trim_end().to_string()
}

#[test]
fn connection_check_round_trip() {
    let server = spawn_server(false);
    let reply = exchange(server.command_addr, "F000^1^\r\n");
    assert!(reply.starts_with("F000^"), "unexpected reply {reply:?}");
}

#[test]
fn unknown_command_gets_reserved_reply() {
    let server = spawn_server(false);
    let reply = exchange(server.command_addr, "ZZZZ^1^\r\n");
    assert_eq!(reply, "F999^1^UNKNOWN_REQUEST");
}

#[test]
fn malformed_request_does_not_wedge_the_server() {
    let server = spawn_server(false);

    let reply = exchange(server.command_addr, "no-delimiters-at-all\r\n");
    assert_eq!(reply, "F999^1^ERROR");

    // The next well-formed exchange on a fresh connection still works.
    let reply = exchange(server.command_addr, "F012^1^\r\n");
    assert!(reply.starts_with("F012^"), "unexpected reply {reply:?}");
}

#[test]
fn instrument_query_selects_symbol_for_later_queries() {
    let server = spawn_server(false);

    let before = exchange(server.command_addr, "F007^2^\r\n");
    assert!(!before.contains("GBPUSD"));

    let info = exchange(server.command_addr, "F003^2^GBPUSD\r\n");
    assert!(info.starts_with("F003^"), "unexpected reply {info:?}");

    let after = exchange(server.command_addr, "F007^2^\r\n");
    assert!(after.contains("GBPUSD"), "market watch missing symbol: {after:?}");
}

#[test]
fn stream_only_mode_pushes_replies_onto_the_streaming_channel() {
    let server = spawn_server(true);

    let mut subscriber = TcpStream::connect(server.stream_addr).unwrap();
    subscriber
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    // Give the poll loop a few cycles to accept the subscriber.
    thread::sleep(Duration::from_millis(50));

    // The command connection is closed without a direct reply.
    let direct = exchange(server.command_addr, "F005^1^\r\n");
    assert_eq!(direct, "");

    let mut pushed = Vec::new();
    let mut buf = [0u8; 1024];
    while !pushed.ends_with(b"\r\n") {
        let n = subscriber.read(&mut buf).unwrap();
        assert!(n > 0, "streaming channel closed early");
        pushed.extend_from_slice(&buf[..n]);
    }
    let line = String::from_utf8(pushed).unwrap();
    assert!(line.starts_with("F005^"), "unexpected pushed frame {line:?}");
}
