// Example client showing one command exchange per connection

use bridge_protocol::{CommandCode, FrameBuffer, Message, DEFAULT_COMMAND_PORT};
use std::io::{Read, Write};
use std::net::TcpStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("127.0.0.1:{DEFAULT_COMMAND_PORT}");

    let requests = [
        Message::request(CommandCode::ConnectionCheck, vec![]),
        Message::request(CommandCode::StaticAccountInfo, vec![]),
        Message::request(CommandCode::InstrumentInfo, vec!["EURUSD".to_string()]),
        Message::request(CommandCode::LastTick, vec!["EURUSD".to_string()]),
        Message::request(CommandCode::OpenPositions, vec![]),
    ];

    for request in requests {
        println!("-> {}", request.encode());

        // The command channel serves exactly one exchange per connection.
        let mut stream = TcpStream::connect(&addr)?;
        stream.write_all(&request.encode_bytes())?;

        let mut frames = FrameBuffer::new();
        let mut buffer = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            frames.extend(&buffer[..n]);
            if let Some(frame) = frames.next_frame() {
                let reply = Message::decode(&frame?)?;
                println!("<- {} ({} params)", reply.encode(), reply.params.len());
                break;
            }
        }
    }

    Ok(())
}
