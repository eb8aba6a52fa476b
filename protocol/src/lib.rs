pub mod commands;
pub mod error;
pub mod format;
pub mod frame;
pub mod message;

pub use commands::CommandCode;
pub use error::ProtocolError;
pub use frame::FrameBuffer;
pub use message::Message;

pub const DEFAULT_COMMAND_PORT: u16 = 15556;
pub const DEFAULT_STREAM_PORT: u16 = 15557;
pub const DEFAULT_FANOUT_PORT: u16 = 15558;

/// Separates the three top-level message fields and the parameters.
pub const FIELD_DELIMITER: char = '^';
/// Separates the values inside one compound parameter (one record).
pub const RECORD_DELIMITER: char = '$';
/// Terminates one frame on the wire.
pub const FRAME_TERMINATOR: &str = "\r\n";
