pub mod config;
pub mod dispatch;
pub mod server;
pub mod terminal;

pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use server::CommandServer;
pub use terminal::{SimTerminal, TerminalApi};
