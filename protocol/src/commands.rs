use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Reply parameter literal for a failed handler.
pub const ERROR_LITERAL: &str = "ERROR";
/// Reply parameter literal for a command with no dispatch match.
pub const UNKNOWN_REQUEST_LITERAL: &str = "UNKNOWN_REQUEST";
/// Sub-code carried by every error reply.
pub const ERROR_SUB_CODE: &str = "1";

/// Closed registry of command codes understood by the terminal side.
///
/// Codes are fixed-format string tokens, not numbers. The terminal answers a
/// request with the same code, or with [`CommandCode::Error`] when dispatch
/// found no match or the handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    ConnectionCheck,
    StaticAccountInfo,
    DynamicAccountInfo,
    /// Side effect: querying an instrument selects it into the market watch.
    InstrumentInfo,
    BrokerName,
    BrokerServerTime,
    InstrumentList,
    TradingAllowed,
    ServerConnectionCheck,
    TerminalType,
    LastTick,
    LastTicks,
    ActualBar,
    LastBars,
    SpecificBars,
    PendingOrders,
    OpenPositions,
    ClosedPositionsWindow,
    ClosedPositions,
    DeletedOrdersWindow,
    DeletedOrders,
    Error,
}

impl CommandCode {
    pub const ALL: &'static [CommandCode] = &[
        CommandCode::ConnectionCheck,
        CommandCode::StaticAccountInfo,
        CommandCode::DynamicAccountInfo,
        CommandCode::InstrumentInfo,
        CommandCode::BrokerName,
        CommandCode::BrokerServerTime,
        CommandCode::InstrumentList,
        CommandCode::TradingAllowed,
        CommandCode::ServerConnectionCheck,
        CommandCode::TerminalType,
        CommandCode::LastTick,
        CommandCode::LastTicks,
        CommandCode::ActualBar,
        CommandCode::LastBars,
        CommandCode::SpecificBars,
        CommandCode::PendingOrders,
        CommandCode::OpenPositions,
        CommandCode::ClosedPositionsWindow,
        CommandCode::ClosedPositions,
        CommandCode::DeletedOrdersWindow,
        CommandCode::DeletedOrders,
        CommandCode::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::ConnectionCheck => "F000",
            CommandCode::StaticAccountInfo => "F001",
            CommandCode::DynamicAccountInfo => "F002",
            CommandCode::InstrumentInfo => "F003",
            CommandCode::BrokerName => "F004",
            CommandCode::BrokerServerTime => "F005",
            CommandCode::InstrumentList => "F007",
            CommandCode::TradingAllowed => "F008",
            CommandCode::ServerConnectionCheck => "F011",
            CommandCode::TerminalType => "F012",
            CommandCode::LastTick => "F020",
            CommandCode::LastTicks => "F021",
            CommandCode::ActualBar => "F041",
            CommandCode::LastBars => "F042",
            CommandCode::SpecificBars => "F045",
            CommandCode::PendingOrders => "F060",
            CommandCode::OpenPositions => "F061",
            CommandCode::ClosedPositionsWindow => "F062",
            CommandCode::ClosedPositions => "F063",
            CommandCode::DeletedOrdersWindow => "F064",
            CommandCode::DeletedOrders => "F065",
            CommandCode::Error => "F999",
        }
    }

    /// The sub-code a well-formed request for this command carries.
    pub fn request_sub_code(&self) -> &'static str {
        match self {
            CommandCode::InstrumentInfo
            | CommandCode::InstrumentList
            | CommandCode::TradingAllowed
            | CommandCode::LastTick => "2",
            CommandCode::ActualBar
            | CommandCode::SpecificBars
            | CommandCode::ClosedPositionsWindow
            | CommandCode::DeletedOrdersWindow => "3",
            CommandCode::LastTicks => "4",
            CommandCode::LastBars => "5",
            _ => "1",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandCode::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}
