//! Command dispatch for the terminal side.
//!
//! A static table: the `(command, sub_code)` pair of an incoming request is
//! matched exactly against the registry and routed to its handler. Handlers
//! read terminal state and build a reply `Message`; they never mutate the
//! table. Every handler failure is caught here and converted to the reserved
//! error reply; nothing propagates past the dispatch boundary.

use anyhow::{Context, Result};
use bridge_protocol::commands::CommandCode;
use bridge_protocol::format;
use bridge_protocol::Message;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::terminal::{ClosedPosition, DeletedOrder, PendingOrder, Position, TerminalApi};

pub struct Dispatcher {
    terminal: Arc<dyn TerminalApi>,
}

impl Dispatcher {
    pub fn new(terminal: Arc<dyn TerminalApi>) -> Self {
        Self { terminal }
    }

    /// Routes one decoded request to its handler and returns the reply.
    pub fn dispatch(&self, request: &Message) -> Message {
        let code = match request.command_code() {
            Ok(code) if code != CommandCode::Error => code,
            _ => {
                counter!("terminal_server.unknown_requests").increment(1);
                debug!(command = %request.command, "no dispatch match");
                return Message::unknown_request();
            }
        };

        if request.sub_code != code.request_sub_code() {
            counter!("terminal_server.unknown_requests").increment(1);
            debug!(
                command = %request.command,
                sub_code = %request.sub_code,
                "sub-code does not match the registry"
            );
            return Message::unknown_request();
        }

        match self.handle(code, &request.params) {
            Ok(reply) => reply,
            Err(e) => {
                counter!("terminal_server.handler_failures").increment(1);
                warn!(command = %code, error = %e, "handler failed");
                Message::error_reply()
            }
        }
    }

    fn handle(&self, code: CommandCode, params: &[String]) -> Result<Message> {
        match code {
            CommandCode::ConnectionCheck => self.connection_check(),
            CommandCode::StaticAccountInfo => self.static_account_info(),
            CommandCode::DynamicAccountInfo => self.dynamic_account_info(),
            CommandCode::InstrumentInfo => self.instrument_info(params),
            CommandCode::BrokerName => self.broker_name(),
            CommandCode::BrokerServerTime => self.server_time(),
            CommandCode::InstrumentList => self.instrument_list(),
            CommandCode::TradingAllowed => self.trading_allowed(params),
            CommandCode::ServerConnectionCheck => self.server_connection_check(),
            CommandCode::TerminalType => self.terminal_type(),
            CommandCode::LastTick => self.last_tick(params),
            CommandCode::LastTicks => self.last_ticks(params),
            CommandCode::ActualBar => self.actual_bar(params),
            CommandCode::LastBars => self.last_bars(params),
            CommandCode::SpecificBars => self.specific_bars(params),
            CommandCode::PendingOrders => self.pending_orders(),
            CommandCode::OpenPositions => self.open_positions(),
            CommandCode::ClosedPositionsWindow => {
                self.closed_positions(code, Some(parse_window(params)?))
            }
            CommandCode::ClosedPositions => self.closed_positions(code, None),
            CommandCode::DeletedOrdersWindow => {
                self.deleted_orders(code, Some(parse_window(params)?))
            }
            CommandCode::DeletedOrders => self.deleted_orders(code, None),
            CommandCode::Error => unreachable!("rejected before dispatch"),
        }
    }

    fn connection_check(&self) -> Result<Message> {
        let time = self.terminal.server_time()?;
        Ok(Message::reply(
            CommandCode::ConnectionCheck,
            vec![format::format_epoch(time)],
        ))
    }

    fn static_account_info(&self) -> Result<Message> {
        let info = self.terminal.account_info()?;
        Ok(Message::reply(
            CommandCode::StaticAccountInfo,
            vec![
                info.name,
                format::format_int(info.login),
                info.currency,
                info.account_type,
                format::format_int(info.leverage),
                format::format_yes_no(info.trade_allowed).to_string(),
                format::format_int(info.limit_orders),
                format::format_money(info.margin_call),
                format::format_money(info.margin_close),
                info.company,
            ],
        ))
    }

    fn dynamic_account_info(&self) -> Result<Message> {
        let summary = self.terminal.account_summary()?;
        Ok(Message::reply(
            CommandCode::DynamicAccountInfo,
            vec![
                format::format_money(summary.balance),
                format::format_money(summary.equity),
                format::format_money(summary.profit),
                format::format_money(summary.margin),
                format::format_money(summary.margin_level),
                format::format_money(summary.margin_free),
            ],
        ))
    }

    /// Queries an instrument. Intentional side effect: the symbol is selected
    /// into the market watch and stays there for subsequent queries.
    fn instrument_info(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        self.terminal.ensure_selected(symbol)?;
        let spec = self.terminal.instrument_info(symbol)?;
        Ok(Message::reply(
            CommandCode::InstrumentInfo,
            vec![
                format::format_int(spec.digits),
                format::format_money(spec.max_lotsize),
                format::format_money(spec.min_lotsize),
                format::format_money(spec.lot_step),
                format::format_price(spec.point),
                format::format_price(spec.tick_size),
                format::format_price(spec.tick_value),
                format::format_money(spec.swap_long),
                format::format_money(spec.swap_short),
                format::format_int(spec.stop_level),
                format::format_money(spec.contract_size),
            ],
        ))
    }

    fn broker_name(&self) -> Result<Message> {
        let name = self.terminal.broker_name()?;
        Ok(Message::reply(CommandCode::BrokerName, vec![name]))
    }

    fn server_time(&self) -> Result<Message> {
        let time = self.terminal.server_time()?;
        Ok(Message::reply(
            CommandCode::BrokerServerTime,
            vec![format::format_epoch(time)],
        ))
    }

    fn instrument_list(&self) -> Result<Message> {
        let symbols = self.terminal.market_watch();
        let mut params = vec![format::format_int(symbols.len() as i64)];
        params.extend(symbols);
        Ok(Message::reply(CommandCode::InstrumentList, params))
    }

    fn trading_allowed(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        let allowed = self.terminal.trading_allowed(symbol)?;
        Ok(Message::reply(
            CommandCode::TradingAllowed,
            vec![
                symbol.to_string(),
                format::format_yes_no(allowed).to_string(),
            ],
        ))
    }

    fn server_connection_check(&self) -> Result<Message> {
        Ok(Message::reply(
            CommandCode::ServerConnectionCheck,
            vec![format::format_yes_no(self.terminal.is_server_connected()).to_string()],
        ))
    }

    fn terminal_type(&self) -> Result<Message> {
        Ok(Message::reply(
            CommandCode::TerminalType,
            vec![self.terminal.terminal_type().to_string()],
        ))
    }

    fn last_tick(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        let tick = self.terminal.last_tick(symbol)?;
        Ok(Message::reply(
            CommandCode::LastTick,
            vec![
                format::format_epoch(tick.time),
                format::format_price(tick.bid),
                format::format_price(tick.ask),
                format::format_price(tick.last),
                format::format_int(tick.volume),
                format::format_price(tick.spread()),
                format::format_int(tick.time_msc),
            ],
        ))
    }

    fn last_ticks(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        let count = format::parse_i64(required(params, 1, "count")?)?.max(0) as usize;
        let ticks = self.terminal.last_ticks(symbol, count)?;
        let records = ticks
            .iter()
            .map(|t| {
                Message::join_record(&[
                    &format::format_epoch(t.time),
                    &format::format_price(t.ask),
                    &format::format_price(t.bid),
                    &format::format_price(t.last),
                    &format::format_int(t.volume),
                ])
            })
            .collect();
        Ok(Message::reply(CommandCode::LastTicks, records))
    }

    fn actual_bar(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        let timeframe = format::parse_i64(required(params, 1, "timeframe")?)?;
        let bar = self.terminal.actual_bar(symbol, timeframe)?;
        Ok(Message::reply(CommandCode::ActualBar, bar_fields(&bar)))
    }

    fn last_bars(&self, params: &[String]) -> Result<Message> {
        let symbol = required(params, 0, "symbol")?;
        let timeframe = format::parse_i64(required(params, 1, "timeframe")?)?;
        let start = format::parse_i64(required(params, 2, "start")?)?.max(0) as usize;
        let count = format::parse_i64(required(params, 3, "count")?)?.max(0) as usize;
        let bars = self.terminal.last_bars(symbol, timeframe, start, count)?;
        let records = bars
            .iter()
            .map(|b| {
                let fields = bar_fields(b);
                Message::join_record(&fields.iter().map(String::as_str).collect::<Vec<_>>())
            })
            .collect();
        Ok(Message::reply(CommandCode::LastBars, records))
    }

    fn specific_bars(&self, params: &[String]) -> Result<Message> {
        let symbols = Message::record_fields(required(params, 0, "symbols")?);
        let index = format::parse_i64(required(params, 1, "index")?)?.max(0) as usize;
        let timeframe = format::parse_i64(required(params, 2, "timeframe")?)?;

        let mut records = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let bars = self.terminal.last_bars(symbol, timeframe, index, 1)?;
            let bar = bars
                .first()
                .with_context(|| format!("no bar at index {index} for {symbol}"))?;
            let fields = bar_fields(bar);
            let mut all = vec![symbol.as_str()];
            all.extend(fields.iter().map(String::as_str));
            records.push(Message::join_record(&all));
        }
        Ok(Message::reply(CommandCode::SpecificBars, records))
    }

    fn pending_orders(&self) -> Result<Message> {
        let orders = self.terminal.pending_orders()?;
        let records = orders.iter().map(pending_order_record).collect();
        Ok(Message::reply(CommandCode::PendingOrders, records))
    }

    fn open_positions(&self) -> Result<Message> {
        let positions = self.terminal.open_positions()?;
        let records = positions.iter().map(position_record).collect();
        Ok(Message::reply(CommandCode::OpenPositions, records))
    }

    fn closed_positions(
        &self,
        code: CommandCode,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Message> {
        let positions = self.terminal.closed_positions(window)?;
        let records = positions.iter().map(closed_position_record).collect();
        Ok(Message::reply(code, records))
    }

    fn deleted_orders(
        &self,
        code: CommandCode,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Message> {
        let orders = self.terminal.deleted_orders(window)?;
        let records = orders.iter().map(deleted_order_record).collect();
        Ok(Message::reply(code, records))
    }
}

fn required<'a>(params: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    params
        .get(index)
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .with_context(|| format!("missing parameter {index} ({name})"))
}

fn parse_window(params: &[String]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let from = format::parse_window_time(required(params, 0, "from")?)?;
    let to = format::parse_window_time(required(params, 1, "to")?)?;
    Ok((from, to))
}

fn bar_fields(bar: &crate::terminal::Bar) -> Vec<String> {
    vec![
        format::format_epoch(bar.time),
        format::format_price(bar.open),
        format::format_price(bar.high),
        format::format_price(bar.low),
        format::format_price(bar.close),
        format::format_int(bar.volume),
    ]
}

fn position_record(p: &Position) -> String {
    Message::join_record(&[
        &format::format_int(p.ticket),
        &p.symbol,
        &format::format_int(p.order_ticket),
        &p.position_type,
        &format::format_int(p.magic_number),
        &format::format_money(p.volume),
        &format::format_price(p.open_price),
        &format::format_epoch(p.open_time),
        &format::format_price(p.stop_loss),
        &format::format_price(p.take_profit),
        &p.comment,
        &format::format_money(p.profit),
        &format::format_money(p.swap),
        &format::format_money(p.commission),
    ])
}

fn closed_position_record(c: &ClosedPosition) -> String {
    let p = &c.position;
    Message::join_record(&[
        &format::format_int(p.ticket),
        &p.symbol,
        &format::format_int(p.order_ticket),
        &p.position_type,
        &format::format_int(p.magic_number),
        &format::format_money(p.volume),
        &format::format_price(p.open_price),
        &format::format_epoch(p.open_time),
        &format::format_price(p.stop_loss),
        &format::format_price(p.take_profit),
        &format::format_price(c.close_price),
        &format::format_epoch(c.close_time),
        &p.comment,
        &format::format_money(p.profit),
        &format::format_money(p.swap),
        &format::format_money(p.commission),
    ])
}

fn pending_order_record(o: &PendingOrder) -> String {
    Message::join_record(&[
        &format::format_int(o.ticket),
        &o.symbol,
        &o.order_type,
        &format::format_int(o.magic_number),
        &format::format_money(o.volume),
        &format::format_price(o.open_price),
        &format::format_price(o.stop_loss),
        &format::format_price(o.take_profit),
        &o.comment,
    ])
}

fn deleted_order_record(d: &DeletedOrder) -> String {
    let o = &d.order;
    Message::join_record(&[
        &format::format_int(o.ticket),
        &o.symbol,
        &o.order_type,
        &format::format_int(o.magic_number),
        &format::format_money(o.volume),
        &format::format_price(o.open_price),
        &format::format_epoch(d.open_time),
        &format::format_price(o.stop_loss),
        &format::format_price(o.take_profit),
        &format::format_price(d.delete_price),
        &format::format_epoch(d.delete_time),
        &o.comment,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::SimTerminal;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(SimTerminal::new()))
    }

    #[test]
    fn unknown_command_yields_reserved_reply() {
        let reply = dispatcher().dispatch(&Message::new("ZZZZ", "1", vec![]));
        assert_eq!(reply.encode(), "F999^1^UNKNOWN_REQUEST");
    }

    #[test]
    fn mismatched_sub_code_is_unknown() {
        let request = Message::new("F020", "9", vec!["EURUSD".into()]);
        let reply = dispatcher().dispatch(&request);
        assert_eq!(reply.encode(), "F999^1^UNKNOWN_REQUEST");
    }

    #[test]
    fn handler_failure_yields_error_reply() {
        let request = Message::request(
            bridge_protocol::CommandCode::LastTick,
            vec!["NOSUCHSYM".into()],
        );
        let reply = dispatcher().dispatch(&request);
        assert_eq!(reply.encode(), "F999^1^ERROR");
    }

    #[test]
    fn last_tick_reply_shape() {
        let request =
            Message::request(bridge_protocol::CommandCode::LastTick, vec!["EURUSD".into()]);
        let reply = dispatcher().dispatch(&request);
        assert_eq!(reply.command, "F020");
        assert_eq!(reply.params.len(), 7);
        assert_eq!(reply.integrity_hint(), None);
        // bid/ask carry price precision
        assert_eq!(reply.params[1].split('.').nth(1).unwrap().len(), 5);
    }

    #[test]
    fn instrument_info_selects_symbol_into_market_watch() {
        let terminal = Arc::new(SimTerminal::new());
        let dispatcher = Dispatcher::new(terminal.clone());

        assert!(!terminal.market_watch().contains(&"USDJPY".to_string()));
        let request = Message::request(
            bridge_protocol::CommandCode::InstrumentInfo,
            vec!["USDJPY".into()],
        );
        let reply = dispatcher.dispatch(&request);
        assert!(!reply.is_error());
        assert!(terminal.market_watch().contains(&"USDJPY".to_string()));

        // Visible through the market-watch query afterwards.
        let list = dispatcher.dispatch(&Message::request(
            bridge_protocol::CommandCode::InstrumentList,
            vec![],
        ));
        assert!(list.params.contains(&"USDJPY".to_string()));
    }

    #[test]
    fn windowed_history_filters_and_bare_does_not() {
        let d = dispatcher();
        let all = d.dispatch(&Message::request(
            bridge_protocol::CommandCode::ClosedPositions,
            vec![],
        ));
        assert_eq!(all.params.len(), 1);

        let none = d.dispatch(&Message::request(
            bridge_protocol::CommandCode::ClosedPositionsWindow,
            vec!["2020/01/01/00/00/00".into(), "2020/01/02/00/00/00".into()],
        ));
        assert!(none.params.is_empty());

        let hit = d.dispatch(&Message::request(
            bridge_protocol::CommandCode::ClosedPositionsWindow,
            vec!["2023/11/01/00/00/00".into(), "2023/12/01/00/00/00".into()],
        ));
        assert_eq!(hit.params.len(), 1);
        let fields = Message::record_fields(&hit.params[0]);
        assert_eq!(fields.len(), 16);
    }

    #[test]
    fn ticks_encode_as_records() {
        let reply = dispatcher().dispatch(&Message::request(
            bridge_protocol::CommandCode::LastTicks,
            vec!["EURUSD".into(), "3".into()],
        ));
        assert_eq!(reply.params.len(), 3);
        for record in &reply.params {
            assert_eq!(Message::record_fields(record).len(), 5);
        }
    }
}
