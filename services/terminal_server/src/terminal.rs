//! Boundary to the terminal's native market-data/account API.
//!
//! The terminal itself is a black box; handlers only ever see this trait.
//! Queries are expected to be sub-millisecond, in-memory reads; a slow
//! implementation stalls the whole polling cycle for its duration.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub name: String,
    pub login: i64,
    pub currency: String,
    pub account_type: String,
    pub leverage: i64,
    pub trade_allowed: bool,
    pub limit_orders: i64,
    pub margin_call: f64,
    pub margin_close: f64,
    pub company: String,
}

#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub balance: f64,
    pub equity: f64,
    pub profit: f64,
    pub margin: f64,
    pub margin_level: f64,
    pub margin_free: f64,
}

#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub digits: i64,
    pub max_lotsize: f64,
    pub min_lotsize: f64,
    pub lot_step: f64,
    pub point: f64,
    pub tick_size: f64,
    pub tick_value: f64,
    pub swap_long: f64,
    pub swap_short: f64,
    pub stop_level: i64,
    pub contract_size: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub time: i64,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: i64,
    pub time_msc: i64,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub order_ticket: i64,
    pub position_type: String,
    pub magic_number: i64,
    pub volume: f64,
    pub open_price: f64,
    pub open_time: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
    pub profit: f64,
    pub swap: f64,
    pub commission: f64,
}

#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub close_price: f64,
    pub close_time: i64,
}

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub ticket: i64,
    pub symbol: String,
    pub order_type: String,
    pub magic_number: i64,
    pub volume: f64,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct DeletedOrder {
    pub order: PendingOrder,
    pub open_time: i64,
    pub delete_price: f64,
    pub delete_time: i64,
}

pub trait TerminalApi: Send + Sync {
    fn account_info(&self) -> Result<AccountInfo>;
    fn account_summary(&self) -> Result<AccountSummary>;
    fn broker_name(&self) -> Result<String>;
    fn server_time(&self) -> Result<i64>;
    fn is_server_connected(&self) -> bool;
    fn terminal_type(&self) -> &'static str;

    /// Symbols currently selected into the market watch.
    fn market_watch(&self) -> Vec<String>;

    /// Selects `symbol` into the market watch. Durable for the lifetime of
    /// the terminal session; called by read handlers as an intentional side
    /// effect of querying.
    fn ensure_selected(&self, symbol: &str) -> Result<()>;

    fn trading_allowed(&self, symbol: &str) -> Result<bool>;
    fn instrument_info(&self, symbol: &str) -> Result<InstrumentSpec>;
    fn last_tick(&self, symbol: &str) -> Result<Tick>;
    fn last_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>>;
    fn actual_bar(&self, symbol: &str, timeframe: i64) -> Result<Bar>;
    fn last_bars(&self, symbol: &str, timeframe: i64, start: usize, count: usize)
        -> Result<Vec<Bar>>;
    fn open_positions(&self) -> Result<Vec<Position>>;
    fn closed_positions(
        &self,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<ClosedPosition>>;
    fn pending_orders(&self) -> Result<Vec<PendingOrder>>;
    fn deleted_orders(
        &self,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<DeletedOrder>>;
}

/// Deterministic in-memory terminal used by the demo binary and the tests.
pub struct SimTerminal {
    instruments: BTreeMap<String, InstrumentSpec>,
    market_watch: RwLock<Vec<String>>,
    account: AccountInfo,
    summary: AccountSummary,
    base_time: i64,
    positions: Vec<Position>,
    closed: Vec<ClosedPosition>,
    pending: Vec<PendingOrder>,
    deleted: Vec<DeletedOrder>,
}

impl SimTerminal {
    pub fn new() -> Self {
        let mut instruments = BTreeMap::new();
        for (symbol, point) in [("EURUSD", 0.00001), ("GBPUSD", 0.00001), ("USDJPY", 0.001)] {
            instruments.insert(
                symbol.to_string(),
                InstrumentSpec {
                    digits: if point < 0.0001 { 5 } else { 3 },
                    max_lotsize: 100.0,
                    min_lotsize: 0.01,
                    lot_step: 0.01,
                    point,
                    tick_size: point,
                    tick_value: 1.0,
                    swap_long: -0.3,
                    swap_short: 0.1,
                    stop_level: 10,
                    contract_size: 100_000.0,
                },
            );
        }

        Self {
            instruments,
            market_watch: RwLock::new(vec!["EURUSD".to_string()]),
            account: AccountInfo {
                name: "Sim Account".to_string(),
                login: 10_000_001,
                currency: "USD".to_string(),
                account_type: "demo".to_string(),
                leverage: 100,
                trade_allowed: true,
                limit_orders: 200,
                margin_call: 50.0,
                margin_close: 30.0,
                company: "Sim Brokerage Ltd".to_string(),
            },
            summary: AccountSummary {
                balance: 10_000.0,
                equity: 10_125.5,
                profit: 125.5,
                margin: 250.0,
                margin_level: 4050.2,
                margin_free: 9875.5,
            },
            base_time: 1_700_000_000,
            positions: vec![Position {
                ticket: 5001,
                symbol: "EURUSD".to_string(),
                order_ticket: 4001,
                position_type: "buy".to_string(),
                magic_number: 7,
                volume: 0.10,
                open_price: 1.08542,
                open_time: 1_700_000_000,
                stop_loss: 1.08000,
                take_profit: 1.09500,
                comment: "sim".to_string(),
                profit: 12.5,
                swap: -0.3,
                commission: -0.7,
            }],
            closed: vec![ClosedPosition {
                position: Position {
                    ticket: 4800,
                    symbol: "GBPUSD".to_string(),
                    order_ticket: 3800,
                    position_type: "sell".to_string(),
                    magic_number: 7,
                    volume: 0.20,
                    open_price: 1.26400,
                    open_time: 1_699_900_000,
                    stop_loss: 1.27000,
                    take_profit: 1.25500,
                    comment: "sim".to_string(),
                    profit: 44.0,
                    swap: 0.1,
                    commission: -1.4,
                },
                close_price: 1.26180,
                close_time: 1_699_950_000,
            }],
            pending: vec![PendingOrder {
                ticket: 6001,
                symbol: "USDJPY".to_string(),
                order_type: "buy_limit".to_string(),
                magic_number: 7,
                volume: 0.05,
                open_price: 148.500,
                stop_loss: 148.000,
                take_profit: 149.800,
                comment: "sim".to_string(),
            }],
            deleted: vec![DeletedOrder {
                order: PendingOrder {
                    ticket: 5900,
                    symbol: "EURUSD".to_string(),
                    order_type: "sell_stop".to_string(),
                    magic_number: 7,
                    volume: 0.05,
                    open_price: 1.07900,
                    stop_loss: 1.08400,
                    take_profit: 1.07000,
                    comment: "sim".to_string(),
                },
                open_time: 1_699_800_000,
                delete_price: 1.08100,
                delete_time: 1_699_890_000,
            }],
        }
    }

    fn spec(&self, symbol: &str) -> Result<&InstrumentSpec> {
        match self.instruments.get(symbol) {
            Some(spec) => Ok(spec),
            None => bail!("unknown symbol {symbol}"),
        }
    }

    fn tick_at(&self, symbol: &str, offset: i64) -> Result<Tick> {
        let spec = self.spec(symbol)?;
        let time = self.base_time + offset;
        // A small deterministic walk around a per-symbol base price.
        let base = if spec.point < 0.0001 { 1.08500 } else { 148.250 };
        let drift = ((time % 100) as f64) * spec.point;
        let bid = base + drift;
        Ok(Tick {
            time,
            bid,
            ask: bid + 2.0 * spec.point,
            last: bid + spec.point,
            volume: 10 + time % 50,
            time_msc: time * 1000,
        })
    }

    fn bar_at(&self, symbol: &str, timeframe: i64, index: i64) -> Result<Bar> {
        let spec = self.spec(symbol)?;
        let period_secs = timeframe.max(1) * 60;
        let time = self.base_time - index * period_secs;
        let base = if spec.point < 0.0001 { 1.08500 } else { 148.250 };
        let drift = ((time % 100) as f64) * spec.point;
        let open = base + drift;
        Ok(Bar {
            time,
            open,
            high: open + 12.0 * spec.point,
            low: open - 9.0 * spec.point,
            close: open + 3.0 * spec.point,
            volume: 100 + time % 400,
        })
    }
}

impl Default for SimTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalApi for SimTerminal {
    fn account_info(&self) -> Result<AccountInfo> {
        Ok(self.account.clone())
    }

    fn account_summary(&self) -> Result<AccountSummary> {
        Ok(self.summary.clone())
    }

    fn broker_name(&self) -> Result<String> {
        Ok(self.account.company.clone())
    }

    fn server_time(&self) -> Result<i64> {
        Ok(Utc::now().timestamp())
    }

    fn is_server_connected(&self) -> bool {
        true
    }

    fn terminal_type(&self) -> &'static str {
        "MT5"
    }

    fn market_watch(&self) -> Vec<String> {
        self.market_watch.read().clone()
    }

    fn ensure_selected(&self, symbol: &str) -> Result<()> {
        self.spec(symbol)?;
        let mut watch = self.market_watch.write();
        if !watch.iter().any(|s| s == symbol) {
            watch.push(symbol.to_string());
        }
        Ok(())
    }

    fn trading_allowed(&self, symbol: &str) -> Result<bool> {
        self.spec(symbol)?;
        Ok(self.account.trade_allowed)
    }

    fn instrument_info(&self, symbol: &str) -> Result<InstrumentSpec> {
        Ok(self.spec(symbol)?.clone())
    }

    fn last_tick(&self, symbol: &str) -> Result<Tick> {
        self.tick_at(symbol, 0)
    }

    fn last_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>> {
        (0..count as i64)
            .map(|i| self.tick_at(symbol, -i))
            .collect()
    }

    fn actual_bar(&self, symbol: &str, timeframe: i64) -> Result<Bar> {
        self.bar_at(symbol, timeframe, 0)
    }

    fn last_bars(
        &self,
        symbol: &str,
        timeframe: i64,
        start: usize,
        count: usize,
    ) -> Result<Vec<Bar>> {
        (start as i64..(start + count) as i64)
            .map(|i| self.bar_at(symbol, timeframe, i))
            .collect()
    }

    fn open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.clone())
    }

    fn closed_positions(
        &self,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<ClosedPosition>> {
        let mut rows = self.closed.clone();
        if let Some((from, to)) = window {
            rows.retain(|p| p.close_time >= from.timestamp() && p.close_time <= to.timestamp());
        }
        Ok(rows)
    }

    fn pending_orders(&self) -> Result<Vec<PendingOrder>> {
        Ok(self.pending.clone())
    }

    fn deleted_orders(
        &self,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<DeletedOrder>> {
        let mut rows = self.deleted.clone();
        if let Some((from, to)) = window {
            rows.retain(|o| o.delete_time >= from.timestamp() && o.delete_time <= to.timestamp());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selecting_a_symbol_is_durable() {
        let terminal = SimTerminal::new();
        assert!(!terminal.market_watch().contains(&"GBPUSD".to_string()));

        terminal.ensure_selected("GBPUSD").unwrap();
        terminal.ensure_selected("GBPUSD").unwrap();

        let watch = terminal.market_watch();
        assert_eq!(watch.iter().filter(|s| *s == "GBPUSD").count(), 1);
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        let terminal = SimTerminal::new();
        assert!(terminal.last_tick("XAUXAG").is_err());
        assert!(terminal.ensure_selected("XAUXAG").is_err());
    }

    #[test]
    fn tick_history_is_deterministic() {
        let terminal = SimTerminal::new();
        let a = terminal.last_ticks("EURUSD", 5).unwrap();
        let b = terminal.last_ticks("EURUSD", 5).unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(a[0].time, b[0].time);
        assert!(a[0].ask > a[0].bid);
    }
}
