//! Mock exchange for integration testing.
//!
//! Provides deterministic `MarketDataProvider`, `BalanceProvider` and
//! `OrderPlacer` implementations over in-memory state. Markets, balance,
//! order outcomes and failures are fully controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgegate::platforms::{BalanceProvider, MarketDataProvider, OrderAck, OrderPlacer, OrderRequest};
use edgegate::types::{cents_to_dollars, Clock, MarketSnapshot, Side};

/// How the mock answers the next orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Fill in full at the limit price.
    Fill,
    /// Rest on the book with nothing filled.
    Rest,
    /// Acknowledge as canceled.
    Cancel,
}

pub struct MockExchange {
    markets: Vec<MarketSnapshot>,
    results: Arc<Mutex<HashMap<String, Side>>>,
    balance: Arc<Mutex<Decimal>>,
    orders: Arc<Mutex<Vec<OrderRequest>>>,
    acks: Arc<Mutex<HashMap<String, OrderAck>>>,
    mode: Arc<Mutex<FillMode>>,
    delay: Arc<Mutex<Option<Duration>>>,
    /// If set, all operations will return this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockExchange {
    pub fn new(balance: Decimal) -> Self {
        Self::with_markets(balance, Vec::new())
    }

    pub fn with_markets(balance: Decimal, markets: Vec<MarketSnapshot>) -> Self {
        Self {
            markets,
            results: Arc::new(Mutex::new(HashMap::new())),
            balance: Arc::new(Mutex::new(balance)),
            orders: Arc::new(Mutex::new(Vec::new())),
            acks: Arc::new(Mutex::new(HashMap::new())),
            mode: Arc::new(Mutex::new(FillMode::Fill)),
            delay: Arc::new(Mutex::new(None)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_mode(&self, mode: FillMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Delay every order acknowledgement.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn settle(&self, ticker: &str, winner: Side) {
        self.results.lock().unwrap().insert(ticker.to_string(), winner);
    }

    /// Every order that reached the exchange, in arrival order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!("{err}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockExchange {
    async fn fetch_markets(&self, series: &str) -> Result<Vec<MarketSnapshot>> {
        self.check_error()?;
        Ok(self.markets.iter().filter(|m| m.series == series).cloned().collect())
    }

    async fn market_result(&self, ticker: &str) -> Result<Option<Side>> {
        self.check_error()?;
        Ok(self.results.lock().unwrap().get(ticker).copied())
    }
}

#[async_trait]
impl BalanceProvider for MockExchange {
    async fn balance(&self) -> Result<Decimal> {
        self.check_error()?;
        Ok(*self.balance.lock().unwrap())
    }
}

#[async_trait]
impl OrderPlacer for MockExchange {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_error()?;
        self.orders.lock().unwrap().push(order.clone());

        let order_id = format!("MOCK-{}", self.orders.lock().unwrap().len());
        let mode = *self.mode.lock().unwrap();
        let ack = match mode {
            FillMode::Fill => {
                let cost = Decimal::from(order.contracts) * cents_to_dollars(order.price_cents);
                let mut balance = self.balance.lock().unwrap();
                if *balance < cost {
                    return Err(anyhow!("Insufficient balance: need ${cost:.2}, have ${:.2}", *balance));
                }
                *balance -= cost;
                OrderAck {
                    order_id: order_id.clone(),
                    status: "executed".into(),
                    fill_count: order.contracts,
                    remaining_count: 0,
                }
            }
            FillMode::Rest => OrderAck {
                order_id: order_id.clone(),
                status: "resting".into(),
                fill_count: 0,
                remaining_count: order.contracts,
            },
            FillMode::Cancel => OrderAck {
                order_id: order_id.clone(),
                status: "canceled".into(),
                fill_count: 0,
                remaining_count: 0,
            },
        };
        self.acks.lock().unwrap().insert(order_id, ack.clone());
        Ok(ack)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderAck> {
        self.check_error()?;
        self.acks
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown order {order_id}"))
    }
}

/// A clock the test moves by hand.
pub fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
    let now = Arc::new(Mutex::new(start));
    let handle = now.clone();
    (Arc::new(move || *handle.lock().unwrap()), now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(ticker: &str, contracts: u32, price_cents: u32) -> OrderRequest {
        OrderRequest {
            ticker: ticker.into(),
            side: Side::No,
            contracts,
            price_cents,
            client_order_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_fill_debits_balance() {
        let exchange = MockExchange::new(dec!(100));
        let ack = exchange.place_order(&make_order("A", 10, 80)).await.unwrap();
        assert_eq!(ack.status, "executed");
        assert_eq!(ack.fill_count, 10);
        assert_eq!(exchange.balance().await.unwrap(), dec!(92));
        assert_eq!(exchange.order_status(&ack.order_id).await.unwrap(), ack);
    }

    #[tokio::test]
    async fn test_mock_modes_and_errors() {
        let exchange = MockExchange::new(dec!(100));
        exchange.set_mode(FillMode::Rest);
        let ack = exchange.place_order(&make_order("A", 10, 80)).await.unwrap();
        assert_eq!(ack.remaining_count, 10);
        assert_eq!(exchange.balance().await.unwrap(), dec!(100));

        exchange.set_mode(FillMode::Cancel);
        let ack = exchange.place_order(&make_order("C", 10, 80)).await.unwrap();
        assert_eq!(ack.status, "canceled");

        exchange.set_error("simulated disconnect");
        assert!(exchange.balance().await.is_err());
        assert!(exchange.place_order(&make_order("B", 1, 50)).await.is_err());
        exchange.clear_error();
        assert_eq!(exchange.orders().len(), 2);
    }
}
