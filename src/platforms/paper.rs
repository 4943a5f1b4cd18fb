//! Paper exchange.
//!
//! In-process stand-in for live order entry. Every order fills in full at
//! its limit price if the simulated cash covers it, otherwise it is
//! canceled. Cash is debited on fill and credited $1 per winning contract
//! when the accountant settles the position.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use super::{BalanceProvider, OrderAck, OrderPlacer, OrderRequest, PayoutReceiver};
use crate::types::cents_to_dollars;

pub struct PaperExchange {
    cash: Mutex<Decimal>,
    orders: Mutex<HashMap<String, OrderAck>>,
}

impl PaperExchange {
    pub fn new(starting_cash: Decimal) -> Self {
        info!(cash = format!("${:.2}", starting_cash), "Paper exchange ready");
        Self {
            cash: Mutex::new(starting_cash),
            orders: Mutex::new(HashMap::new()),
        }
    }

    fn cash(&self) -> Decimal {
        *self.cash.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BalanceProvider for PaperExchange {
    async fn balance(&self) -> Result<Decimal> {
        Ok(self.cash())
    }
}

#[async_trait]
impl PayoutReceiver for PaperExchange {
    async fn credit_payout(&self, ticker: &str, amount: Decimal) -> Result<()> {
        if amount < Decimal::ZERO {
            return Err(anyhow!("Negative payout ${amount:.2} for {ticker}"));
        }
        let cash = {
            let mut cash = self.cash.lock().unwrap_or_else(|p| p.into_inner());
            *cash += amount;
            *cash
        };
        info!(
            ticker,
            payout = format!("${:.2}", amount),
            cash = format!("${:.2}", cash),
            "[PAPER] Payout credited"
        );
        Ok(())
    }
}

#[async_trait]
impl OrderPlacer for PaperExchange {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if order.contracts == 0 || !(1..=99).contains(&order.price_cents) {
            return Err(anyhow!("Paper exchange rejected malformed order: {order}"));
        }

        let cost = Decimal::from(order.contracts) * cents_to_dollars(order.price_cents);
        let filled = {
            let mut cash = self.cash.lock().unwrap_or_else(|p| p.into_inner());
            if *cash >= cost {
                *cash -= cost;
                true
            } else {
                false
            }
        };

        let order_id = format!("paper-{}", uuid::Uuid::new_v4().simple());
        let ack = if filled {
            OrderAck {
                order_id: order_id.clone(),
                status: "executed".into(),
                fill_count: order.contracts,
                remaining_count: 0,
            }
        } else {
            OrderAck {
                order_id: order_id.clone(),
                status: "canceled".into(),
                fill_count: 0,
                remaining_count: 0,
            }
        };

        info!(
            order = %order,
            status = %ack.status,
            cost = format!("${:.2}", cost),
            cash = format!("${:.2}", self.cash()),
            "[PAPER] Order processed"
        );

        self.orders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(order_id, ack.clone());
        Ok(ack)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderAck> {
        self.orders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown paper order {order_id}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
