use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};

use super::{
    ContractDetail, ExchangeGateway, GatewayError, GatewayResult, OrderRecord, OrderRequest,
    OrderStatus, OrderType,
};
use crate::models::{Candle, Side};
use async_trait::async_trait;

/// In-memory exchange simulator.
///
/// Market orders fill at the current mark price, exit legs fill when the
/// mark crosses their level. Drives `--paper` mode and the integration
/// tests; the test controls (held entries, injected failures, external
/// cancels) mirror the failure modes the reconciliation core must absorb.
pub struct PaperGateway {
    inner: Mutex<Inner>,
}

struct Inner {
    mark: f64,
    orders: HashMap<String, PaperOrder>,
    next_id: u64,
    /// Signed net position: positive long, negative short
    position: f64,
    cancellations: Vec<String>,
    fail_requests: u32,
    fail_submits: u32,
    hold_entries: bool,
    candles: Vec<Candle>,
}

#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub req: OrderRequest,
    pub status: OrderStatus,
    pub fill_price: f64,
    pub filled_qty: f64,
}

impl PaperGateway {
    pub fn new(mark: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mark,
                orders: HashMap::new(),
                next_id: 1,
                position: 0.0,
                cancellations: Vec::new(),
                fail_requests: 0,
                fail_submits: 0,
                hold_entries: false,
                candles: Vec::new(),
            }),
        }
    }

    /// Move the mark price, filling any exit leg it crosses
    pub fn set_mark(&self, price: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.mark = price;
        inner.apply_crossings();
    }

    pub fn mark(&self) -> f64 {
        self.inner.lock().unwrap().mark
    }

    /// Keep market entries open instead of filling them immediately
    pub fn hold_entries(&self, hold: bool) {
        self.inner.lock().unwrap().hold_entries = hold;
    }

    /// Force-fill an open order at the given price
    pub fn fill_order(&self, order_id: &str, price: f64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.fill(order_id, price)
    }

    /// Cancel an order as if done outside this process (no cancel recorded)
    pub fn external_cancel(&self, order_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(order_id) {
            if order.status == OrderStatus::Open {
                order.status = OrderStatus::Canceled;
            }
        }
    }

    /// Order ids that received a cancel request through the gateway
    pub fn cancellations(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancellations.clone()
    }

    /// Make the next `n` gateway calls fail with a transport error
    pub fn fail_next_requests(&self, n: u32) {
        self.inner.lock().unwrap().fail_requests = n;
    }

    /// Make the next `n` order submissions fail, leaving queries untouched
    pub fn fail_next_submits(&self, n: u32) {
        self.inner.lock().unwrap().fail_submits = n;
    }

    pub fn position(&self) -> f64 {
        self.inner.lock().unwrap().position
    }

    pub fn order(&self, order_id: &str) -> Option<PaperOrder> {
        self.inner.lock().unwrap().orders.get(order_id).cloned()
    }

    pub fn push_candle(&self, candle: Candle) {
        self.inner.lock().unwrap().candles.push(candle);
    }

    pub fn open_order_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }
}

impl Inner {
    fn take_fail(&mut self) -> GatewayResult<()> {
        if self.fail_requests > 0 {
            self.fail_requests -= 1;
            return Err(GatewayError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn fill(&mut self, order_id: &str, price: f64) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            return false;
        };
        if order.status != OrderStatus::Open {
            return false;
        }
        order.status = OrderStatus::Filled;
        order.fill_price = price;
        order.filled_qty = order.req.size;

        let sign = order.req.side.sign();
        if order.req.reduce_only {
            self.position -= sign * order.req.size;
        } else {
            self.position += sign * order.req.size;
        }
        true
    }

    fn apply_crossings(&mut self) {
        let mark = self.mark;
        let crossed: Vec<(String, f64)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Open && o.req.reduce_only)
            .filter_map(|(id, o)| match o.req.order_type {
                OrderType::Limit => {
                    let price = o.req.price?;
                    let hit = match o.req.side {
                        Side::Long => mark >= price,
                        Side::Short => mark <= price,
                    };
                    hit.then(|| (id.clone(), price))
                }
                OrderType::StopMarket => {
                    let trigger = o.req.trigger_price?;
                    let hit = match o.req.side {
                        Side::Long => mark <= trigger,
                        Side::Short => mark >= trigger,
                    };
                    hit.then(|| (id.clone(), trigger))
                }
                OrderType::Market => None,
            })
            .collect();

        for (id, price) in crossed {
            self.fill(&id, price);
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        if inner.fail_submits > 0 {
            inner.fail_submits -= 1;
            return Err(GatewayError::Transport("injected submit failure".to_string()));
        }

        let order_id = format!("P{:06}", inner.next_id);
        inner.next_id += 1;
        inner.orders.insert(
            order_id.clone(),
            PaperOrder {
                req: req.clone(),
                status: OrderStatus::Open,
                fill_price: 0.0,
                filled_qty: 0.0,
            },
        );

        let instant_fill =
            req.order_type == OrderType::Market && !req.reduce_only && !inner.hold_entries;
        if instant_fill {
            let mark = inner.mark;
            inner.fill(&order_id, mark);
        }
        Ok(order_id)
    }

    async fn query_order(&self, order_id: &str) -> GatewayResult<OrderRecord> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        match inner.orders.get(order_id) {
            Some(order) => Ok(OrderRecord {
                order_id: order_id.to_string(),
                status: order.status,
                amount: order.req.size,
                filled_qty: order.filled_qty,
                avg_price: order.fill_price,
            }),
            None => Ok(OrderRecord {
                order_id: order_id.to_string(),
                status: OrderStatus::Unknown,
                amount: 0.0,
                filled_qty: 0.0,
                avg_price: 0.0,
            }),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        inner.cancellations.push(order_id.to_string());
        match inner.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Open => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            Some(_) => Ok(()), // already terminal, cancel is a no-op
            None => Err(GatewayError::Rejected("unknown order".to_string())),
        }
    }

    async fn open_position_size(&self, _symbol: &str) -> GatewayResult<f64> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        Ok(inner.position)
    }

    async fn recent_candles(&self, _symbol: &str, limit: usize) -> GatewayResult<Vec<Candle>> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        if !inner.candles.is_empty() {
            let start = inner.candles.len().saturating_sub(limit);
            return Ok(inner.candles[start..].to_vec());
        }

        // no scripted candles: synthesize flat bars at the mark
        let mark = inner.mark;
        let now = Utc::now();
        let candles = (0..limit)
            .map(|i| Candle {
                open_time: now - ChronoDuration::minutes((limit - i) as i64),
                open: mark,
                high: mark,
                low: mark,
                close: mark,
                volume: 0.0,
                confirmed: i + 1 < limit,
            })
            .collect();
        Ok(candles)
    }

    async fn contract_detail(&self, _symbol: &str) -> GatewayResult<ContractDetail> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_fail()?;
        Ok(ContractDetail {
            tick: 0.001,
            min_step: 0.001,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_entry(side: Side, size: f64) -> OrderRequest {
        OrderRequest {
            symbol: "WBAR_USDT".to_string(),
            side,
            reduce_only: false,
            order_type: OrderType::Market,
            size,
            price: None,
            trigger_price: None,
            attached_stop: None,
            leverage: 20,
        }
    }

    fn tp_limit(side: Side, size: f64, price: f64) -> OrderRequest {
        OrderRequest {
            symbol: "WBAR_USDT".to_string(),
            side,
            reduce_only: true,
            order_type: OrderType::Limit,
            size,
            price: Some(price),
            trigger_price: None,
            attached_stop: None,
            leverage: 20,
        }
    }

    fn sl_stop(side: Side, size: f64, trigger: f64) -> OrderRequest {
        OrderRequest {
            symbol: "WBAR_USDT".to_string(),
            side,
            reduce_only: true,
            order_type: OrderType::StopMarket,
            size,
            price: None,
            trigger_price: Some(trigger),
            attached_stop: None,
            leverage: 20,
        }
    }

    #[tokio::test]
    async fn test_market_entry_fills_at_mark() {
        let gw = PaperGateway::new(100.0);
        let id = gw.submit_order(&market_entry(Side::Long, 2.0)).await.unwrap();

        let record = gw.query_order(&id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.avg_price, 100.0);
        assert_eq!(gw.position(), 2.0);
    }

    #[tokio::test]
    async fn test_held_entry_stays_open() {
        let gw = PaperGateway::new(100.0);
        gw.hold_entries(true);
        let id = gw.submit_order(&market_entry(Side::Long, 1.0)).await.unwrap();

        let record = gw.query_order(&id).await.unwrap();
        assert_eq!(record.status, OrderStatus::Open);
        assert_eq!(gw.position(), 0.0);
    }

    #[tokio::test]
    async fn test_tp_fills_on_cross() {
        let gw = PaperGateway::new(100.0);
        gw.submit_order(&market_entry(Side::Long, 1.0)).await.unwrap();
        let tp = gw.submit_order(&tp_limit(Side::Long, 1.0, 101.0)).await.unwrap();

        gw.set_mark(100.5);
        assert_eq!(gw.query_order(&tp).await.unwrap().status, OrderStatus::Open);

        gw.set_mark(101.2);
        let record = gw.query_order(&tp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.avg_price, 101.0);
        assert_eq!(gw.position(), 0.0);
    }

    #[tokio::test]
    async fn test_sl_triggers_on_cross_down() {
        let gw = PaperGateway::new(100.0);
        gw.submit_order(&market_entry(Side::Long, 2.0)).await.unwrap();
        let sl = gw.submit_order(&sl_stop(Side::Long, 2.0, 99.5)).await.unwrap();

        gw.set_mark(99.4);
        let record = gw.query_order(&sl).await.unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.avg_price, 99.5);
        assert_eq!(gw.position(), 0.0);
    }

    #[tokio::test]
    async fn test_cancel_records_request() {
        let gw = PaperGateway::new(100.0);
        gw.hold_entries(true);
        let id = gw.submit_order(&market_entry(Side::Long, 1.0)).await.unwrap();

        gw.cancel_order(&id).await.unwrap();
        assert_eq!(gw.query_order(&id).await.unwrap().status, OrderStatus::Canceled);
        assert_eq!(gw.cancellations(), vec![id]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let gw = PaperGateway::new(100.0);
        gw.fail_next_requests(2);

        assert!(gw.open_position_size("WBAR_USDT").await.is_err());
        assert!(gw.open_position_size("WBAR_USDT").await.is_err());
        assert!(gw.open_position_size("WBAR_USDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_order_query() {
        let gw = PaperGateway::new(100.0);
        let record = gw.query_order("nope").await.unwrap();
        assert_eq!(record.status, OrderStatus::Unknown);
    }
}
