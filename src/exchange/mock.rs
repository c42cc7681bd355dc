//! Mock gateway for tests and fire drills.
//!
//! Simulates just enough of a venue to exercise the control loop: a seeded
//! book and position per symbol, configurable fill behavior for reduce-only
//! orders, fault injection for the transient-error paths, and an order
//! journal for assertions.

use super::traits::{ExchangeGateway, GatewayError};
use super::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// How the mock venue fills a resting reduce-only order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// The order fills completely as soon as it is placed.
    Full,
    /// Half of each order fills; once the half-fill would drop under one
    /// contract the order fills completely, so a shrinking unwind terminates.
    Partial,
    /// Nothing ever fills; orders rest until cancelled.
    None,
}

/// Simulated per-symbol venue state.
#[derive(Debug, Clone)]
struct SymbolState {
    /// Signed position quantity: positive = long, negative = short.
    qty: Decimal,
    entry_price: Decimal,
    leverage: Option<Decimal>,
    bid: Decimal,
    ask: Decimal,
    resting_orders: u64,
}

#[derive(Debug, Default)]
struct MockState {
    symbols: HashMap<String, SymbolState>,
    balance: Decimal,
    placed: Vec<PlacedOrder>,
    cancel_calls: u64,
    pending_failures: VecDeque<GatewayError>,
}

/// Journal entry for a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
}

/// Mock venue implementing the gateway contract.
pub struct MockGateway {
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicU64,
    fill_mode: RwLock<FillMode>,
    /// Filled fraction applied per order under `FillMode::Partial`.
    partial_fraction: Decimal,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicU64::new(1),
            fill_mode: RwLock::new(FillMode::Full),
            partial_fraction: Decimal::new(5, 1), // half of each order fills
        }
    }

    /// Seed the top-of-book quote for a symbol.
    pub async fn set_book(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.write().await;
        let entry = state
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolState {
                qty: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                leverage: None,
                bid,
                ask,
                resting_orders: 0,
            });
        entry.bid = bid;
        entry.ask = ask;
    }

    /// Seed a signed position (positive = long, negative = short).
    pub async fn set_position(
        &self,
        symbol: &str,
        qty: Decimal,
        entry_price: Decimal,
        leverage: Option<Decimal>,
    ) {
        let mut state = self.state.write().await;
        let entry = state
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolState {
                qty,
                entry_price,
                leverage,
                bid: Decimal::ZERO,
                ask: Decimal::ZERO,
                resting_orders: 0,
            });
        entry.qty = qty;
        entry.entry_price = entry_price;
        entry.leverage = leverage;
    }

    pub async fn set_balance(&self, balance: Decimal) {
        self.state.write().await.balance = balance;
    }

    pub async fn set_fill_mode(&self, mode: FillMode) {
        *self.fill_mode.write().await = mode;
    }

    /// Queue transient failures; the next `n` gateway calls will error.
    pub async fn inject_failures(&self, n: usize) {
        let mut state = self.state.write().await;
        for _ in 0..n {
            state
                .pending_failures
                .push_back(GatewayError::Rejected("injected fault".to_string()));
        }
    }

    /// Orders placed so far, oldest first.
    pub async fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state.read().await.placed.clone()
    }

    /// Number of cancel-all calls issued against the mock.
    pub async fn cancel_calls(&self) -> u64 {
        self.state.read().await.cancel_calls
    }

    /// Resting (unfilled) orders for a symbol.
    pub async fn resting_orders(&self, symbol: &str) -> u64 {
        self.state
            .read()
            .await
            .symbols
            .get(symbol)
            .map(|s| s.resting_orders)
            .unwrap_or(0)
    }

    /// Current signed position quantity for a symbol.
    pub async fn position_qty(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .symbols
            .get(symbol)
            .map(|s| s.qty)
            .unwrap_or(Decimal::ZERO)
    }

    async fn take_failure(&self) -> Option<GatewayError> {
        self.state.write().await.pending_failures.pop_front()
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn best_bid_ask(&self, symbol: &str) -> Result<BestBidAsk, GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let state = self.state.read().await;
        let entry = state
            .symbols
            .get(symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))?;
        Ok(BestBidAsk {
            bid: entry.bid,
            ask: entry.ask,
        })
    }

    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let state = self.state.read().await;
        Ok(state.symbols.get(symbol).map(|s| RawPosition {
            symbol: symbol.to_string(),
            position_amt: s.qty,
            entry_price: s.entry_price,
            mark_price: (s.bid + s.ask) / Decimal::TWO,
            leverage: s.leverage,
            notional: s.qty * (s.bid + s.ask) / Decimal::TWO,
        }))
    }

    async fn position_notional(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let state = self.state.read().await;
        Ok(state
            .symbols
            .get(symbol)
            .map(|s| (s.qty * (s.bid + s.ask) / Decimal::TWO).abs())
            .unwrap_or(Decimal::ZERO))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        let mut state = self.state.write().await;
        state.cancel_calls += 1;
        if let Some(entry) = state.symbols.get_mut(symbol) {
            entry.resting_orders = 0;
        }
        Ok(())
    }

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<OrderResponse, GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }

        let fill_mode = *self.fill_mode.read().await;
        let mut state = self.state.write().await;
        state.placed.push(PlacedOrder {
            symbol: symbol.to_string(),
            side,
            size,
            price,
        });

        let entry = state
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))?;

        let filled = match fill_mode {
            FillMode::Full => size,
            FillMode::Partial => {
                let fraction = size * self.partial_fraction;
                if fraction < Decimal::ONE {
                    size
                } else {
                    fraction
                }
            }
            FillMode::None => Decimal::ZERO,
        };

        // Reduce-only: the fill moves the signed quantity toward zero and
        // never past it.
        let reduction = filled.min(entry.qty.abs());
        match side {
            OrderSide::Buy => entry.qty += reduction,
            OrderSide::Sell => entry.qty -= reduction,
        }
        if filled < size {
            entry.resting_orders += 1;
        }

        let status = if filled == size {
            OrderStatus::Filled
        } else if filled > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        };

        let order_id = self.next_order_id() as i64;
        debug!(
            order_id,
            %symbol,
            side = ?side,
            %size,
            %price,
            %filled,
            "Mock reduce-only order placed"
        );

        Ok(OrderResponse {
            order_id,
            symbol: symbol.to_string(),
            status,
            price,
            orig_qty: size,
            executed_qty: filled,
            side,
            update_time: 0,
        })
    }

    async fn account_balance(&self) -> Result<Decimal, GatewayError> {
        if let Some(err) = self.take_failure().await {
            return Err(err);
        }
        Ok(self.state.read().await.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_full_fill_closes_long() {
        let gw = MockGateway::new();
        gw.set_book("BTCUSDT", dec!(99), dec!(101)).await;
        gw.set_position("BTCUSDT", dec!(2), dec!(95), None).await;

        let resp = gw
            .place_reduce_only_limit("BTCUSDT", OrderSide::Sell, dec!(2), dec!(101))
            .await
            .unwrap();

        assert_eq!(resp.status, OrderStatus::Filled);
        assert_eq!(gw.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_partial_fill_leaves_remainder_resting() {
        let gw = MockGateway::new();
        gw.set_fill_mode(FillMode::Partial).await;
        gw.set_book("BTCUSDT", dec!(99), dec!(101)).await;
        gw.set_position("BTCUSDT", dec!(2), dec!(95), None).await;

        let resp = gw
            .place_reduce_only_limit("BTCUSDT", OrderSide::Sell, dec!(2), dec!(101))
            .await
            .unwrap();

        assert_eq!(resp.status, OrderStatus::PartiallyFilled);
        assert_eq!(gw.position_qty("BTCUSDT").await, dec!(1));
        assert_eq!(gw.resting_orders("BTCUSDT").await, 1);
    }

    #[tokio::test]
    async fn test_reduce_only_never_flips_position() {
        let gw = MockGateway::new();
        gw.set_book("ETHUSDT", dec!(2999), dec!(3001)).await;
        gw.set_position("ETHUSDT", dec!(-1), dec!(3100), None).await;

        // Oversized buy-to-close must stop at flat.
        gw.place_reduce_only_limit("ETHUSDT", OrderSide::Buy, dec!(5), dec!(2999))
            .await
            .unwrap();

        assert_eq!(gw.position_qty("ETHUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_all_is_idempotent() {
        let gw = MockGateway::new();
        gw.set_book("BTCUSDT", dec!(99), dec!(101)).await;

        assert!(gw.cancel_all_orders("BTCUSDT").await.is_ok());
        assert!(gw.cancel_all_orders("BTCUSDT").await.is_ok());
        assert_eq!(gw.cancel_calls().await, 2);
    }

    #[tokio::test]
    async fn test_injected_failures_drain() {
        let gw = MockGateway::new();
        gw.set_book("BTCUSDT", dec!(99), dec!(101)).await;
        gw.inject_failures(1).await;

        let err = gw.best_bid_ask("BTCUSDT").await.unwrap_err();
        assert!(err.is_transient());
        assert!(gw.best_bid_ask("BTCUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_symbol_errors() {
        let gw = MockGateway::new();
        assert!(matches!(
            gw.best_bid_ask("NOPEUSD").await,
            Err(GatewayError::UnknownSymbol(_))
        ));
    }
}
