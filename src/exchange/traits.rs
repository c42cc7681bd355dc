//! Venue-agnostic gateway contract consumed by the risk core.
//!
//! The supervisor and kill switch only ever see this trait, so any venue that
//! can quote a book, report a position, cancel orders, and accept reduce-only
//! limit orders can sit behind them.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{BestBidAsk, OrderResponse, OrderSide, RawPosition};

/// Errors surfaced by a gateway implementation.
///
/// The split matters to the control loop: transient errors turn the current
/// tick or unwind iteration into a no-op and the loop carries on; fatal
/// configuration errors abort startup before the loop ever runs.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network-level failure (timeout, connection reset, DNS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Exchange throttled the request.
    #[error("rate limited by exchange")]
    RateLimited,

    /// Exchange accepted the request but refused to act on it.
    #[error("exchange rejected request: {0}")]
    Rejected(String),

    /// Response arrived but could not be decoded.
    #[error("malformed exchange response: {0}")]
    Malformed(String),

    /// The symbol does not exist on this venue. Configuration error.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl GatewayError {
    /// Whether the loop may simply retry on its next scheduled iteration.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::UnknownSymbol(_))
    }
}

/// Market-data and order-execution gateway for one venue.
///
/// All calls are symbol-scoped round-trips with no internal queuing; they are
/// safe to issue concurrently from loops supervising different symbols.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Current top-of-book quote for the symbol.
    async fn best_bid_ask(&self, symbol: &str) -> Result<BestBidAsk, GatewayError>;

    /// Current raw position record, or `None` when the venue reports nothing
    /// for the symbol.
    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, GatewayError>;

    /// Absolute notional cost of the open position (zero when flat).
    async fn position_notional(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    /// Cancel every resting order for the symbol. Idempotent: succeeds when
    /// there is nothing to cancel.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError>;

    /// Submit a reduce-only limit order at the given price.
    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<OrderResponse, GatewayError>;

    /// Total account value in the quote currency.
    async fn account_balance(&self) -> Result<Decimal, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_symbol_is_fatal() {
        assert!(!GatewayError::UnknownSymbol("NOPEUSD".into()).is_transient());
    }

    #[test]
    fn test_rejection_is_transient() {
        assert!(GatewayError::Rejected("order would not reduce".into()).is_transient());
        assert!(GatewayError::RateLimited.is_transient());
    }
}
