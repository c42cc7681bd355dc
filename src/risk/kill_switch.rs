//! Kill switch: drives a position to exactly zero size.
//!
//! The unwind is an explicit state machine advanced by discrete steps rather
//! than a thread sleeping inline, so it can be observed, bounded, and
//! cancelled. One step is one pass of the close protocol: cancel resting
//! orders, re-query the position, re-quote the book, and rest a reduce-only
//! limit order for the full remaining size at the top of the book. The
//! passive price keeps fees and slippage down while still sitting at the
//! front of the opposite side of the book.

use crate::exchange::{ExchangeGateway, OrderSide};
use crate::risk::position::{normalize, Side};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularity at which waits re-check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Phase of an unwind run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindState {
    /// Created, position not yet observed.
    Idle,
    /// Close orders are being issued until the position reaches zero.
    Unwinding,
    /// Terminal: the position was observed flat.
    Done,
}

/// Ephemeral state for one flattening operation. Exists only for the
/// duration of the unwind; a later breach starts a fresh run.
#[derive(Debug)]
pub struct UnwindRun {
    pub symbol: String,
    /// Side being unwound, re-derived from each position re-query.
    pub target_side: Side,
    pub remaining: Decimal,
    pub state: UnwindState,
    /// Iterations entered so far, including ones lost to gateway errors.
    pub attempts: u32,
    started_at: Instant,
}

impl UnwindRun {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            target_side: Side::Flat,
            remaining: Decimal::ZERO,
            state: UnwindState::Idle,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Result of a single unwind step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The position is flat; the run is done. Also returned when stepping a
    /// run that already finished, making repeat invocation a no-op.
    Flat,
    /// A reduce-only close order was submitted for the remaining size.
    OrderPlaced {
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    },
    /// A gateway call failed transiently; this iteration was a no-op.
    TransientError,
}

/// Final result of a driven unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOutcome {
    /// The position reached zero size.
    Flattened { attempts: u32 },
    /// Shutdown was requested before the position went flat.
    Cancelled { attempts: u32, remaining: Decimal },
    /// The configured attempt bound ran out before the position went flat.
    Exhausted { attempts: u32, remaining: Decimal },
}

impl UnwindOutcome {
    pub fn is_flat(&self) -> bool {
        matches!(self, UnwindOutcome::Flattened { .. })
    }
}

/// Controller that flattens positions through the gateway.
pub struct KillSwitch {
    gateway: Arc<dyn ExchangeGateway>,
    /// Grace period for a resting close order to fill between steps.
    fill_wait: Duration,
    /// Iteration bound per run; 0 keeps the loop unbounded.
    max_attempts: u32,
}

impl KillSwitch {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, fill_wait: Duration, max_attempts: u32) -> Self {
        Self {
            gateway,
            fill_wait,
            max_attempts,
        }
    }

    /// Execute one unwind iteration.
    ///
    /// Every step re-queries the live position before acting: fills, manual
    /// closes, or another process may have flattened the position since the
    /// previous iteration, in which case no order is placed.
    pub async fn step(&self, run: &mut UnwindRun) -> StepOutcome {
        if run.state == UnwindState::Done {
            return StepOutcome::Flat;
        }

        run.attempts += 1;

        // Resting close orders from the previous iteration are stale; the
        // book has moved. Cancel is idempotent when none exist.
        if let Err(e) = self.gateway.cancel_all_orders(&run.symbol).await {
            warn!(symbol = %run.symbol, error = %e, "Cancel-all failed, skipping iteration");
            return StepOutcome::TransientError;
        }

        let raw = match self.gateway.position(&run.symbol).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(symbol = %run.symbol, error = %e, "Position re-query failed, skipping iteration");
                return StepOutcome::TransientError;
            }
        };

        let position = normalize(&run.symbol, raw);
        if position.is_flat() {
            run.state = UnwindState::Done;
            run.remaining = Decimal::ZERO;
            return StepOutcome::Flat;
        }

        run.state = UnwindState::Unwinding;
        run.target_side = position.side;
        run.remaining = position.size;

        let quote = match self.gateway.best_bid_ask(&run.symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(symbol = %run.symbol, error = %e, "Quote failed, skipping iteration");
                return StepOutcome::TransientError;
            }
        };

        // Long unwinds by selling at the ask, short by buying at the bid.
        let (side, price) = match position.side {
            Side::Long => (OrderSide::Sell, quote.ask),
            Side::Short => (OrderSide::Buy, quote.bid),
            Side::Flat => unreachable!("flat handled above"),
        };

        match self
            .gateway
            .place_reduce_only_limit(&run.symbol, side, position.size, price)
            .await
        {
            Ok(order) => {
                info!(
                    symbol = %run.symbol,
                    order_id = order.order_id,
                    side = ?side,
                    size = %position.size,
                    %price,
                    attempt = run.attempts,
                    "Close order resting"
                );
                StepOutcome::OrderPlaced {
                    side,
                    size: position.size,
                    price,
                }
            }
            Err(e) => {
                warn!(symbol = %run.symbol, error = %e, "Close order rejected, skipping iteration");
                StepOutcome::TransientError
            }
        }
    }

    /// Drive a full unwind for the symbol: step, wait out the fill grace
    /// period, repeat until the position is flat, the attempt bound runs
    /// out, or shutdown is requested. Shutdown is honored at the top of
    /// every iteration.
    pub async fn run_to_flat(&self, symbol: &str, shutdown: &AtomicBool) -> UnwindOutcome {
        let mut run = UnwindRun::new(symbol);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(%symbol, attempts = run.attempts, remaining = %run.remaining, "Unwind cancelled by shutdown");
                return UnwindOutcome::Cancelled {
                    attempts: run.attempts,
                    remaining: run.remaining,
                };
            }

            if self.max_attempts > 0 && run.attempts >= self.max_attempts {
                error!(
                    %symbol,
                    attempts = run.attempts,
                    remaining = %run.remaining,
                    elapsed_secs = run.elapsed().as_secs(),
                    "Unwind attempt bound exhausted without reaching flat"
                );
                return UnwindOutcome::Exhausted {
                    attempts: run.attempts,
                    remaining: run.remaining,
                };
            }

            if run.attempts > 0 {
                warn!(
                    %symbol,
                    attempts = run.attempts,
                    remaining = %run.remaining,
                    elapsed_secs = run.elapsed().as_secs(),
                    "Position still open, continuing unwind"
                );
            }

            match self.step(&mut run).await {
                StepOutcome::Flat => {
                    info!(%symbol, attempts = run.attempts, "Position flat, unwind complete");
                    return UnwindOutcome::Flattened {
                        attempts: run.attempts,
                    };
                }
                StepOutcome::OrderPlaced { .. } | StepOutcome::TransientError => {
                    debug!(%symbol, wait_secs = self.fill_wait.as_secs_f64(), "Waiting for fill");
                    sleep_with_shutdown(self.fill_wait, shutdown).await;
                }
            }
        }
    }
}

/// Sleep for `duration`, returning early if the shutdown flag is raised.
pub(crate) async fn sleep_with_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return;
        }
        tokio::time::sleep(left.min(SHUTDOWN_POLL)).await;
    }
}
