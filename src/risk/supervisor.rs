//! Risk supervisor: the per-symbol control loop.
//!
//! Each tick rebuilds the position snapshot from the gateway, evaluates the
//! unrealized return and notional exposure against the policy, and hands the
//! position to the kill switch when a limit is breached. One supervisor owns
//! one symbol; loops for different symbols share nothing but the gateway
//! handle, so they run as independent tasks.

use crate::config::Config;
use crate::exchange::{ExchangeGateway, GatewayError};
use crate::risk::kill_switch::{sleep_with_shutdown, KillSwitch, UnwindOutcome};
use crate::risk::pnl::unrealized_return_pct;
use crate::risk::position::normalize;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Immutable risk limits and cadence for one supervised symbol.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    /// Take-profit threshold: close when return exceeds this percent.
    pub target_percent: Decimal,
    /// Stop-loss threshold (negative): close when return falls to it.
    pub max_loss_percent: Decimal,
    /// Notional exposure ceiling: breach forces a close regardless of PnL.
    pub max_notional: Decimal,
    /// Account-value floor: while in a position, dipping below forces a close.
    pub min_account_value: Option<Decimal>,
    pub poll_interval: Duration,
    pub fill_wait: Duration,
    /// Pause after an emergency close before polling resumes.
    pub cooldown: Duration,
    /// Kill-switch iteration bound; 0 = unbounded.
    pub max_unwind_attempts: u32,
}

impl RiskPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_percent: config.risk.target_percent,
            max_loss_percent: config.risk.max_loss_percent,
            max_notional: config.risk.max_notional,
            min_account_value: config.risk.min_account_value,
            poll_interval: Duration::from_secs(config.timing.poll_interval_secs),
            fill_wait: Duration::from_secs(config.timing.fill_wait_secs),
            cooldown: Duration::from_secs(config.timing.cooldown_secs),
            max_unwind_attempts: config.risk.max_unwind_attempts,
        }
    }
}

/// What a supervisor tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickAction {
    /// No limit breached (or no position open).
    NoOp,
    /// Take-profit hit; the position was unwound.
    ClosedOnTarget,
    /// Stop-loss hit; the position was unwound.
    ClosedOnStopLoss,
    /// Notional ceiling breached; emergency unwind.
    ClosedOnNotionalBreach,
    /// Account value fell through the floor; emergency unwind.
    ClosedOnAccountFloor,
}

impl TickAction {
    /// Emergency closes are followed by an extended pause so risk is not
    /// immediately re-opened.
    pub fn requires_cooldown(&self) -> bool {
        matches!(
            self,
            TickAction::ClosedOnNotionalBreach | TickAction::ClosedOnAccountFloor
        )
    }
}

/// Structured record of a forced close, emitted as JSON for log scraping.
#[derive(Debug, Serialize)]
struct CloseEvent<'a> {
    timestamp: DateTime<Utc>,
    symbol: &'a str,
    action: TickAction,
    return_pct: Decimal,
    flattened: bool,
    unwind_attempts: u32,
}

impl CloseEvent<'_> {
    fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        info!(target: "risk_event", "CLOSE_EVENT: {}", json);
    }
}

/// Per-symbol risk control loop.
pub struct RiskSupervisor {
    symbol: String,
    policy: RiskPolicy,
    gateway: Arc<dyn ExchangeGateway>,
    kill_switch: KillSwitch,
}

impl RiskSupervisor {
    pub fn new(symbol: &str, policy: RiskPolicy, gateway: Arc<dyn ExchangeGateway>) -> Self {
        let kill_switch = KillSwitch::new(
            gateway.clone(),
            policy.fill_wait,
            policy.max_unwind_attempts,
        );
        Self {
            symbol: symbol.to_string(),
            policy,
            gateway,
            kill_switch,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Resolve the symbol against the venue once, before the loop starts.
    /// An unknown symbol is a configuration error and must fail here, not
    /// inside the loop.
    pub async fn preflight(&self) -> Result<(), GatewayError> {
        self.gateway.best_bid_ask(&self.symbol).await.map(|_| ())
    }

    /// Evaluate the position once and unwind if a limit is breached.
    ///
    /// The take-profit check strictly precedes the stop-loss check; the
    /// notional and account-floor checks are unconditional of PnL and run
    /// when neither PnL limit fired.
    pub async fn tick(&self, shutdown: &AtomicBool) -> Result<TickAction, GatewayError> {
        let raw = self.gateway.position(&self.symbol).await?;
        let position = normalize(&self.symbol, raw);

        if position.is_flat() {
            debug!(symbol = %self.symbol, "No open position");
            return Ok(TickAction::NoOp);
        }

        let quote = self.gateway.best_bid_ask(&self.symbol).await?;
        let percent = unrealized_return_pct(&position, quote.mid());

        debug!(
            symbol = %self.symbol,
            side = %position.side,
            size = %position.size,
            entry = %position.entry_price,
            mark = %quote.mid(),
            return_pct = %percent,
            "Tick"
        );

        if percent > self.policy.target_percent {
            info!(
                symbol = %self.symbol,
                return_pct = %percent,
                target = %self.policy.target_percent,
                "Target profit hit, closing position"
            );
            return Ok(self
                .close(TickAction::ClosedOnTarget, percent, shutdown)
                .await);
        }

        if percent <= self.policy.max_loss_percent {
            info!(
                symbol = %self.symbol,
                return_pct = %percent,
                max_loss = %self.policy.max_loss_percent,
                "Max loss hit, closing position"
            );
            return Ok(self
                .close(TickAction::ClosedOnStopLoss, percent, shutdown)
                .await);
        }

        let notional = self.gateway.position_notional(&self.symbol).await?;
        if notional > self.policy.max_notional {
            warn!(
                symbol = %self.symbol,
                %notional,
                max_notional = %self.policy.max_notional,
                "Notional ceiling breached, emergency close"
            );
            return Ok(self
                .close(TickAction::ClosedOnNotionalBreach, percent, shutdown)
                .await);
        }

        if let Some(floor) = self.policy.min_account_value {
            let balance = self.gateway.account_balance().await?;
            if balance < floor {
                warn!(
                    symbol = %self.symbol,
                    %balance,
                    %floor,
                    "Account value under floor, emergency close"
                );
                return Ok(self
                    .close(TickAction::ClosedOnAccountFloor, percent, shutdown)
                    .await);
            }
        }

        Ok(TickAction::NoOp)
    }

    /// Run the kill switch to completion and report the action taken.
    async fn close(&self, action: TickAction, percent: Decimal, shutdown: &AtomicBool) -> TickAction {
        let outcome = self.kill_switch.run_to_flat(&self.symbol, shutdown).await;

        let (flattened, attempts) = match outcome {
            UnwindOutcome::Flattened { attempts } => (true, attempts),
            UnwindOutcome::Cancelled { attempts, .. }
            | UnwindOutcome::Exhausted { attempts, .. } => (false, attempts),
        };

        CloseEvent {
            timestamp: Utc::now(),
            symbol: &self.symbol,
            action,
            return_pct: percent,
            flattened,
            unwind_attempts: attempts,
        }
        .emit();

        action
    }

    /// Poll on the configured cadence until shutdown. Ticks are strictly
    /// sequential: a tick (including any unwind it triggers) runs to
    /// completion before the next one is scheduled.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<(), GatewayError> {
        info!(
            symbol = %self.symbol,
            target = %self.policy.target_percent,
            max_loss = %self.policy.max_loss_percent,
            max_notional = %self.policy.max_notional,
            poll_secs = self.policy.poll_interval.as_secs(),
            "Supervisor started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            let wait = match self.tick(&shutdown).await {
                Ok(action) => {
                    if action.requires_cooldown() {
                        info!(
                            symbol = %self.symbol,
                            cooldown_secs = self.policy.cooldown.as_secs(),
                            "Emergency close done, cooling down"
                        );
                        self.policy.cooldown
                    } else {
                        self.policy.poll_interval
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(symbol = %self.symbol, error = %e, "Tick failed, will retry next poll");
                    self.policy.poll_interval
                }
                Err(e) => {
                    error!(symbol = %self.symbol, error = %e, "Fatal gateway error, stopping supervisor");
                    return Err(e);
                }
            };

            sleep_with_shutdown(wait, &shutdown).await;
        }

        info!(symbol = %self.symbol, "Supervisor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::{FillMode, MockGateway, PlacedOrder};
    use crate::exchange::OrderSide;
    use rust_decimal_macros::dec;

    fn test_policy() -> RiskPolicy {
        RiskPolicy {
            target_percent: dec!(9),
            max_loss_percent: dec!(-8),
            max_notional: dec!(1000000),
            min_account_value: None,
            poll_interval: Duration::from_millis(5),
            fill_wait: Duration::from_millis(1),
            cooldown: Duration::from_millis(5),
            max_unwind_attempts: 0,
        }
    }

    fn supervisor(gw: Arc<MockGateway>, policy: RiskPolicy) -> RiskSupervisor {
        RiskSupervisor::new("BTCUSDT", policy, gw)
    }

    fn no_shutdown() -> AtomicBool {
        AtomicBool::new(false)
    }

    async fn only_order(gw: &MockGateway) -> PlacedOrder {
        let orders = gw.placed_orders().await;
        assert_eq!(orders.len(), 1);
        orders[0].clone()
    }

    #[tokio::test]
    async fn test_flat_position_is_noop() {
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(100), dec!(100)).await;

        let sup = supervisor(gw.clone(), test_policy());
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::NoOp);
        assert!(gw.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_target_hit_closes_long_at_ask() {
        // Long 10 @ 100, marked at 112 => +12% against a +9% target.
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(112), dec!(112)).await;
        gw.set_position("BTCUSDT", dec!(10), dec!(100), Some(dec!(1)))
            .await;

        let sup = supervisor(gw.clone(), test_policy());
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::ClosedOnTarget);
        let order = only_order(&gw).await;
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.size, dec!(10));
        assert_eq!(order.price, dec!(112));
        assert_eq!(gw.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_short_at_bid() {
        // Short 5 @ 50 with 2x leverage, marked at 53 => -12% against -8%.
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(53), dec!(53)).await;
        gw.set_position("BTCUSDT", dec!(-5), dec!(50), Some(dec!(2)))
            .await;

        let sup = supervisor(gw.clone(), test_policy());
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::ClosedOnStopLoss);
        let order = only_order(&gw).await;
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.size, dec!(5));
        assert_eq!(order.price, dec!(53));
    }

    #[tokio::test]
    async fn test_within_limits_is_noop() {
        // Long 1 @ 100 marked at 104: +4%, inside (-8, +9).
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(104), dec!(104)).await;
        gw.set_position("BTCUSDT", dec!(1), dec!(100), None).await;

        let sup = supervisor(gw.clone(), test_policy());
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::NoOp);
        assert!(gw.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_notional_breach_closes_unconditionally() {
        // Flat PnL (entry == mark) but 10 * 120 = 1200 notional over a 1000
        // ceiling.
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(120), dec!(120)).await;
        gw.set_position("BTCUSDT", dec!(10), dec!(120), None).await;

        let mut policy = test_policy();
        policy.max_notional = dec!(1000);
        let sup = supervisor(gw.clone(), policy);
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::ClosedOnNotionalBreach);
        assert!(action.requires_cooldown());
        assert_eq!(gw.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_account_floor_closes_unconditionally() {
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(100), dec!(100)).await;
        gw.set_position("BTCUSDT", dec!(1), dec!(100), None).await;
        gw.set_balance(dec!(5)).await;

        let mut policy = test_policy();
        policy.min_account_value = Some(dec!(7));
        let sup = supervisor(gw.clone(), policy);
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::ClosedOnAccountFloor);
        assert!(action.requires_cooldown());
        assert_eq!(gw.position_qty("BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_target_checked_before_stop_loss() {
        // A pathological policy where both thresholds are satisfied at once:
        // return of -15% exceeds a -20% "target" and is under the -10% stop.
        // The target check must win.
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(85), dec!(85)).await;
        gw.set_position("BTCUSDT", dec!(1), dec!(100), None).await;

        let mut policy = test_policy();
        policy.target_percent = dec!(-20);
        policy.max_loss_percent = dec!(-10);
        let sup = supervisor(gw.clone(), policy);
        let action = sup.tick(&no_shutdown()).await.unwrap();

        assert_eq!(action, TickAction::ClosedOnTarget);
    }

    #[tokio::test]
    async fn test_transient_gateway_error_surfaces_as_retryable() {
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(100), dec!(100)).await;
        gw.set_position("BTCUSDT", dec!(1), dec!(100), None).await;
        gw.inject_failures(1).await;

        let sup = supervisor(gw.clone(), test_policy());
        let err = sup.tick(&no_shutdown()).await.unwrap_err();

        assert!(err.is_transient());
        assert!(gw.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails_preflight() {
        let gw = Arc::new(MockGateway::new());
        let sup = RiskSupervisor::new("NOPEUSD", test_policy(), gw);

        assert!(matches!(
            sup.preflight().await,
            Err(GatewayError::UnknownSymbol(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let gw = Arc::new(MockGateway::new());
        gw.set_book("BTCUSDT", dec!(100), dec!(100)).await;

        let shutdown = Arc::new(AtomicBool::new(false));
        let sup = Arc::new(supervisor(gw, test_policy()));

        let task = {
            let sup = sup.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sup.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.store(true, Ordering::SeqCst);

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_external_fill_mid_unwind_places_no_second_order() {
        // The close order rests unfilled, but the position is flattened
        // externally before the next unwind iteration re-queries it.
        let gw = Arc::new(MockGateway::new());
        gw.set_fill_mode(FillMode::None).await;
        gw.set_book("BTCUSDT", dec!(115), dec!(115)).await;
        gw.set_position("BTCUSDT", dec!(2), dec!(100), None).await;

        // Long fill-wait so exactly one unwind iteration runs before the
        // external fill lands.
        let mut policy = test_policy();
        policy.fill_wait = Duration::from_millis(200);
        let sup = Arc::new(supervisor(gw.clone(), policy));

        let tick = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.tick(&AtomicBool::new(false)).await })
        };

        // Give the first unwind iteration time to place its order, then
        // simulate the external fill.
        tokio::time::sleep(Duration::from_millis(50)).await;
        gw.set_position("BTCUSDT", Decimal::ZERO, dec!(100), None)
            .await;

        let action = tick.await.unwrap().unwrap();
        assert_eq!(action, TickAction::ClosedOnTarget);
        assert_eq!(gw.placed_orders().await.len(), 1);
    }
}
