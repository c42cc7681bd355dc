//! Position risk supervision.
//!
//! The control loop, leaves first:
//! - `position`: canonical position snapshot, rebuilt from the gateway each poll
//! - `pnl`: unrealized return evaluation
//! - `kill_switch`: the unwind state machine that drives a position to flat
//! - `supervisor`: the per-symbol tick loop that enforces the risk policy

mod kill_switch;
mod pnl;
mod position;
mod supervisor;

pub use kill_switch::{KillSwitch, StepOutcome, UnwindOutcome, UnwindRun, UnwindState};
pub use pnl::unrealized_return_pct;
pub use position::{normalize, Position, Side};
pub use supervisor::{RiskPolicy, RiskSupervisor, TickAction};
