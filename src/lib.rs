//! # Position Sentinel
//!
//! An automated position-risk supervisor for perpetual futures: a closed
//! control loop that reconciles an account's live exchange position against
//! risk limits (target profit, max loss, max notional exposure, minimum
//! account value) and, when a limit is breached, drives the position to flat
//! through a retrying reduce-only order protocol (the kill switch).
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Gateway trait, futures REST client, and mock gateway
//! - `risk`: Position normalization, PnL evaluation, kill switch, supervisor
//! - `utils`: Shared decimal arithmetic helpers

pub mod config;
pub mod exchange;
pub mod risk;
pub mod utils;

pub use config::Config;
