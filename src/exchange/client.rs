//! Futures REST API client.

use crate::config::GatewayConfig;
use crate::exchange::traits::{ExchangeGateway, GatewayError};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Exchange error code for a symbol the venue does not list.
const CODE_UNKNOWN_SYMBOL: i64 = -1121;

/// Futures API client implementing the gateway contract.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

/// Error payload shape for non-2xx responses.
#[derive(Debug, serde::Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

impl BinanceClient {
    /// Create a new client from configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if config.testnet {
            FUTURES_TESTNET_URL.to_string()
        } else {
            FUTURES_BASE_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// Decode a response, mapping exchange failures onto the gateway error
    /// taxonomy so callers can tell a retryable hiccup from a misconfiguration.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(GatewayError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(api_err) = serde_json::from_str::<ApiError>(&body) {
                if api_err.code == CODE_UNKNOWN_SYMBOL {
                    return Err(GatewayError::UnknownSymbol(api_err.msg));
                }
                return Err(GatewayError::Rejected(format!(
                    "{} (code {})",
                    api_err.msg, api_err.code
                )));
            }
            return Err(GatewayError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Build a signed URL for an authenticated endpoint.
    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Self::timestamp()));

        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Fetch the raw position record for a symbol from the position-risk
    /// endpoint. The venue returns a list; the symbol filter keys the lookup.
    async fn fetch_position_record(
        &self,
        symbol: &str,
    ) -> Result<Option<RawPosition>, GatewayError> {
        let url = self.signed_url("/fapi/v2/positionRisk", &[("symbol", symbol.to_string())]);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let positions: Vec<RawPosition> = Self::decode(response).await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    #[instrument(skip(self))]
    async fn best_bid_ask(&self, symbol: &str) -> Result<BestBidAsk, GatewayError> {
        let url = format!(
            "{}/fapi/v1/ticker/bookTicker?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let response = self.http.get(&url).send().await?;

        let ticker: BookTicker = Self::decode(response).await?;
        Ok(ticker.into())
    }

    #[instrument(skip(self))]
    async fn position(&self, symbol: &str) -> Result<Option<RawPosition>, GatewayError> {
        self.fetch_position_record(symbol).await
    }

    #[instrument(skip(self))]
    async fn position_notional(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let notional = self
            .fetch_position_record(symbol)
            .await?
            .map(|p| p.notional.abs())
            .unwrap_or(Decimal::ZERO);
        Ok(notional)
    }

    #[instrument(skip(self))]
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let url = self.signed_url("/fapi/v1/allOpenOrders", &[("symbol", symbol.to_string())]);

        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        // Success body is a plain {code, msg} acknowledgment.
        let _: serde_json::Value = Self::decode(response).await?;
        debug!(%symbol, "Cancelled all resting orders");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<OrderResponse, GatewayError> {
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let params = [
            ("symbol", symbol.to_string()),
            ("side", side_str.to_string()),
            ("type", "LIMIT".to_string()),
            ("quantity", size.to_string()),
            ("price", price.to_string()),
            // Post-only: rest at top of book instead of paying taker fees.
            ("timeInForce", "GTX".to_string()),
            ("reduceOnly", "true".to_string()),
        ];
        let url = self.signed_url("/fapi/v1/order", &params);

        debug!(%symbol, side = side_str, %size, %price, "Placing reduce-only limit order");

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn account_balance(&self) -> Result<Decimal, GatewayError> {
        let url = self.signed_url("/fapi/v2/balance", &[]);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let balances: Vec<AccountBalance> = Self::decode(response).await?;
        let total = balances
            .into_iter()
            .filter(|b| b.asset == "USDT")
            .map(|b| b.margin_balance)
            .sum();
        Ok(total)
    }
}
