// =============================================================================
// Binance USD-M Futures Client — HMAC-SHA256 signed requests
// =============================================================================
//
// Grounded on the reference engine's `binance::client::BinanceClient`: same
// signing scheme (HMAC-SHA256 over the query string, `X-MBX-APIKEY` header,
// 5 000 ms recvWindow), same error-handling shape (status check then
// `anyhow::bail!` with the response body echoed back). Retargeted from spot
// `/api/v3/*` to USD-M perpetual-futures `/fapi/v1|v2/*`, and narrowed to the
// six operations the order manager actually needs.
//
// SECURITY: the secret key is never logged or serialized.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Order type understood by the venue adapter. The order manager only ever
/// submits an entry (MARKET) and a protective exit (STOP_MARKET).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    StopMarket,
}

/// Classified venue-call failure, per §7's error taxonomy. Distinguishes
/// what the order manager and orchestrator must do on failure: retry
/// `Transient` with backoff, surface `Reject` without touching system
/// status, and escalate `Authentication` straight to SAFE_MODE.
#[derive(Debug, Clone)]
pub enum VenueError {
    /// 5xx, rate limit (429), request timeout, or a transport-level
    /// failure (connection reset, DNS). Worth retrying.
    Transient(String),
    /// 4xx other than auth: filter violation, insufficient margin, unknown
    /// symbol. Retrying would not help; the decision is simply aborted.
    Reject(String),
    /// 401/403: credentials are bad or revoked. No retry will ever succeed.
    Authentication(String),
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient venue error: {msg}"),
            Self::Reject(msg) => write!(f, "venue rejected request: {msg}"),
            Self::Authentication(msg) => write!(f, "venue authentication failure: {msg}"),
        }
    }
}

impl std::error::Error for VenueError {}

/// Classify a non-2xx HTTP response into the §7 taxonomy.
fn classify_status(status: reqwest::StatusCode, context: &str, body: &serde_json::Value) -> VenueError {
    let detail = format!("{context}: {status}: {body}");
    if status.as_u16() == 401 || status.as_u16() == 403 {
        VenueError::Authentication(detail)
    } else if status.is_server_error() || status.as_u16() == 429 {
        VenueError::Transient(detail)
    } else {
        VenueError::Reject(detail)
    }
}

/// Classify a transport-level failure (the request never got a response).
fn classify_transport_error(context: &str, err: reqwest::Error) -> VenueError {
    VenueError::Transient(format!("{context}: {err}"))
}

impl OrderType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::StopMarket => "STOP_MARKET",
        }
    }
}

/// Per-instrument lot-step / tick-size / minimum-notional filters, fetched
/// once at startup and cached by the order manager.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentFilters {
    pub lot_step: f64,
    pub tick_size: f64,
    pub min_notional: f64,
}

/// Acknowledgement returned by the venue for a submitted or queried order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub avg_price: f64,
    pub executed_qty: f64,
}

/// The venue's view of one open position, used for reconciliation on
/// restart.
#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub instrument: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Clone)]
pub struct BinanceFuturesClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut c = Self::new(api_key, secret);
        c.base_url = base_url.into();
        c
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// POST /fapi/v1/leverage (signed).
    #[instrument(skip(self), name = "binance_futures::set_leverage")]
    pub async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<()> {
        let params = format!("symbol={instrument}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/leverage request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse leverage response")?;

        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/leverage returned {}: {}", status, body);
        }

        debug!(instrument, leverage, "leverage set");
        Ok(())
    }

    /// GET /fapi/v1/exchangeInfo filtered by symbol — extracts LOT_SIZE,
    /// PRICE_FILTER, and MIN_NOTIONAL.
    #[instrument(skip(self), name = "binance_futures::exchange_info")]
    pub async fn exchange_info(&self, instrument: &str) -> Result<InstrumentFilters> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/exchangeInfo request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse exchangeInfo response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/exchangeInfo returned {}: {}", status, body);
        }

        let symbols = body["symbols"].as_array().context("exchangeInfo missing symbols array")?;
        let entry = symbols
            .iter()
            .find(|s| s["symbol"].as_str() == Some(instrument))
            .with_context(|| format!("{instrument} not found in exchangeInfo"))?;

        let filters = entry["filters"].as_array().context("symbol entry missing filters array")?;

        let mut lot_step = 0.001;
        let mut tick_size = 0.01;
        let mut min_notional = 5.0;

        for f in filters {
            match f["filterType"].as_str() {
                Some("LOT_SIZE") => {
                    if let Some(step) = f["stepSize"].as_str().and_then(|s| s.parse().ok()) {
                        lot_step = step;
                    }
                }
                Some("PRICE_FILTER") => {
                    if let Some(tick) = f["tickSize"].as_str().and_then(|s| s.parse().ok()) {
                        tick_size = tick;
                    }
                }
                Some("MIN_NOTIONAL") => {
                    if let Some(min) = f["notional"].as_str().and_then(|s| s.parse().ok()) {
                        min_notional = min;
                    }
                }
                _ => {}
            }
        }

        debug!(instrument, lot_step, tick_size, min_notional, "symbol filters retrieved");
        Ok(InstrumentFilters { lot_step, tick_size, min_notional })
    }

    /// POST /fapi/v1/order (signed).
    #[instrument(skip(self, stop_price), name = "binance_futures::new_order")]
    pub async fn new_order(
        &self,
        instrument: &str,
        side: &str,
        order_type: OrderType,
        quantity: f64,
        stop_price: Option<f64>,
        reduce_only: bool,
    ) -> Result<OrderAck, VenueError> {
        let mut params = format!(
            "symbol={instrument}&side={side}&type={}&quantity={quantity}",
            order_type.as_str()
        );
        if let Some(sp) = stop_price {
            params.push_str(&format!("&stopPrice={sp}"));
        }
        if reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        debug!(instrument, side, order_type = order_type.as_str(), quantity, "submitting order");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error("POST /fapi/v1/order request failed", e))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::Transient(format!("failed to parse order response: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status, "Binance POST /fapi/v1/order", &body));
        }

        Ok(parse_order_ack(&body))
    }

    /// DELETE /fapi/v1/order (signed).
    #[instrument(skip(self), name = "binance_futures::cancel_order")]
    pub async fn cancel_order(&self, instrument: &str, order_id: &str) -> Result<()> {
        let params = format!("symbol={instrument}&orderId={order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /fapi/v1/order request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse cancel response")?;

        if !status.is_success() {
            anyhow::bail!("Binance DELETE /fapi/v1/order returned {}: {}", status, body);
        }

        debug!(instrument, order_id, "order cancelled");
        Ok(())
    }

    /// GET /fapi/v1/openOrders (signed).
    #[instrument(skip(self), name = "binance_futures::open_orders")]
    pub async fn open_orders(&self, instrument: &str) -> Result<Vec<OrderAck>> {
        let params = format!("symbol={instrument}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/openOrders?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/openOrders request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("failed to parse openOrders response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/openOrders returned {}: {}", status, body);
        }

        let orders = body.as_array().cloned().unwrap_or_default();
        Ok(orders.iter().map(parse_order_ack).collect())
    }

    /// GET /fapi/v2/positionRisk (signed) — the venue's view of open
    /// positions, used to reconcile local state after a restart.
    #[instrument(skip(self), name = "binance_futures::positions")]
    pub async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_transport_error("GET /fapi/v2/positionRisk request failed", e))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::Transient(format!("failed to parse positionRisk response: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status, "Binance GET /fapi/v2/positionRisk", &body));
        }

        let entries = body.as_array().cloned().unwrap_or_default();
        let positions = entries
            .iter()
            .filter_map(|e| {
                let quantity: f64 = e["positionAmt"].as_str()?.parse().ok()?;
                if quantity == 0.0 {
                    return None;
                }
                Some(VenuePosition {
                    instrument: e["symbol"].as_str().unwrap_or_default().to_string(),
                    quantity,
                    entry_price: e["entryPrice"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                    unrealized_pnl: e["unRealizedProfit"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                })
            })
            .collect();

        Ok(positions)
    }
}

fn parse_order_ack(body: &serde_json::Value) -> OrderAck {
    OrderAck {
        order_id: body["orderId"]
            .as_u64()
            .map(|n| n.to_string())
            .or_else(|| body["orderId"].as_str().map(str::to_string))
            .unwrap_or_default(),
        status: body["status"].as_str().unwrap_or("UNKNOWN").to_string(),
        avg_price: body["avgPrice"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
        executed_qty: body["executedQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_maps_to_binance_strings() {
        assert_eq!(OrderType::Market.as_str(), "MARKET");
        assert_eq!(OrderType::StopMarket.as_str(), "STOP_MARKET");
    }

    #[test]
    fn parse_order_ack_handles_numeric_order_id() {
        let body = serde_json::json!({
            "orderId": 12345,
            "status": "FILLED",
            "avgPrice": "20123.45",
            "executedQty": "0.010",
        });
        let ack = parse_order_ack(&body);
        assert_eq!(ack.order_id, "12345");
        assert_eq!(ack.status, "FILLED");
        assert!((ack.avg_price - 20123.45).abs() < 1e-6);
    }

    #[test]
    fn parse_order_ack_defaults_on_missing_fields() {
        let body = serde_json::json!({});
        let ack = parse_order_ack(&body);
        assert_eq!(ack.status, "UNKNOWN");
        assert_eq!(ack.avg_price, 0.0);
    }

    #[test]
    fn client_redacts_secret_in_debug() {
        let client = BinanceFuturesClient::with_base_url("key", "supersecret", "https://example.invalid");
        let debug_str = format!("{client:?}");
        assert!(!debug_str.contains("supersecret"));
    }

    #[test]
    fn classify_status_treats_401_and_403_as_authentication() {
        let body = serde_json::json!({"code": -2015, "msg": "Invalid API-key"});
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, "ctx", &body),
            VenueError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::FORBIDDEN, "ctx", &body),
            VenueError::Authentication(_)
        ));
    }

    #[test]
    fn classify_status_treats_5xx_and_429_as_transient() {
        let body = serde_json::json!({});
        assert!(matches!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "ctx", &body),
            VenueError::Transient(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "ctx", &body),
            VenueError::Transient(_)
        ));
    }

    #[test]
    fn classify_status_treats_other_4xx_as_reject() {
        let body = serde_json::json!({"code": -1013, "msg": "Filter failure: LOT_SIZE"});
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_REQUEST, "ctx", &body),
            VenueError::Reject(_)
        ));
    }
}
