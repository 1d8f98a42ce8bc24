use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::{
    ContractDetail, ExchangeGateway, GatewayError, GatewayResult, OrderRecord, OrderRequest,
    OrderStatus, OrderType,
};
use crate::models::{Candle, Side};
use async_trait::async_trait;

const SUBMIT_PATH: &str = "/api/v1/private/order/submit";
const CANCEL_PATH: &str = "/api/v1/private/order/cancel";
const ORDER_GET_PATH: &str = "/api/v1/private/order/get";
const POSITIONS_PATH: &str = "/api/v1/private/position/open_positions";
const KLINE_PATH: &str = "/api/v1/contract/kline";
const DETAIL_PATH: &str = "/api/v1/contract/detail";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REQUESTS_PER_SEC: u32 = 10;

type HmacSha256 = Hmac<Sha256>;

/// REST gateway for MEXC-style futures endpoints.
///
/// Private endpoints are signed with HMAC-SHA256 over
/// `api_key + timestamp + payload`; all requests pass a local rate limiter
/// so bursts never hit the exchange limits.
pub struct MexcGateway {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    limiter: DefaultDirectRateLimiter,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    code: i64,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    state: i32,
    #[serde(default)]
    vol: f64,
    #[serde(default)]
    deal_vol: f64,
    #[serde(default)]
    deal_avg_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    hold_vol: f64,
    /// 1 = long, 2 = short
    position_type: i32,
}

#[derive(Debug, Deserialize)]
struct RawKlines {
    time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    vol: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetail {
    price_unit: f64,
    vol_unit: f64,
}

impl MexcGateway {
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Self {
        // NonZeroU32 of a nonzero constant cannot fail
        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SEC).unwrap());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            limiter: RateLimiter::direct(quota),
        }
    }

    fn sign(&self, timestamp: &str, payload: &str) -> GatewayResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| GatewayError::Rejected(format!("bad api secret: {}", e)))?;
        mac.update(self.api_key.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn private_post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> GatewayResult<ApiResponse<T>> {
        self.limiter.until_ready().await;
        let payload = body.to_string();
        let ts = Utc::now().timestamp_millis().to_string();
        let sign = self.sign(&ts, &payload)?;

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
            .header("ApiKey", &self.api_key)
            .header("Request-Time", &ts)
            .header("Signature", sign)
            .json(body)
            .send()
            .await?;

        if resp.status().is_server_error() {
            return Err(GatewayError::Transport(format!(
                "server error {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn private_get<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> GatewayResult<ApiResponse<T>> {
        self.limiter.until_ready().await;
        let ts = Utc::now().timestamp_millis().to_string();
        let query = path_and_query.split_once('?').map(|(_, q)| q).unwrap_or("");
        let sign = self.sign(&ts, query)?;

        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .timeout(REQUEST_TIMEOUT)
            .header("ApiKey", &self.api_key)
            .header("Request-Time", &ts)
            .header("Signature", sign)
            .send()
            .await?;

        if resp.status().is_server_error() {
            return Err(GatewayError::Transport(format!(
                "server error {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> GatewayResult<ApiResponse<T>> {
        self.limiter.until_ready().await;
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if resp.status().is_server_error() {
            return Err(GatewayError::Transport(format!(
                "server error {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Wire code for the order side: 1 open long, 3 open short,
    /// 4 close long, 2 close short
    fn side_code(side: Side, reduce_only: bool) -> i32 {
        match (side, reduce_only) {
            (Side::Long, false) => 1,
            (Side::Short, false) => 3,
            (Side::Long, true) => 4,
            (Side::Short, true) => 2,
        }
    }

    fn type_code(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Market | OrderType::StopMarket => "5",
            OrderType::Limit => "2",
        }
    }

    fn map_state(state: i32) -> OrderStatus {
        match state {
            1 | 2 => OrderStatus::Open,
            3 => OrderStatus::Filled,
            4 | 5 => OrderStatus::Canceled,
            _ => OrderStatus::Unknown,
        }
    }
}

#[async_trait]
impl ExchangeGateway for MexcGateway {
    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String> {
        let mut body = json!({
            "symbol": req.symbol,
            "side": Self::side_code(req.side, req.reduce_only),
            "type": Self::type_code(req.order_type),
            "openType": 1,
            "vol": format!("{}", req.size),
            "leverage": req.leverage,
        });
        if let Some(price) = req.price {
            body["price"] = json!(format!("{}", price));
        }
        if let Some(trigger) = req.trigger_price {
            body["triggerPrice"] = json!(format!("{}", trigger));
        }
        if let Some(stop) = req.attached_stop {
            body["stopLossPrice"] = json!(format!("{}", stop));
        }

        let resp: ApiResponse<serde_json::Value> = self.private_post(SUBMIT_PATH, &body).await?;
        if !resp.success || resp.code != 0 {
            return Err(GatewayError::Rejected(
                resp.message.unwrap_or_else(|| format!("code {}", resp.code)),
            ));
        }
        match resp.data {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            other => Err(GatewayError::Rejected(format!(
                "missing order id in response: {:?}",
                other
            ))),
        }
    }

    async fn query_order(&self, order_id: &str) -> GatewayResult<OrderRecord> {
        let resp: ApiResponse<RawOrder> = self
            .private_get(&format!("{}/{}", ORDER_GET_PATH, order_id))
            .await?;
        // an unindexed order is not an error, it is "no decision yet"
        let raw = match resp.data {
            Some(raw) if resp.success => raw,
            _ => {
                return Ok(OrderRecord {
                    order_id: order_id.to_string(),
                    status: OrderStatus::Unknown,
                    amount: 0.0,
                    filled_qty: 0.0,
                    avg_price: 0.0,
                })
            }
        };
        Ok(OrderRecord {
            order_id: order_id.to_string(),
            status: Self::map_state(raw.state),
            amount: raw.vol,
            filled_qty: raw.deal_vol,
            avg_price: raw.deal_avg_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let body = json!([order_id]);
        let resp: ApiResponse<serde_json::Value> = self.private_post(CANCEL_PATH, &body).await?;
        if !resp.success {
            return Err(GatewayError::Rejected(
                resp.message.unwrap_or_else(|| "cancel refused".to_string()),
            ));
        }
        Ok(())
    }

    async fn open_position_size(&self, symbol: &str) -> GatewayResult<f64> {
        let resp: ApiResponse<Vec<RawPosition>> = self
            .private_get(&format!("{}?symbol={}", POSITIONS_PATH, symbol))
            .await?;
        if !resp.success {
            return Err(GatewayError::Rejected(
                resp.message
                    .unwrap_or_else(|| "position query refused".to_string()),
            ));
        }
        let net = resp
            .data
            .unwrap_or_default()
            .iter()
            .map(|p| {
                if p.position_type == 2 {
                    -p.hold_vol
                } else {
                    p.hold_vol
                }
            })
            .sum();
        Ok(net)
    }

    async fn recent_candles(&self, symbol: &str, limit: usize) -> GatewayResult<Vec<Candle>> {
        let resp: ApiResponse<RawKlines> = self
            .public_get(&format!(
                "{}/{}?interval=Min1&limit={}",
                KLINE_PATH, symbol, limit
            ))
            .await?;
        let raw = match resp.data {
            Some(raw) if resp.success => raw,
            _ => {
                return Err(GatewayError::Rejected(
                    resp.message.unwrap_or_else(|| "kline query failed".to_string()),
                ))
            }
        };

        // the exchange occasionally ships ragged arrays; truncate to the
        // shortest rather than panic
        let n = raw
            .time
            .len()
            .min(raw.open.len())
            .min(raw.high.len())
            .min(raw.low.len())
            .min(raw.close.len())
            .min(raw.vol.len());
        let mut candles = Vec::with_capacity(n);
        for i in 0..n {
            let Some(open_time) = DateTime::from_timestamp(raw.time[i], 0) else {
                continue;
            };
            candles.push(Candle {
                open_time,
                open: raw.open[i],
                high: raw.high[i],
                low: raw.low[i],
                close: raw.close[i],
                volume: raw.vol[i],
                // the newest bar is still forming
                confirmed: i + 1 < n,
            });
        }
        Ok(candles)
    }

    async fn contract_detail(&self, symbol: &str) -> GatewayResult<ContractDetail> {
        let resp: ApiResponse<RawDetail> = self
            .public_get(&format!("{}?symbol={}", DETAIL_PATH, symbol))
            .await?;
        let raw = match resp.data {
            Some(raw) if resp.success => raw,
            _ => {
                return Err(GatewayError::Rejected(
                    resp.message
                        .unwrap_or_else(|| "contract detail query failed".to_string()),
                ))
            }
        };
        Ok(ContractDetail {
            tick: raw.price_unit,
            min_step: raw.vol_unit,
        })
    }

    fn supports_attached_stop(&self) -> bool {
        true
    }
}
