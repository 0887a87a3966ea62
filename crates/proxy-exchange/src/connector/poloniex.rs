//! Poloniex 거래소 커넥터.
//!
//! - 공개 API: `GET /public?command=...`
//! - 거래 API: `POST /tradingApi` (form 본문, HMAC-SHA512 서명)
//!
//! 거래소는 일부 에러를 본문 문자열로 보고하므로 응답 본문은 HTTP 상태와
//! 관계없이 그대로 반환합니다. 분류는 `ResultValidator`가 담당합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use proxy_core::{mask_key, ApiCredentials};
use reqwest::Client;
use sha2::Sha512;
use tracing::{debug, warn};

use crate::traits::{ExchangeResult, OrderRequest, PublicApi, RawResponse, TradingApi};
use crate::ExchangeError;

type HmacSha512 = Hmac<Sha512>;

/// 종료 시각 미지정 시 사용하는 차트 데이터 상한.
const OPEN_END: i64 = 9_999_999_999;

// ============================================================================
// 설정
// ============================================================================

/// Poloniex 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct PoloniexConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for PoloniexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://poloniex.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl PoloniexConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn http_client(&self) -> ExchangeResult<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))
    }
}

fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// 응답 본문 추출.
///
/// 본문이 비어 있으면 `None`, 실패 상태이면서 본문도 없으면 HTTP 에러.
async fn read_body(response: reqwest::Response) -> ExchangeResult<RawResponse> {
    let status = response.status();
    let body = response.text().await?;

    if body.trim().is_empty() {
        if status.is_success() {
            return Ok(None);
        }
        return Err(ExchangeError::Http {
            status: status.as_u16(),
            body,
        });
    }

    if !status.is_success() {
        warn!(status = status.as_u16(), "Poloniex returned an error status");
    }
    Ok(Some(body))
}

// ============================================================================
// 공개 API
// ============================================================================

/// Poloniex 공개 API 클라이언트.
#[derive(Debug, Clone)]
pub struct PoloniexPublicClient {
    config: PoloniexConfig,
    client: Client,
}

impl PoloniexPublicClient {
    pub fn new(config: PoloniexConfig) -> ExchangeResult<Self> {
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    async fn public_get(&self, command: &str, params: &[(&str, String)]) -> ExchangeResult<RawResponse> {
        let mut all_params = vec![("command", command.to_string())];
        all_params.extend_from_slice(params);

        let url = format!("{}/public?{}", self.config.base_url, build_query(&all_params));
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        read_body(response).await
    }
}

#[async_trait]
impl PublicApi for PoloniexPublicClient {
    async fn chart_data(
        &self,
        currency_pair: &str,
        period: u64,
        start: i64,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse> {
        self.public_get(
            "returnChartData",
            &[
                ("currencyPair", currency_pair.to_string()),
                ("period", period.to_string()),
                ("start", start.to_string()),
                ("end", end.unwrap_or(OPEN_END).to_string()),
            ],
        )
        .await
    }

    async fn ticker(&self) -> ExchangeResult<RawResponse> {
        self.public_get("returnTicker", &[]).await
    }

    async fn volume_24h(&self) -> ExchangeResult<RawResponse> {
        self.public_get("return24hVolume", &[]).await
    }

    async fn order_book(&self, currency_pair: &str) -> ExchangeResult<RawResponse> {
        self.public_get(
            "returnOrderBook",
            &[("currencyPair", currency_pair.to_string())],
        )
        .await
    }

    async fn public_trade_history(
        &self,
        currency_pair: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse> {
        let mut params = vec![("currencyPair", currency_pair.to_string())];
        if let Some(start) = start {
            params.push(("start", start.to_string()));
        }
        if let Some(end) = end {
            params.push(("end", end.to_string()));
        }
        self.public_get("returnTradeHistory", &params).await
    }
}

// ============================================================================
// 거래 API
// ============================================================================

/// 자격증명 하나에 묶인 Poloniex 거래 API 클라이언트.
pub struct PoloniexTradingClient {
    config: PoloniexConfig,
    client: Client,
    credentials: ApiCredentials,
    nonce: AtomicU64,
}

impl std::fmt::Debug for PoloniexTradingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoloniexTradingClient")
            .field("base_url", &self.config.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl PoloniexTradingClient {
    pub fn new(config: PoloniexConfig, credentials: ApiCredentials) -> ExchangeResult<Self> {
        let client = config.http_client()?;
        Ok(Self {
            config,
            client,
            credentials,
            nonce: AtomicU64::new(0),
        })
    }

    /// 단조 증가 nonce (마이크로초 기반).
    fn next_nonce(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let previous = self
            .nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// 본문 HMAC-SHA512 서명 (hex).
    fn sign(&self, body: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha512::new_from_slice(self.credentials.secret_bytes())
            .map_err(|e| ExchangeError::Unexpected(format!("Invalid signing key: {}", e)))?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed_post(&self, command: &str, params: &[(&str, String)]) -> ExchangeResult<RawResponse> {
        let mut all_params = vec![
            ("command", command.to_string()),
            ("nonce", self.next_nonce().to_string()),
        ];
        all_params.extend_from_slice(params);

        let body = build_query(&all_params);
        let signature = self.sign(&body)?;
        let url = format!("{}/tradingApi", self.config.base_url);

        debug!(command, key = %mask_key(&self.credentials.api_key), "POST (signed) /tradingApi");

        let response = self
            .client
            .post(&url)
            .header("Key", &self.credentials.api_key)
            .header("Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        read_body(response).await
    }

    fn order_params(order: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("currencyPair", order.currency_pair.clone()),
            ("rate", order.rate.normalize().to_string()),
            ("amount", order.amount.normalize().to_string()),
        ];
        if order.fill_or_kill {
            params.push(("fillOrKill", "1".to_string()));
        }
        if order.immediate_or_cancel {
            params.push(("immediateOrCancel", "1".to_string()));
        }
        if order.post_only {
            params.push(("postOnly", "1".to_string()));
        }
        params
    }
}

#[async_trait]
impl TradingApi for PoloniexTradingClient {
    async fn complete_balances(&self) -> ExchangeResult<RawResponse> {
        self.signed_post("returnCompleteBalances", &[]).await
    }

    async fn balances(&self) -> ExchangeResult<RawResponse> {
        self.signed_post("returnBalances", &[]).await
    }

    async fn open_orders(&self, scope: &str) -> ExchangeResult<RawResponse> {
        self.signed_post("returnOpenOrders", &[("currencyPair", scope.to_string())])
            .await
    }

    async fn trade_history(&self, scope: &str) -> ExchangeResult<RawResponse> {
        self.signed_post("returnTradeHistory", &[("currencyPair", scope.to_string())])
            .await
    }

    async fn buy(&self, order: &OrderRequest) -> ExchangeResult<RawResponse> {
        self.signed_post("buy", &Self::order_params(order)).await
    }

    async fn sell(&self, order: &OrderRequest) -> ExchangeResult<RawResponse> {
        self.signed_post("sell", &Self::order_params(order)).await
    }

    async fn cancel_order(&self, order_number: &str) -> ExchangeResult<RawResponse> {
        self.signed_post("cancelOrder", &[("orderNumber", order_number.to_string())])
            .await
    }

    fn label(&self) -> String {
        mask_key(&self.credentials.api_key)
    }
}
