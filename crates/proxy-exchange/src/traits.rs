//! 거래소 기능 트레이트.
//!
//! 모든 호출은 거래소 응답 본문을 그대로 반환합니다. 스키마 해석은
//! 상위 계층(잔고 필터 등)에서 필요한 필드에 한해서만 수행합니다.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ExchangeError;

/// 원시 응답 본문 (빈 응답은 `None`).
pub type RawResponse = Option<String>;

/// 거래소 작업 결과 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 지정가 주문 요청.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 통화 페어 (예: "BTC_ETH")
    pub currency_pair: String,
    pub rate: Decimal,
    pub amount: Decimal,
    pub fill_or_kill: bool,
    pub immediate_or_cancel: bool,
    pub post_only: bool,
}

impl OrderRequest {
    pub fn new(currency_pair: impl Into<String>, rate: Decimal, amount: Decimal) -> Self {
        Self {
            currency_pair: currency_pair.into(),
            rate,
            amount,
            fill_or_kill: false,
            immediate_or_cancel: false,
            post_only: false,
        }
    }

    pub fn with_flags(mut self, fill_or_kill: bool, immediate_or_cancel: bool) -> Self {
        self.fill_or_kill = fill_or_kill;
        self.immediate_or_cancel = immediate_or_cancel;
        self
    }
}

/// 인증이 필요 없는 시장 데이터 API.
#[async_trait]
pub trait PublicApi: Send + Sync {
    /// 캔들 데이터 (`start`/`end`: 유닉스 초).
    async fn chart_data(
        &self,
        currency_pair: &str,
        period: u64,
        start: i64,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse>;

    /// 전체 페어 시세.
    async fn ticker(&self) -> ExchangeResult<RawResponse>;

    /// 24시간 거래량.
    async fn volume_24h(&self) -> ExchangeResult<RawResponse>;

    async fn order_book(&self, currency_pair: &str) -> ExchangeResult<RawResponse>;

    /// 공개 체결 내역 (구간 선택).
    async fn public_trade_history(
        &self,
        currency_pair: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse>;
}

/// 자격증명 하나에 묶인 인증 API.
#[async_trait]
pub trait TradingApi: Send + Sync {
    async fn complete_balances(&self) -> ExchangeResult<RawResponse>;

    async fn balances(&self) -> ExchangeResult<RawResponse>;

    /// 미체결 주문 (`scope`: 페어 또는 "ALL").
    async fn open_orders(&self, scope: &str) -> ExchangeResult<RawResponse>;

    /// 계정 체결 내역 (`scope`: 페어 또는 "ALL").
    async fn trade_history(&self, scope: &str) -> ExchangeResult<RawResponse>;

    async fn buy(&self, order: &OrderRequest) -> ExchangeResult<RawResponse>;

    async fn sell(&self, order: &OrderRequest) -> ExchangeResult<RawResponse>;

    async fn cancel_order(&self, order_number: &str) -> ExchangeResult<RawResponse>;

    /// 로그용 식별자 (마스킹된 API 키).
    fn label(&self) -> String {
        "trading-client".to_string()
    }
}
