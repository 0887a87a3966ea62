//! 스크립트 기반 인메모리 거래소.
//!
//! 실제 네트워크 없이 `PublicApi`/`TradingApi`를 구현합니다. 작업별로
//! 고정 응답 또는 1회성 응답 큐를 지정할 수 있고, 호출 횟수와 주문
//! 요청을 기록합니다. 인위적 지연을 주어 동시성 동작을 재현할 수 있습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::traits::{ExchangeResult, OrderRequest, PublicApi, RawResponse, TradingApi};

/// 작업 이름 (Poloniex 명령 기준).
pub mod ops {
    pub const CHART_DATA: &str = "returnChartData";
    pub const TICKER: &str = "returnTicker";
    pub const VOLUME_24H: &str = "return24hVolume";
    pub const ORDER_BOOK: &str = "returnOrderBook";
    pub const PUBLIC_TRADE_HISTORY: &str = "public.returnTradeHistory";
    pub const COMPLETE_BALANCES: &str = "returnCompleteBalances";
    pub const BALANCES: &str = "returnBalances";
    pub const OPEN_ORDERS: &str = "returnOpenOrders";
    pub const TRADE_HISTORY: &str = "returnTradeHistory";
    pub const BUY: &str = "buy";
    pub const SELL: &str = "sell";
    pub const CANCEL_ORDER: &str = "cancelOrder";
}

const DEFAULT_BODY: &str = "{}";

#[derive(Default)]
struct ScriptState {
    sticky: HashMap<String, ExchangeResult<RawResponse>>,
    queued: HashMap<String, VecDeque<ExchangeResult<RawResponse>>>,
    calls: HashMap<String, usize>,
    arguments: HashMap<String, Vec<String>>,
    orders: Vec<(String, OrderRequest)>,
}

/// 스크립트 거래소.
#[derive(Default)]
pub struct ScriptedExchange {
    label: String,
    latency: Option<Duration>,
    state: Mutex<ScriptState>,
}

impl std::fmt::Debug for ScriptedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExchange")
            .field("label", &self.label)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// 로그/검증용 이름 지정.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 모든 호출에 인위적 지연 추가.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 작업의 고정 응답 본문 지정.
    pub fn respond(&self, operation: &str, body: impl Into<String>) -> &Self {
        self.respond_raw(operation, Ok(Some(body.into())))
    }

    /// 작업의 고정 응답 지정 (빈 응답/에러 포함).
    pub fn respond_raw(&self, operation: &str, response: ExchangeResult<RawResponse>) -> &Self {
        self.lock().sticky.insert(operation.to_string(), response);
        self
    }

    /// 고정 응답보다 먼저 소비되는 1회성 응답 추가.
    pub fn enqueue(&self, operation: &str, response: ExchangeResult<RawResponse>) -> &Self {
        self.lock()
            .queued
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// 작업 호출 횟수.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// 작업별 호출 인자 기록.
    pub fn arguments(&self, operation: &str) -> Vec<String> {
        self.lock()
            .arguments
            .get(operation)
            .cloned()
            .unwrap_or_default()
    }

    /// 접수된 매수/매도 요청 (작업 이름, 요청).
    pub fn orders(&self) -> Vec<(String, OrderRequest)> {
        self.lock().orders.clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn respond_to(&self, operation: &str, argument: String) -> ExchangeResult<RawResponse> {
        let response = {
            let mut guard = self.lock();
            let state = &mut *guard;
            *state.calls.entry(operation.to_string()).or_default() += 1;
            state
                .arguments
                .entry(operation.to_string())
                .or_default()
                .push(argument);

            match state.queued.get_mut(operation).and_then(VecDeque::pop_front) {
                Some(response) => response,
                None => state
                    .sticky
                    .get(operation)
                    .cloned()
                    .unwrap_or_else(|| Ok(Some(DEFAULT_BODY.to_string()))),
            }
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        response
    }

    async fn record_order(&self, operation: &str, order: &OrderRequest) -> ExchangeResult<RawResponse> {
        self.lock()
            .orders
            .push((operation.to_string(), order.clone()));
        self.respond_to(operation, order.currency_pair.clone()).await
    }
}

#[async_trait]
impl PublicApi for ScriptedExchange {
    async fn chart_data(
        &self,
        currency_pair: &str,
        period: u64,
        start: i64,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse> {
        let argument = match end {
            Some(end) => format!("{}:{}:{}:{}", currency_pair, period, start, end),
            None => format!("{}:{}:{}", currency_pair, period, start),
        };
        self.respond_to(ops::CHART_DATA, argument).await
    }

    async fn ticker(&self) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::TICKER, String::new()).await
    }

    async fn volume_24h(&self) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::VOLUME_24H, String::new()).await
    }

    async fn order_book(&self, currency_pair: &str) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::ORDER_BOOK, currency_pair.to_string())
            .await
    }

    async fn public_trade_history(
        &self,
        currency_pair: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> ExchangeResult<RawResponse> {
        let argument = match (start, end) {
            (Some(start), Some(end)) => format!("{}:{}:{}", currency_pair, start, end),
            _ => currency_pair.to_string(),
        };
        self.respond_to(ops::PUBLIC_TRADE_HISTORY, argument).await
    }
}

#[async_trait]
impl TradingApi for ScriptedExchange {
    async fn complete_balances(&self) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::COMPLETE_BALANCES, String::new()).await
    }

    async fn balances(&self) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::BALANCES, String::new()).await
    }

    async fn open_orders(&self, scope: &str) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::OPEN_ORDERS, scope.to_string()).await
    }

    async fn trade_history(&self, scope: &str) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::TRADE_HISTORY, scope.to_string()).await
    }

    async fn buy(&self, order: &OrderRequest) -> ExchangeResult<RawResponse> {
        self.record_order(ops::BUY, order).await
    }

    async fn sell(&self, order: &OrderRequest) -> ExchangeResult<RawResponse> {
        self.record_order(ops::SELL, order).await
    }

    async fn cancel_order(&self, order_number: &str) -> ExchangeResult<RawResponse> {
        self.respond_to(ops::CANCEL_ORDER, order_number.to_string())
            .await
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}
