//! 프록시 서비스 파사드.
//!
//! 봇이 호출하는 모든 공개 작업을 제공합니다. 각 작업은 라우터로
//! 클라이언트를 고르고, 캐시 조정자를 통해 값을 제공하며, 업스트림
//! 호출은 재시도 실행기를 거칩니다.
//!
//! 매수/매도/취소는 프로세스 전체에서 하나의 주문 잠금으로 직렬화되고,
//! 업스트림 호출 이후에는 성공 여부와 관계없이 미체결 주문과 전체 잔고
//! 캐시를 비웁니다.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use proxy_core::{proxy_span, EnvSource, Market, ProxySettings};
use proxy_exchange::{
    ExchangeResult, FailedAttemptObserver, OrderRequest, PublicApi, RawResponse, RetryExecutor,
    RetryPolicy, TracingObserver,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};

use crate::cache::{CacheCoordinator, CacheKey, InvalidationGroup, Namespace};
use crate::dust::{hide_dust, to_decimal};
use crate::error::{ProxyError, ProxyResult};
use crate::registry::{CredentialRegistry, TradingClientFactory};
use crate::router::ClientRouter;

/// 차트 데이터 조회 구간 (일).
const CHART_LOOKBACK_DAYS: i64 = 2;

/// 공개 시세처럼 리소스가 하나뿐인 캐시 키의 리소스 이름.
const ALL_RESOURCES: &str = "all";

/// 계정 범위 조회 대상.
const ALL_SCOPE: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    fn command(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// 계정 범위 조회 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountQuery {
    TradeHistory,
    CompleteBalances,
    Balances,
    OpenOrders,
}

impl AccountQuery {
    fn namespace(self) -> Namespace {
        match self {
            AccountQuery::TradeHistory => Namespace::TradeHistory,
            AccountQuery::CompleteBalances => Namespace::CompleteBalances,
            AccountQuery::Balances => Namespace::Balances,
            AccountQuery::OpenOrders => Namespace::OpenOrders,
        }
    }

    fn command(self) -> &'static str {
        match self {
            AccountQuery::TradeHistory => "returnTradeHistory",
            AccountQuery::CompleteBalances => "returnCompleteBalances",
            AccountQuery::Balances => "returnBalances",
            AccountQuery::OpenOrders => "returnOpenOrders",
        }
    }
}

/// 설정 교체 시 함께 바뀌는 실행 상태.
#[derive(Debug)]
struct Runtime {
    settings: ProxySettings,
    executor: RetryExecutor,
}

/// 프록시 서비스.
pub struct ProxyService {
    registry: Arc<CredentialRegistry>,
    router: ClientRouter,
    public: Arc<dyn PublicApi>,
    cache: CacheCoordinator,
    observer: Arc<dyn FailedAttemptObserver>,
    runtime: RwLock<Arc<Runtime>>,
    order_lock: Mutex<()>,
}

impl std::fmt::Debug for ProxyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyService")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ProxyService {
    pub fn new(registry: CredentialRegistry, public: Arc<dyn PublicApi>, settings: ProxySettings) -> Self {
        let registry = Arc::new(registry);
        let observer: Arc<dyn FailedAttemptObserver> = Arc::new(TracingObserver);
        let cache = CacheCoordinator::new();
        let runtime = Self::build_runtime(&cache, &observer, settings);

        Self {
            router: ClientRouter::new(registry.clone()),
            registry,
            public,
            cache,
            observer,
            runtime: RwLock::new(runtime),
            order_lock: Mutex::new(()),
        }
    }

    /// 환경 소스에서 레지스트리를 구성하고 서비스를 생성합니다.
    pub fn bootstrap(
        env: &dyn EnvSource,
        factory: &dyn TradingClientFactory,
        public: Arc<dyn PublicApi>,
        settings: ProxySettings,
    ) -> ProxyResult<Self> {
        let registry = CredentialRegistry::initialize(env, factory)?;
        Ok(Self::new(registry, public, settings))
    }

    /// 실패 시도 관찰자 교체.
    pub fn with_observer(mut self, observer: Arc<dyn FailedAttemptObserver>) -> Self {
        self.observer = observer;
        let settings = self.settings();
        self.runtime = RwLock::new(Self::build_runtime(&self.cache, &self.observer, settings));
        self
    }

    fn build_runtime(
        cache: &CacheCoordinator,
        observer: &Arc<dyn FailedAttemptObserver>,
        settings: ProxySettings,
    ) -> Arc<Runtime> {
        for namespace in Namespace::ALL {
            cache.set_max_age(namespace, settings.cache_max_age(namespace.as_str()));
        }
        let executor = RetryExecutor::new(RetryPolicy::from(&settings.connection))
            .with_observer(observer.clone());
        Arc::new(Runtime { settings, executor })
    }

    fn runtime(&self) -> Arc<Runtime> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 현재 설정.
    pub fn settings(&self) -> ProxySettings {
        self.runtime().settings.clone()
    }

    /// 설정을 교체합니다. 진행 중인 호출은 이전 설정으로 끝납니다.
    pub fn update_settings(&self, settings: ProxySettings) {
        let runtime = Self::build_runtime(&self.cache, &self.observer, settings);
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = runtime;
        info!("Proxy settings updated");
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }

    /// 제한 재시도로 업스트림을 호출합니다.
    async fn fetch<F, Fut>(&self, operation: &str, call: F) -> ProxyResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<RawResponse>>,
    {
        let runtime = self.runtime();
        let value = runtime.executor.execute(operation, call).await?;
        debug!(operation, response = %value, "Upstream call succeeded");
        Ok(value)
    }

    /// 성공할 때까지 업스트림을 호출합니다.
    async fn fetch_unbounded<F, Fut>(&self, operation: &str, call: F) -> String
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<RawResponse>>,
    {
        let runtime = self.runtime();
        runtime.executor.execute_unbounded(operation, call).await
    }

    // ========================================================================
    // 시장 데이터
    // ========================================================================

    /// 볼린저 밴드 계산용 차트 데이터 (캐시 없음, 무제한 재시도).
    pub async fn bb_chart_data(&self, currency_pair: &str, start: i64, end: i64, period: u64) -> String {
        debug!(currency_pair, start, period, "BB chart data");
        self.fetch_unbounded("returnChartData", || {
            self.public.chart_data(currency_pair, period, start, Some(end))
        })
        .await
    }

    /// 최근 2일 차트 데이터 (페어/주기별 캐시, 무제한 재시도).
    pub async fn chart_data(&self, currency_pair: &str, period: u64) -> String {
        let key = CacheKey::new(Namespace::ChartData, currency_pair).with_bucket(period);
        let result = self
            .cache
            .get_or_refresh(&key, || async {
                let start = (Utc::now() - chrono::Duration::days(CHART_LOOKBACK_DAYS)).timestamp();
                let value = self
                    .fetch_unbounded("returnChartData", || {
                        self.public.chart_data(currency_pair, period, start, None)
                    })
                    .await;
                Ok::<_, std::convert::Infallible>(value)
            })
            .await;

        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    pub async fn ticker(&self) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::Ticker, ALL_RESOURCES);
        self.cache
            .get_or_refresh(&key, || self.fetch("returnTicker", || self.public.ticker()))
            .await
    }

    /// 시세 강제 갱신.
    pub async fn refresh_ticker(&self) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::Ticker, ALL_RESOURCES);
        self.cache
            .force_refresh(&key, || self.fetch("returnTicker", || self.public.ticker()))
            .await
    }

    pub async fn volume_24h(&self) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::Volume24h, ALL_RESOURCES);
        self.cache
            .get_or_refresh(&key, || {
                self.fetch("return24hVolume", || self.public.volume_24h())
            })
            .await
    }

    pub async fn order_book(&self, currency_pair: &str) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::OrderBook, currency_pair);
        self.cache
            .get_or_refresh(&key, || {
                self.fetch("returnOrderBook", || self.public.order_book(currency_pair))
            })
            .await
    }

    pub async fn refresh_order_book(&self, currency_pair: &str) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::OrderBook, currency_pair);
        self.cache
            .force_refresh(&key, || {
                self.fetch("returnOrderBook", || self.public.order_book(currency_pair))
            })
            .await
    }

    /// 공개 체결 내역 (페어별 캐시).
    pub async fn public_trade_history(&self, currency_pair: &str) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::PublicTradeHistory, currency_pair);
        self.cache
            .get_or_refresh(&key, || {
                self.fetch("returnTradeHistory", || {
                    self.public.public_trade_history(currency_pair, None, None)
                })
            })
            .await
    }

    /// 구간 지정 공개 체결 내역.
    ///
    /// 구간과 관계없이 페어 기준으로 캐시를 공유합니다.
    pub async fn public_trade_history_window(
        &self,
        currency_pair: &str,
        start: i64,
        end: i64,
    ) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::PublicTradeHistory, currency_pair);
        self.cache
            .get_or_refresh(&key, || {
                self.fetch("returnTradeHistory", || {
                    self.public
                        .public_trade_history(currency_pair, Some(start), Some(end))
                })
            })
            .await
    }

    pub async fn refresh_public_trade_history(&self, currency_pair: &str) -> ProxyResult<String> {
        let key = CacheKey::new(Namespace::PublicTradeHistory, currency_pair);
        self.cache
            .force_refresh(&key, || {
                self.fetch("returnTradeHistory", || {
                    self.public.public_trade_history(currency_pair, None, None)
                })
            })
            .await
    }

    // ========================================================================
    // 계정 데이터
    // ========================================================================

    async fn account_read(&self, query: AccountQuery, market: Market, force: bool) -> ProxyResult<String> {
        let client = self.router.resolve_market(market)?;
        let key = CacheKey::new(query.namespace(), market.as_str());

        let fetch = || {
            self.fetch(query.command(), || match query {
                AccountQuery::TradeHistory => client.trade_history(ALL_SCOPE),
                AccountQuery::CompleteBalances => client.complete_balances(),
                AccountQuery::Balances => client.balances(),
                AccountQuery::OpenOrders => client.open_orders(ALL_SCOPE),
            })
        };

        let value = if force {
            self.cache.force_refresh(&key, fetch).await?
        } else {
            self.cache.get_or_refresh(&key, fetch).await?
        };
        debug!(%market, namespace = %query.namespace(), "Account data served");
        Ok(value)
    }

    /// 계정 체결 내역 (마켓별 캐시).
    pub async fn trade_history(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::TradeHistory, market, false).await
    }

    pub async fn refresh_trade_history(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::TradeHistory, market, true).await
    }

    /// 전체 잔고. `hideDust`가 켜져 있으면 읽을 때마다 먼지 필터를 적용합니다.
    pub async fn complete_balances(&self, market: Market) -> ProxyResult<String> {
        let raw = self
            .account_read(AccountQuery::CompleteBalances, market, false)
            .await?;
        if self.runtime().settings.hide_dust {
            hide_dust(&raw)
        } else {
            Ok(raw)
        }
    }

    /// 전체 잔고 강제 갱신 (필터 적용 전 원본 반환).
    pub async fn refresh_complete_balances(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::CompleteBalances, market, true)
            .await
    }

    pub async fn balances(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::Balances, market, false).await
    }

    pub async fn refresh_balances(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::Balances, market, true).await
    }

    /// 캐시된 잔고에서 단일 통화 잔고를 계산합니다.
    pub async fn balance(&self, market: Market, currency: &str) -> ProxyResult<Decimal> {
        let raw = self.balances(market).await?;
        let parsed: Value = serde_json::from_str(&raw)?;
        let value = parsed
            .get(currency)
            .ok_or_else(|| ProxyError::Parse(format!("{} is missing from balances", currency)))?;
        to_decimal(value)
            .ok_or_else(|| ProxyError::Parse(format!("{} balance is not a number: {}", currency, value)))
    }

    pub async fn btc_balance(&self, market: Market) -> ProxyResult<Decimal> {
        self.balance(market, "BTC").await
    }

    pub async fn open_orders(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::OpenOrders, market, false).await
    }

    pub async fn refresh_open_orders(&self, market: Market) -> ProxyResult<String> {
        self.account_read(AccountQuery::OpenOrders, market, true).await
    }

    // ========================================================================
    // 주문
    // ========================================================================

    /// 매수 주문.
    ///
    /// 테스트 모드에서는 빈 문자열을, 매도 전용 모드에서는 `{"error": ...}`
    /// 본문을 업스트림 호출 없이 반환합니다.
    pub async fn buy(
        &self,
        api_key: Option<&str>,
        currency_pair: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> ProxyResult<String> {
        self.place_order(OrderSide::Buy, api_key, currency_pair, rate, amount)
            .instrument(proxy_span!("buy", currency_pair))
            .await
    }

    /// 매도 주문. 매도 전용 모드의 영향을 받지 않습니다.
    pub async fn sell(
        &self,
        api_key: Option<&str>,
        currency_pair: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> ProxyResult<String> {
        self.place_order(OrderSide::Sell, api_key, currency_pair, rate, amount)
            .instrument(proxy_span!("sell", currency_pair))
            .await
    }

    async fn place_order(
        &self,
        side: OrderSide,
        api_key: Option<&str>,
        currency_pair: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> ProxyResult<String> {
        let _order_guard = self.order_lock.lock().await;
        let runtime = self.runtime();
        let settings = &runtime.settings;

        if settings.test_mode {
            match side {
                OrderSide::Buy => info!("Test mode: We bought {}", currency_pair),
                OrderSide::Sell => info!("Test mode: We sold {}", currency_pair),
            }
            return Ok(String::new());
        }

        if side == OrderSide::Buy && settings.is_sell_only(currency_pair) {
            let message = format!(
                "You are not allowed to buy. Sell Only mode is active for {}",
                currency_pair
            );
            let payload = json!({ "error": message }).to_string();
            info!("{}", payload);
            return Ok(payload);
        }

        let client = self.router.resolve(api_key, Some(currency_pair))?;
        let flags = match side {
            OrderSide::Buy => settings.buy_flags,
            OrderSide::Sell => settings.sell_flags,
        };
        let order = OrderRequest::new(currency_pair, rate, amount)
            .with_flags(flags.fill_or_kill, flags.immediate_or_cancel);

        let result = runtime
            .executor
            .execute(side.command(), || match side {
                OrderSide::Buy => client.buy(&order),
                OrderSide::Sell => client.sell(&order),
            })
            .await;
        self.cache.invalidate(&InvalidationGroup::ORDER_MUTATION);

        let result = result?;
        match side {
            OrderSide::Buy => info!("Buy order for {} -- {}", currency_pair, result),
            OrderSide::Sell => info!("Sell order for {} -- {}", currency_pair, result),
        }
        Ok(result)
    }

    /// 주문 취소. 매수/매도와 같은 주문 잠금을 사용합니다.
    pub async fn cancel_order(&self, api_key: Option<&str>, order_number: &str) -> ProxyResult<String> {
        let _order_guard = self.order_lock.lock().await;
        debug!(order_number, "Canceling an order");

        let client = self.router.resolve(api_key, None)?;
        let result = self
            .fetch("cancelOrder", || client.cancel_order(order_number))
            .instrument(proxy_span!("cancelOrder", order_number))
            .await;
        self.cache.invalidate(&InvalidationGroup::ORDER_MUTATION);
        result
    }

    // ========================================================================
    // 자격증명 점검 및 조회
    // ========================================================================

    /// 마켓 기본 키 점검 (캐시 없는 미체결 주문 조회).
    pub async fn check_default_key(&self, market: Market) -> ProxyResult<String> {
        let client = self.router.resolve_market(market)?;
        self.fetch("returnOpenOrders", || client.open_orders(ALL_SCOPE))
            .await
    }

    /// 로테이션 풀 키 점검.
    pub async fn check_trading_key(&self, api_key: &str) -> ProxyResult<String> {
        let client = self
            .registry
            .pool_client(api_key)
            .ok_or_else(|| ProxyError::NoTradingClient(proxy_core::mask_key(api_key)))?;
        self.fetch("returnOpenOrders", || client.open_orders(ALL_SCOPE))
            .await
    }

    /// 다중 마켓 키 점검.
    pub async fn check_multi_market_trading_key(&self, api_key: &str) -> ProxyResult<String> {
        let client = self
            .registry
            .client_for_key(api_key)
            .ok_or_else(|| ProxyError::UnmappedCredential(proxy_core::mask_key(api_key)))?;
        self.fetch("returnOpenOrders", || client.open_orders(ALL_SCOPE))
            .await
    }

    pub fn is_active_market(&self, market: Market) -> bool {
        self.registry.is_active_market(market)
    }

    pub fn is_multi_market(&self) -> bool {
        self.registry.is_multi_market()
    }

    pub fn market_for_key(&self, api_key: &str) -> ProxyResult<Market> {
        self.registry.market_for_key(api_key)
    }

    pub fn active_markets(&self) -> Vec<Market> {
        self.registry.active_markets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_core::{ApiCredentials, MapEnv};
    use proxy_exchange::simulated::ops;
    use proxy_exchange::ScriptedExchange;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> ProxySettings {
        let mut props: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        props.insert("connection.retryDelayMs".to_string(), "1".to_string());
        ProxySettings::from_properties(&props)
    }

    fn legacy_service(trading: Arc<ScriptedExchange>, settings: ProxySettings) -> ProxyService {
        let env = MapEnv::new()
            .with("default_apiKey", "DEFAULT")
            .with("default_apiSecret", "s");
        let factory = move |_: ApiCredentials| -> ExchangeResult<crate::registry::TradingClient> {
            Ok(trading.clone())
        };
        ProxyService::bootstrap(&env, &factory, Arc::new(ScriptedExchange::new()), settings).unwrap()
    }

    #[tokio::test]
    async fn test_buy_flags_come_from_settings() {
        let trading = Arc::new(ScriptedExchange::new());
        let service = legacy_service(
            trading.clone(),
            settings(&[("buy_fillOrKill", "true"), ("sell_immediateOrCancel", "true")]),
        );

        service.buy(None, "BTC_ETH", dec!(0.01), dec!(1)).await.unwrap();
        service.sell(None, "BTC_ETH", dec!(0.02), dec!(1)).await.unwrap();

        let orders = trading.orders();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].1.fill_or_kill && !orders[0].1.immediate_or_cancel);
        assert!(!orders[1].1.fill_or_kill && orders[1].1.immediate_or_cancel);
        assert!(!orders[0].1.post_only);
    }

    #[tokio::test]
    async fn test_test_mode_skips_upstream() {
        let trading = Arc::new(ScriptedExchange::new());
        let service = legacy_service(trading.clone(), settings(&[("testMode", "true")]));

        assert_eq!(service.buy(None, "BTC_ETH", dec!(1), dec!(1)).await.unwrap(), "");
        assert_eq!(service.sell(None, "BTC_ETH", dec!(1), dec!(1)).await.unwrap(), "");
        assert_eq!(trading.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_settings_applies_to_next_call() {
        let trading = Arc::new(ScriptedExchange::new());
        let service = legacy_service(trading.clone(), settings(&[]));

        service.update_settings(settings(&[("BTC_ETH_sellOnlyMode", "true")]));
        let payload = service.buy(None, "BTC_ETH", dec!(1), dec!(1)).await.unwrap();

        assert!(payload.contains("Sell Only mode is active for BTC_ETH"));
        assert_eq!(trading.calls(ops::BUY), 0);
        assert!(service.settings().is_sell_only("BTC_ETH"));
    }

    #[tokio::test]
    async fn test_balance_sub_value() {
        let trading = Arc::new(ScriptedExchange::new());
        trading.respond(ops::BALANCES, r#"{"BTC":"0.51000000","ETH":2.5}"#);
        let service = legacy_service(trading.clone(), settings(&[]));

        assert_eq!(service.btc_balance(Market::Btc).await.unwrap(), dec!(0.51));
        assert_eq!(service.balance(Market::Btc, "ETH").await.unwrap(), dec!(2.5));
        assert!(matches!(
            service.balance(Market::Btc, "XMR").await,
            Err(ProxyError::Parse(_))
        ));
        assert_eq!(trading.calls(ops::BALANCES), 1);
    }

    #[tokio::test]
    async fn test_chart_data_is_cached_per_period() {
        let public = Arc::new(ScriptedExchange::new());
        public.respond(ops::CHART_DATA, "[]");
        let no_keys = |_: ApiCredentials| -> ExchangeResult<crate::registry::TradingClient> {
            unreachable!("no trading keys are configured")
        };
        let registry = CredentialRegistry::initialize(&MapEnv::new(), &no_keys).unwrap();
        let service = ProxyService::new(registry, public.clone(), settings(&[]));

        service.chart_data("BTC_ETH", 300).await;
        service.chart_data("BTC_ETH", 300).await;
        service.chart_data("BTC_ETH", 900).await;
        service.bb_chart_data("BTC_ETH", 1, 2, 300).await;
        service.bb_chart_data("BTC_ETH", 1, 2, 300).await;

        assert_eq!(public.calls(ops::CHART_DATA), 4);
        assert_eq!(
            public.arguments(ops::CHART_DATA).last().map(String::as_str),
            Some("BTC_ETH:300:1:2")
        );
    }
}
