//! 프록시 서비스 통합 테스트.
//!
//! 스크립트 거래소로 캐시 단일 비행, 주문 후 무효화, 재시도 한도,
//! 매도 전용 모드, 다중 마켓 부트스트랩 동작을 검증합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proxy_core::{ApiCredentials, MapEnv, Market, ProxySettings};
use proxy_exchange::simulated::ops;
use proxy_exchange::{ExchangeError, ExchangeResult, ScriptedExchange};
use proxy_service::registry::TradingClient;
use proxy_service::{CacheKey, Namespace, ProxyError, ProxyService};
use rust_decimal_macros::dec;

fn settings(pairs: &[(&str, &str)]) -> ProxySettings {
    let mut props: HashMap<String, String> = HashMap::new();
    props.insert("connection.retryDelayMs".to_string(), "1".to_string());
    for (key, value) in pairs {
        props.insert(key.to_string(), value.to_string());
    }
    ProxySettings::from_properties(&props)
}

fn legacy_env() -> MapEnv {
    MapEnv::new()
        .with("default_apiKey", "DEFAULT")
        .with("default_apiSecret", "secret")
}

/// 모든 자격증명이 같은 스크립트 거래소를 사용하는 서비스.
fn service_with(
    env: MapEnv,
    public: Arc<ScriptedExchange>,
    trading: Arc<ScriptedExchange>,
    settings: ProxySettings,
) -> ProxyResult<ProxyService> {
    let factory = move |_: ApiCredentials| -> ExchangeResult<TradingClient> { Ok(trading.clone()) };
    ProxyService::bootstrap(&env, &factory, public, settings)
}

type ProxyResult<T> = Result<T, ProxyError>;

struct Fixture {
    public: Arc<ScriptedExchange>,
    trading: Arc<ScriptedExchange>,
    service: Arc<ProxyService>,
}

fn fixture(settings: ProxySettings) -> Fixture {
    fixture_with_latency(settings, None)
}

fn fixture_with_latency(settings: ProxySettings, latency: Option<Duration>) -> Fixture {
    let (public, trading) = match latency {
        Some(latency) => (
            ScriptedExchange::new().with_latency(latency),
            ScriptedExchange::new().with_latency(latency),
        ),
        None => (ScriptedExchange::new(), ScriptedExchange::new()),
    };
    let public = Arc::new(public);
    let trading = Arc::new(trading);
    let service = service_with(legacy_env(), public.clone(), trading.clone(), settings).unwrap();
    Fixture {
        public,
        trading,
        service: Arc::new(service),
    }
}

// ============================================================================
// 캐시 단일 비행
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_ticker_reads_fetch_once() {
    let fx = fixture_with_latency(settings(&[]), Some(Duration::from_millis(200)));
    fx.public.respond(ops::TICKER, r#"{"BTC_ETH":{"last":"0.05"}}"#);

    let reads = (0..16).map(|_| {
        let service = fx.service.clone();
        tokio::spawn(async move { service.ticker().await })
    });
    let results = join_all(reads).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap(), r#"{"BTC_ETH":{"last":"0.05"}}"#);
    }
    assert_eq!(fx.public.calls(ops::TICKER), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_order_books_fetch_independently() {
    let fx = fixture_with_latency(settings(&[]), Some(Duration::from_millis(100)));

    let pairs = ["BTC_ETH", "BTC_XMR", "USDT_BTC"];
    let reads = pairs.iter().flat_map(|pair| {
        let service = fx.service.clone();
        (0..4).map(move |_| {
            let service = service.clone();
            let pair = pair.to_string();
            tokio::spawn(async move { service.order_book(&pair).await })
        })
    });
    for result in join_all(reads).await {
        result.unwrap().unwrap();
    }

    assert_eq!(fx.public.calls(ops::ORDER_BOOK), 3);
    let mut fetched = fx.public.arguments(ops::ORDER_BOOK);
    fetched.sort();
    assert_eq!(fetched, vec!["BTC_ETH", "BTC_XMR", "USDT_BTC"]);
}

#[tokio::test]
async fn test_refresh_replaces_cached_value() {
    let fx = fixture(settings(&[]));
    fx.public.respond(ops::TICKER, "first");
    assert_eq!(fx.service.ticker().await.unwrap(), "first");

    fx.public.respond(ops::TICKER, "second");
    assert_eq!(fx.service.ticker().await.unwrap(), "first");
    assert_eq!(fx.service.refresh_ticker().await.unwrap(), "second");
    assert_eq!(fx.service.ticker().await.unwrap(), "second");
    assert_eq!(fx.public.calls(ops::TICKER), 2);
}

#[tokio::test]
async fn test_public_trade_history_window_shares_pair_entry() {
    let fx = fixture(settings(&[]));
    fx.public.respond(ops::PUBLIC_TRADE_HISTORY, "[]");

    fx.service
        .public_trade_history_window("BTC_ETH", 100, 200)
        .await
        .unwrap();
    fx.service.public_trade_history("BTC_ETH").await.unwrap();

    assert_eq!(fx.public.calls(ops::PUBLIC_TRADE_HISTORY), 1);
    assert_eq!(
        fx.public.arguments(ops::PUBLIC_TRADE_HISTORY),
        vec!["BTC_ETH:100:200"]
    );
}

// ============================================================================
// 주문 후 신선도
// ============================================================================

#[tokio::test]
async fn test_reads_after_order_mutations_are_fresh() {
    let fx = fixture(settings(&[]));
    fx.trading.respond(ops::OPEN_ORDERS, "[1]");
    fx.trading.respond(ops::COMPLETE_BALANCES, r#"{"BTC":{"available":"1"}}"#);

    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[1]");
    fx.service.complete_balances(Market::Btc).await.unwrap();

    fx.trading.respond(ops::OPEN_ORDERS, "[1,2]");
    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[1]");

    fx.service
        .buy(None, "BTC_ETH", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[1,2]");

    fx.trading.respond(ops::OPEN_ORDERS, "[2]");
    fx.service
        .sell(None, "BTC_ETH", dec!(0.06), dec!(1))
        .await
        .unwrap();
    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[2]");

    fx.trading.respond(ops::OPEN_ORDERS, "[]");
    fx.service.cancel_order(None, "2").await.unwrap();
    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[]");

    assert_eq!(fx.trading.calls(ops::OPEN_ORDERS), 4);
    assert_eq!(fx.trading.calls(ops::COMPLETE_BALANCES), 1);
    fx.service.complete_balances(Market::Btc).await.unwrap();
    assert_eq!(fx.trading.calls(ops::COMPLETE_BALANCES), 2);
}

#[tokio::test]
async fn test_failed_order_still_invalidates() {
    let fx = fixture(settings(&[("connection.maxRetries", "0")]));
    fx.trading.respond(ops::OPEN_ORDERS, "[1]");
    fx.trading.respond_raw(
        ops::BUY,
        Err(ExchangeError::Unexpected("rejected".to_string())),
    );

    fx.service.open_orders(Market::Btc).await.unwrap();
    let err = fx
        .service
        .buy(None, "BTC_ETH", dec!(0.05), dec!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Exchange(_)));

    assert!(fx
        .service
        .cache()
        .peek(&CacheKey::new(Namespace::OpenOrders, "BTC"))
        .is_none());
    fx.service.open_orders(Market::Btc).await.unwrap();
    assert_eq!(fx.trading.calls(ops::OPEN_ORDERS), 2);
}

#[tokio::test]
async fn test_order_responses_pass_through_verbatim() {
    let fx = fixture(settings(&[]));
    let body = r#"{"orderNumber":31226040,"resultingTrades":[]}"#;
    fx.trading.respond(ops::BUY, body);

    let result = fx
        .service
        .buy(None, "BTC_ETH", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert_eq!(result, body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_orders_are_serialized() {
    let fx = fixture_with_latency(settings(&[]), Some(Duration::from_millis(20)));

    let started = tokio::time::Instant::now();
    let orders = (0..5).map(|i| {
        let service = fx.service.clone();
        tokio::spawn(async move {
            service
                .buy(None, &format!("BTC_C{}", i), dec!(0.01), dec!(1))
                .await
        })
    });
    for result in join_all(orders).await {
        result.unwrap().unwrap();
    }

    assert_eq!(fx.trading.calls(ops::BUY), 5);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_shares_order_lock() {
    let fx = fixture_with_latency(settings(&[]), Some(Duration::from_millis(50)));

    let started = tokio::time::Instant::now();
    let calls = (0..3).flat_map(|i| {
        let buyer = fx.service.clone();
        let canceler = fx.service.clone();
        [
            tokio::spawn(async move {
                buyer
                    .buy(None, &format!("BTC_C{}", i), dec!(0.01), dec!(1))
                    .await
            }),
            tokio::spawn(async move { canceler.cancel_order(None, &i.to_string()).await }),
        ]
    });
    for result in join_all(calls).await {
        result.unwrap().unwrap();
    }

    assert_eq!(fx.trading.calls(ops::BUY), 3);
    assert_eq!(fx.trading.calls(ops::CANCEL_ORDER), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

// ============================================================================
// 검증 및 재시도
// ============================================================================

#[tokio::test]
async fn test_benign_failures_are_retried() {
    let fx = fixture(settings(&[]));
    fx.public
        .enqueue(ops::TICKER, Ok(None))
        .enqueue(
            ops::TICKER,
            Ok(Some(r#"{"error":"Nonce must be greater than 10"}"#.to_string())),
        )
        .enqueue(
            ops::TICKER,
            Ok(Some("Connection timed out".to_string())),
        )
        .respond(ops::TICKER, r#"{"ok":true}"#);

    assert_eq!(fx.service.ticker().await.unwrap(), r#"{"ok":true}"#);
    assert_eq!(fx.public.calls(ops::TICKER), 4);
}

#[tokio::test]
async fn test_retry_budget_is_initial_plus_max_retries() {
    let fx = fixture(settings(&[("connection.maxRetries", "2")]));
    fx.trading.respond_raw(ops::OPEN_ORDERS, Ok(None));

    let err = fx.service.open_orders(Market::Btc).await.unwrap_err();
    match err {
        ProxyError::Exchange(ExchangeError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fx.trading.calls(ops::OPEN_ORDERS), 3);

    fx.trading.respond(ops::OPEN_ORDERS, "[]");
    assert_eq!(fx.service.open_orders(Market::Btc).await.unwrap(), "[]");
}

#[tokio::test]
async fn test_error_bodies_without_markers_are_returned() {
    let fx = fixture(settings(&[]));
    let body = r#"{"error":"Not enough BTC."}"#;
    fx.trading.respond(ops::BUY, body);

    let result = fx
        .service
        .buy(None, "BTC_ETH", dec!(10), dec!(10))
        .await
        .unwrap();
    assert_eq!(result, body);
    assert_eq!(fx.trading.calls(ops::BUY), 1);
}

// ============================================================================
// 모드
// ============================================================================

#[tokio::test]
async fn test_sell_only_blocks_buy_without_upstream_call() {
    let fx = fixture(settings(&[("BTC_ETH_sellOnlyMode", "true")]));

    let payload = fx
        .service
        .buy(None, "ETH_BTC", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert!(!payload.contains("error"));

    let payload = fx
        .service
        .buy(None, "BTC_ETH", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert_eq!(
        payload,
        r#"{"error":"You are not allowed to buy. Sell Only mode is active for BTC_ETH"}"#
    );
    assert_eq!(fx.trading.calls(ops::BUY), 1);

    fx.service
        .sell(None, "BTC_ETH", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert_eq!(fx.trading.calls(ops::SELL), 1);
}

#[tokio::test]
async fn test_global_sell_only_mode() {
    let fx = fixture(settings(&[("sellOnlyMode", "true")]));

    let payload = fx
        .service
        .buy(None, "ETH_BTC", dec!(0.05), dec!(1))
        .await
        .unwrap();
    assert_eq!(
        payload,
        r#"{"error":"You are not allowed to buy. Sell Only mode is active for ETH_BTC"}"#
    );
    assert_eq!(fx.trading.total_calls(), 0);
}

#[tokio::test]
async fn test_hide_dust_applies_on_read_only() {
    let fx = fixture(settings(&[("hideDust", "true")]));
    fx.trading.respond(
        ops::COMPLETE_BALANCES,
        r#"{"XMR":{"available":"0.00001000","onOrders":"0.00000000","btcValue":"0.00000010"}}"#,
    );

    let filtered = fx.service.complete_balances(Market::Btc).await.unwrap();
    assert!(filtered.contains(r#""available":"0.00000000""#));

    let raw = fx
        .service
        .refresh_complete_balances(Market::Btc)
        .await
        .unwrap();
    assert!(raw.contains(r#""available":"0.00001000""#));
}

// ============================================================================
// 다중 마켓
// ============================================================================

fn multi_market_env() -> MapEnv {
    MapEnv::new()
        .with("BTC_apiKey1", "BTC-KEY-1")
        .with("BTC_apiSecret1", "s")
        .with("default_BTC_apiKey", "BTC-DEFAULT")
        .with("default_BTC_apiSecret", "s")
        .with("ETH_apiKey1", "ETH-KEY-1")
        .with("ETH_apiSecret1", "s")
        .with("default_ETH_apiKey", "ETH-DEFAULT")
        .with("default_ETH_apiSecret", "s")
}

fn labelled_service(env: MapEnv, settings: ProxySettings) -> ProxyResult<ProxyService> {
    let factory = |credentials: ApiCredentials| -> ExchangeResult<TradingClient> {
        Ok(Arc::new(
            ScriptedExchange::new().with_label(credentials.api_key.clone()),
        ))
    };
    ProxyService::bootstrap(&env, &factory, Arc::new(ScriptedExchange::new()), settings)
}

#[tokio::test]
async fn test_multi_market_bootstrap() {
    let service = labelled_service(multi_market_env(), settings(&[])).unwrap();

    assert!(service.is_multi_market());
    assert!(service.is_active_market(Market::Eth));
    assert!(!service.is_active_market(Market::Xmr));
    assert_eq!(service.market_for_key("ETH-KEY-1").unwrap(), Market::Eth);
    assert_eq!(service.active_markets(), vec![Market::Btc, Market::Eth]);

    service.check_default_key(Market::Eth).await.unwrap();
    service
        .check_multi_market_trading_key("BTC-KEY-1")
        .await
        .unwrap();
    assert!(matches!(
        service.check_multi_market_trading_key("NOT-A-KEY").await,
        Err(ProxyError::UnmappedCredential(_))
    ));
}

#[tokio::test]
async fn test_multi_market_buy_requires_mapped_key() {
    let service = labelled_service(multi_market_env(), settings(&[])).unwrap();

    service
        .buy(Some("ETH-KEY-1"), "ETH_ZEC", dec!(0.01), dec!(1))
        .await
        .unwrap();

    let err = service
        .buy(Some("STRANGER-KEY"), "ETH_ZEC", dec!(0.01), dec!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::UnmappedCredential(_)));
    assert!(err.to_string().contains("have not setup this apiKey"));
}

#[test]
fn test_alt_market_default_enables_multi_market() {
    let env = MapEnv::new()
        .with("BTC_apiKey1", "BTC-KEY-1")
        .with("BTC_apiSecret1", "s")
        .with("ETH_apiKey1", "ETH-KEY-1")
        .with("ETH_apiSecret1", "s");
    let err = labelled_service(env, settings(&[])).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Please setup the ETH market correctly"));

    let env = MapEnv::new()
        .with("BTC_apiKey1", "BTC-KEY-1")
        .with("BTC_apiSecret1", "s")
        .with("ETH_apiKey1", "ETH-KEY-1")
        .with("ETH_apiSecret1", "s")
        .with("default_ETH_apiKey", "ETH-DEFAULT")
        .with("default_ETH_apiSecret", "s");
    let service = labelled_service(env, settings(&[])).unwrap();
    assert!(service.is_multi_market());
    assert_eq!(service.market_for_key("BTC-KEY-1").unwrap(), Market::Btc);
    assert_eq!(service.active_markets(), vec![Market::Eth]);
}

#[test]
fn test_multibyte_unmapped_key_is_rejected() {
    let service = labelled_service(multi_market_env(), settings(&[])).unwrap();
    let err = service.market_for_key("kлюч-ключ").unwrap_err();
    assert!(matches!(err, ProxyError::UnmappedCredential(_)));
    assert!(err.to_string().contains("kлюч...ключ"));
}

#[tokio::test]
async fn test_multibyte_key_routes_to_unmapped_error() {
    let service = labelled_service(multi_market_env(), settings(&[])).unwrap();
    let err = service
        .buy(Some("kлюч-ключ"), "ETH_ZEC", dec!(0.01), dec!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::UnmappedCredential(_)));
    assert!(matches!(
        service.check_multi_market_trading_key("ключ-ключ-ключ").await,
        Err(ProxyError::UnmappedCredential(_))
    ));
}

#[test]
fn test_incomplete_market_setup_is_fatal() {
    let env = multi_market_env()
        .with("XMR_apiKey1", "XMR-KEY-1")
        .with("XMR_apiSecret1", "s");

    let err = labelled_service(env, settings(&[])).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Please setup the XMR market correctly"));
}

#[tokio::test]
async fn test_legacy_pool_key_check() {
    let env = legacy_env()
        .with("apiKey1", "ROT-1")
        .with("apiSecret1", "s");
    let service = labelled_service(env, settings(&[])).unwrap();

    assert!(!service.is_multi_market());
    service.check_trading_key("ROT-1").await.unwrap();
    assert!(matches!(
        service.check_trading_key("ROT-9").await,
        Err(ProxyError::NoTradingClient(_))
    ));
}
