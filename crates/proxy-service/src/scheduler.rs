//! 캐시 예열 스케줄러.
//!
//! 요청 트래픽과 무관하게 시세, 캐시된 호가창과 공개 체결 내역,
//! (선택적으로) 활성 마켓의 계정 상태를 주기적으로 강제 갱신합니다.
//! 주기가 0이면 해당 작업은 실행되지 않습니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proxy_core::{Market, SchedulerSettings};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Namespace;
use crate::service::ProxyService;

/// 백그라운드 갱신 작업 묶음.
#[derive(Debug)]
pub struct RefreshScheduler {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// 설정된 주기로 갱신 작업을 시작합니다.
    pub fn start(service: Arc<ProxyService>, settings: &SchedulerSettings) -> Self {
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(period) = settings.ticker_interval() {
            let service = service.clone();
            handles.push(spawn_loop(token.clone(), "ticker", period, move || {
                let service = service.clone();
                async move {
                    if let Err(e) = service.refresh_ticker().await {
                        warn!(error = %e, "Ticker refresh failed");
                    }
                }
            }));
        }

        if let Some(period) = settings.order_book_interval() {
            let service = service.clone();
            handles.push(spawn_loop(token.clone(), "orderBook", period, move || {
                let service = service.clone();
                async move {
                    refresh_order_books(&service).await;
                    refresh_public_trade_histories(&service).await;
                }
            }));
        }

        if let Some(period) = settings.account_interval() {
            let service = service.clone();
            handles.push(spawn_loop(token.clone(), "account", period, move || {
                let service = service.clone();
                async move { refresh_accounts(&service).await }
            }));
        }

        info!(tasks = handles.len(), "Refresh scheduler started");
        Self { token, handles }
    }

    /// 외부에서 종료를 요청할 때 사용하는 토큰.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// 모든 작업을 취소하고 종료를 기다립니다.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Refresh task ended abnormally");
            }
        }
        info!("Refresh scheduler stopped");
    }
}

fn spawn_loop<F, Fut>(token: CancellationToken, name: &'static str, period: Duration, task: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = async {
                    interval.tick().await;
                    debug!(task = name, "Scheduled refresh");
                    task().await;
                } => {}
            }
        }
        debug!(task = name, "Refresh loop stopped");
    })
}

/// 캐시에 있는 모든 호가창 갱신.
async fn refresh_order_books(service: &ProxyService) {
    let pairs: Vec<String> = service
        .cache()
        .keys(Namespace::OrderBook)
        .into_iter()
        .map(|key| key.resource)
        .collect();

    let results = join_all(pairs.iter().map(|pair| service.refresh_order_book(pair))).await;
    for (pair, result) in pairs.iter().zip(results) {
        if let Err(e) = result {
            warn!(pair = %pair, error = %e, "Order book refresh failed");
        }
    }
}

/// 캐시에 있는 모든 공개 체결 내역 갱신.
async fn refresh_public_trade_histories(service: &ProxyService) {
    let pairs: Vec<String> = service
        .cache()
        .keys(Namespace::PublicTradeHistory)
        .into_iter()
        .map(|key| key.resource)
        .collect();

    let results = join_all(
        pairs
            .iter()
            .map(|pair| service.refresh_public_trade_history(pair)),
    )
    .await;
    for (pair, result) in pairs.iter().zip(results) {
        if let Err(e) = result {
            warn!(pair = %pair, error = %e, "Public trade history refresh failed");
        }
    }
}

/// 활성 마켓의 계정 네임스페이스 전체 갱신.
///
/// 마켓 전용 기본 키가 없으면 공용 기본 키로 BTC 마켓만 갱신합니다.
async fn refresh_accounts(service: &ProxyService) {
    let mut markets = service.active_markets();
    if markets.is_empty() && service.registry().fallback_default().is_some() {
        markets.push(Market::Btc);
    }

    for market in markets {
        if let Err(e) = service.refresh_open_orders(market).await {
            warn!(%market, error = %e, "Open orders refresh failed");
        }
        if let Err(e) = service.refresh_complete_balances(market).await {
            warn!(%market, error = %e, "Complete balances refresh failed");
        }
        if let Err(e) = service.refresh_balances(market).await {
            warn!(%market, error = %e, "Balances refresh failed");
        }
        if let Err(e) = service.refresh_trade_history(market).await {
            warn!(%market, error = %e, "Trade history refresh failed");
        }
    }
}
