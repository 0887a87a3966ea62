//! Single-flight 읽기 캐시.
//!
//! 네임스페이스별로 분리된 슬롯 맵을 유지합니다. 각 슬롯은
//! `tokio::sync::OnceCell`이며, 같은 키에 대한 동시 미스는 하나의
//! 업스트림 호출을 공유합니다. 서로 다른 키는 서로를 기다리지 않습니다.
//!
//! 무효화는 슬롯을 맵에서 제거하고 네임스페이스 세대(generation)를
//! 증가시킵니다. 무효화 이전에 시작된 강제 갱신 결과는 캐시에 기록되지
//! 않습니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, trace};

/// 캐시 네임스페이스.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Ticker,
    ChartData,
    OrderBook,
    PublicTradeHistory,
    Volume24h,
    TradeHistory,
    CompleteBalances,
    Balances,
    OpenOrders,
}

const NAMESPACE_COUNT: usize = 9;

impl Namespace {
    pub const ALL: [Namespace; NAMESPACE_COUNT] = [
        Namespace::Ticker,
        Namespace::ChartData,
        Namespace::OrderBook,
        Namespace::PublicTradeHistory,
        Namespace::Volume24h,
        Namespace::TradeHistory,
        Namespace::CompleteBalances,
        Namespace::Balances,
        Namespace::OpenOrders,
    ];

    /// 설정 키에 사용되는 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Ticker => "ticker",
            Namespace::ChartData => "chartData",
            Namespace::OrderBook => "orderBook",
            Namespace::PublicTradeHistory => "publicTradeHistory",
            Namespace::Volume24h => "volume24h",
            Namespace::TradeHistory => "tradeHistory",
            Namespace::CompleteBalances => "completeBalances",
            Namespace::Balances => "balances",
            Namespace::OpenOrders => "openOrders",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 캐시 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    /// 페어, 마켓 등 리소스 식별자
    pub resource: String,
    /// 시간 구간 데이터의 구간 값 (예: 차트 주기)
    pub bucket: Option<u64>,
}

impl CacheKey {
    pub fn new(namespace: Namespace, resource: impl Into<String>) -> Self {
        Self {
            namespace,
            resource: resource.into(),
            bucket: None,
        }
    }

    pub fn with_bucket(mut self, bucket: u64) -> Self {
        self.bucket = Some(bucket);
        self
    }
}

/// 검증된 캐시 값.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub fetched_at: Instant,
}

impl CacheEntry {
    fn new(value: String) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_expired(&self, max_age: Option<Duration>) -> bool {
        max_age.is_some_and(|max_age| self.fetched_at.elapsed() > max_age)
    }
}

/// 함께 비워지는 네임스페이스 묶음.
#[derive(Debug, Clone, Copy)]
pub struct InvalidationGroup {
    pub name: &'static str,
    pub namespaces: &'static [Namespace],
}

impl InvalidationGroup {
    /// 매수/매도/취소 이후 비워지는 계정 상태.
    pub const ORDER_MUTATION: InvalidationGroup = InvalidationGroup {
        name: "orderMutation",
        namespaces: &[Namespace::OpenOrders, Namespace::CompleteBalances],
    };
}

type Slot = Arc<OnceCell<CacheEntry>>;

#[derive(Default)]
struct NamespaceState {
    slots: HashMap<CacheKey, Slot>,
    generation: u64,
    max_age: Option<Duration>,
}

/// 캐시 조정자.
pub struct CacheCoordinator {
    namespaces: [Mutex<NamespaceState>; NAMESPACE_COUNT],
}

impl Default for CacheCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for namespace in Namespace::ALL {
            map.entry(&namespace.as_str(), &self.len(namespace));
        }
        map.finish()
    }
}

impl CacheCoordinator {
    pub fn new() -> Self {
        Self {
            namespaces: std::array::from_fn(|_| Mutex::new(NamespaceState::default())),
        }
    }

    fn state(&self, namespace: Namespace) -> MutexGuard<'_, NamespaceState> {
        self.namespaces[namespace.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 네임스페이스 최대 유지 시간 지정 (`None` = 무기한).
    pub fn set_max_age(&self, namespace: Namespace, max_age: Option<Duration>) {
        self.state(namespace).max_age = max_age;
    }

    /// 키의 슬롯을 가져오거나 만듭니다. 만료된 값은 새 슬롯으로 교체합니다.
    fn slot(&self, key: &CacheKey) -> Slot {
        let mut state = self.state(key.namespace);
        let max_age = state.max_age;

        if let Some(slot) = state.slots.get(key) {
            let expired = slot.get().is_some_and(|entry| entry.is_expired(max_age));
            if !expired {
                return slot.clone();
            }
            debug!(namespace = %key.namespace, resource = %key.resource, "Cache entry expired");
        }

        let slot = Slot::default();
        state.slots.insert(key.clone(), slot.clone());
        slot
    }

    /// 캐시된 값을 반환하거나, 없으면 한 번만 가져옵니다.
    ///
    /// 가져오기가 실패하면 값은 캐시되지 않으며 에러를 그대로 반환합니다.
    /// 같은 슬롯을 기다리던 다른 호출자는 자신의 `fetch`로 다시 시도합니다.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: &CacheKey, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let slot = self.slot(key);
        if let Some(entry) = slot.get() {
            trace!(namespace = %key.namespace, resource = %key.resource, "Cache hit");
            return Ok(entry.value.clone());
        }

        let entry = slot
            .get_or_try_init(|| async {
                debug!(namespace = %key.namespace, resource = %key.resource, "Cache miss, fetching");
                fetch().await.map(CacheEntry::new)
            })
            .await?;
        Ok(entry.value.clone())
    }

    /// 무조건 새로 가져와 캐시를 교체합니다.
    ///
    /// 가져오는 동안 네임스페이스가 무효화되었다면 결과는 반환만 하고
    /// 캐시에는 기록하지 않습니다.
    pub async fn force_refresh<F, Fut, E>(&self, key: &CacheKey, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let generation = self.state(key.namespace).generation;
        let value = fetch().await?;

        let mut state = self.state(key.namespace);
        if state.generation == generation {
            let slot = Arc::new(OnceCell::new_with(Some(CacheEntry::new(value.clone()))));
            state.slots.insert(key.clone(), slot);
            trace!(namespace = %key.namespace, resource = %key.resource, "Cache entry replaced");
        } else {
            debug!(
                namespace = %key.namespace,
                resource = %key.resource,
                "Namespace invalidated during refresh, result not cached"
            );
        }
        Ok(value)
    }

    /// 그룹의 모든 네임스페이스를 비웁니다.
    pub fn invalidate(&self, group: &InvalidationGroup) {
        for namespace in group.namespaces {
            self.invalidate_namespace(*namespace);
        }
        debug!(group = group.name, "Cache group invalidated");
    }

    pub fn invalidate_namespace(&self, namespace: Namespace) {
        let mut state = self.state(namespace);
        state.slots.clear();
        state.generation = state.generation.wrapping_add(1);
    }

    /// 캐시된 값 조회 (가져오기 없음).
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state(key.namespace)
            .slots
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    /// 값이 캐시된 키 목록.
    pub fn keys(&self, namespace: Namespace) -> Vec<CacheKey> {
        self.state(namespace)
            .slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// 캐시된 값의 개수.
    pub fn len(&self, namespace: Namespace) -> usize {
        self.state(namespace)
            .slots
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self, namespace: Namespace) -> bool {
        self.len(namespace) == 0
    }
}
