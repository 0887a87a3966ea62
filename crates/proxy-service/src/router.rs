//! 요청별 거래 클라이언트 선택.

use std::sync::Arc;

use proxy_core::{mask_key, Market};
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::registry::{BootstrapMode, CredentialRegistry, TradingClient};

/// 거래 클라이언트 라우터.
///
/// 우선순위:
/// 1. 다중 마켓으로 구성된 경우 API 키 → 클라이언트 매핑
/// 2. 페어에 고정된 로테이션 키
/// 3. 로테이션 풀에서 임의 선택
/// 4. 공용 기본 클라이언트
#[derive(Debug, Clone)]
pub struct ClientRouter {
    registry: Arc<CredentialRegistry>,
}

impl ClientRouter {
    pub fn new(registry: Arc<CredentialRegistry>) -> Self {
        Self { registry }
    }

    /// 주문/취소용 클라이언트 선택.
    pub fn resolve(&self, api_key: Option<&str>, currency_pair: Option<&str>) -> ProxyResult<TradingClient> {
        if self.registry.mode() == BootstrapMode::MultiMarket {
            let api_key = api_key.ok_or_else(|| {
                ProxyError::NoTradingClient("an API key is required when trading multiple markets".to_string())
            })?;
            return self
                .registry
                .client_for_key(api_key)
                .ok_or_else(|| ProxyError::UnmappedCredential(mask_key(api_key)));
        }

        if let Some(pair) = currency_pair {
            if let Some(client) = self
                .registry
                .pair_key(pair)
                .and_then(|key| self.registry.pool_client(key))
            {
                debug!(pair, "Routing to pair-pinned trading key");
                return Ok(client);
            }
        }

        if let Some((key, client)) = self.registry.rotation_pool().choose(&mut rand::thread_rng()) {
            debug!(key = %mask_key(key), "Routing to rotation pool key");
            return Ok(client.clone());
        }

        self.registry
            .fallback_default()
            .ok_or_else(|| ProxyError::NoTradingClient("no trading keys configured".to_string()))
    }

    /// 마켓 계정 조회용 기본 클라이언트.
    pub fn resolve_market(&self, market: Market) -> ProxyResult<TradingClient> {
        self.registry
            .default_client_for_market(market)
            .ok_or_else(|| ProxyError::NoTradingClient(format!("no default client for market {}", market)))
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }
}
