//! 자격증명 레지스트리.
//!
//! 시작 시 환경 소스를 한 번 읽어 API 키 → 마켓, API 키 → 거래 클라이언트,
//! 마켓 → 기본 클라이언트 매핑을 구성합니다. 구성 이후에는 읽기 전용입니다.
//!
//! # 부트스트랩 모드
//! - **다중 마켓**: `{MARKET}_apiKey{i}` / `{MARKET}_apiSecret{i}` (i = 1..=10)
//!   와 마켓별 `default_{MARKET}_apiKey` / `default_{MARKET}_apiSecret`
//! - **단일 마켓**: `default_apiKey` / `default_apiSecret` 와 로테이션용
//!   `apiKey{i}` / `apiSecret{i}`, 페어 고정용 `{PAIR}_apiKey`

use std::collections::HashMap;
use std::sync::Arc;

use proxy_core::{mask_key, ApiCredentials, ConfigError, EnvSource, Market};
use proxy_exchange::{ExchangeResult, TradingApi};
use tracing::{info, warn};

use crate::error::{ProxyError, ProxyResult};

/// 키 스캔 최대 인덱스.
const MAX_KEY_INDEX: usize = 10;

const API_KEY_SUFFIX: &str = "_apiKey";
const DEFAULT_PREFIX: &str = "default";

/// 거래 클라이언트 핸들.
pub type TradingClient = Arc<dyn TradingApi>;

/// 자격증명으로 거래 클라이언트를 생성하는 팩토리.
pub trait TradingClientFactory: Send + Sync {
    fn create(&self, credentials: ApiCredentials) -> ExchangeResult<TradingClient>;
}

impl<F> TradingClientFactory for F
where
    F: Fn(ApiCredentials) -> ExchangeResult<TradingClient> + Send + Sync,
{
    fn create(&self, credentials: ApiCredentials) -> ExchangeResult<TradingClient> {
        self(credentials)
    }
}

/// 레지스트리 구성 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    MultiMarket,
    SingleMarket,
}

/// 자격증명 레지스트리.
pub struct CredentialRegistry {
    mode: BootstrapMode,
    market_by_key: HashMap<String, Market>,
    multi_market_clients: HashMap<String, TradingClient>,
    default_clients: HashMap<Market, TradingClient>,
    fallback_default: Option<TradingClient>,
    rotation_pool: Vec<(String, TradingClient)>,
    pair_keys: HashMap<String, String>,
}

impl std::fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("mode", &self.mode)
            .field("markets", &self.active_markets())
            .field("multi_market_keys", &self.multi_market_clients.len())
            .field("rotation_pool", &self.rotation_pool.len())
            .field("has_fallback_default", &self.fallback_default.is_some())
            .finish()
    }
}

fn credential_pair(env: &dyn EnvSource, key_name: &str, secret_name: &str) -> Option<ApiCredentials> {
    let key = env.get_non_empty(key_name)?;
    let secret = env.get_non_empty(secret_name)?;
    Some(ApiCredentials::new(key, secret))
}

impl CredentialRegistry {
    /// 환경 소스에서 레지스트리를 구성합니다.
    ///
    /// 다중 마켓 구성이 일관되지 않으면 `ConfigError::Fatal`을 반환하며,
    /// 프로세스 종료는 호출자가 결정합니다.
    pub fn initialize(env: &dyn EnvSource, factory: &dyn TradingClientFactory) -> ProxyResult<Self> {
        let mut registry = Self {
            mode: BootstrapMode::SingleMarket,
            market_by_key: HashMap::new(),
            multi_market_clients: HashMap::new(),
            default_clients: HashMap::new(),
            fallback_default: None,
            rotation_pool: Vec::new(),
            pair_keys: HashMap::new(),
        };

        if registry.scan_market_keys(env, factory)? {
            registry.mode = BootstrapMode::MultiMarket;
            registry.fallback_default = registry.load_fallback_default(env, factory)?;
            for market in Market::ALL {
                registry.resolve_market_default(env, factory, market)?;
            }
        } else {
            registry.market_by_key.clear();
            registry.multi_market_clients.clear();
            registry.load_legacy_clients(env, factory)?;
        }

        info!(
            mode = ?registry.mode,
            markets = ?registry.active_markets(),
            rotation_pool = registry.rotation_pool.len(),
            "Credential registry initialized"
        );
        Ok(registry)
    }

    /// `{MARKET}_apiKey{i}` 스캔. 다중 마켓 모드 활성 여부를 반환합니다.
    fn scan_market_keys(&mut self, env: &dyn EnvSource, factory: &dyn TradingClientFactory) -> ProxyResult<bool> {
        for market in Market::ALL {
            for index in 1..=MAX_KEY_INDEX {
                let Some(credentials) = credential_pair(
                    env,
                    &format!("{}_apiKey{}", market, index),
                    &format!("{}_apiSecret{}", market, index),
                ) else {
                    break;
                };

                let api_key = credentials.api_key.clone();
                if let Some(previous) = self.market_by_key.insert(api_key.clone(), market) {
                    warn!(
                        key = %mask_key(&api_key),
                        %previous,
                        %market,
                        "API key registered for more than one market"
                    );
                }
                self.multi_market_clients
                    .insert(api_key.clone(), factory.create(credentials)?);
                info!(key = %mask_key(&api_key), %market, "Registered market trading key");
            }
        }

        Ok(!self.market_by_key.is_empty()
            && self.market_by_key.len() == self.multi_market_clients.len())
    }

    /// 마켓 기본 클라이언트 구성.
    ///
    /// 기본 키만 있고 마켓 키가 없으면 치명적 에러입니다. 대체 마켓(ETH/XMR/USDT)은
    /// 마켓 키가 있는데 기본 키가 없어도 치명적이며, BTC는 공용 기본 키를 사용합니다.
    fn resolve_market_default(
        &mut self,
        env: &dyn EnvSource,
        factory: &dyn TradingClientFactory,
        market: Market,
    ) -> ProxyResult<()> {
        let has_keys = self.market_by_key.values().any(|m| *m == market);
        let credentials = credential_pair(
            env,
            &format!("{}_{}_apiKey", DEFAULT_PREFIX, market),
            &format!("{}_{}_apiSecret", DEFAULT_PREFIX, market),
        );

        match (credentials, has_keys) {
            (Some(credentials), true) => {
                self.default_clients
                    .insert(market, factory.create(credentials)?);
                info!(%market, "Registered market default client");
                Ok(())
            }
            (None, false) => Ok(()),
            (None, true) if !market.is_alt_market() => {
                warn!(%market, "No market default key, falling back to default_apiKey");
                Ok(())
            }
            (Some(_), false) | (None, true) => {
                Err(ConfigError::Fatal(format!("Please setup the {} market correctly", market)).into())
            }
        }
    }

    /// 공용 기본 클라이언트 (`default_apiKey` / `default_apiSecret`).
    fn load_fallback_default(
        &self,
        env: &dyn EnvSource,
        factory: &dyn TradingClientFactory,
    ) -> ProxyResult<Option<TradingClient>> {
        credential_pair(
            env,
            &format!("{}{}", DEFAULT_PREFIX, API_KEY_SUFFIX),
            &format!("{}_apiSecret", DEFAULT_PREFIX),
        )
        .map(|credentials| factory.create(credentials))
        .transpose()
        .map_err(ProxyError::from)
    }

    /// 단일 마켓 구성: 기본 클라이언트, 로테이션 풀, 페어 고정 키.
    fn load_legacy_clients(&mut self, env: &dyn EnvSource, factory: &dyn TradingClientFactory) -> ProxyResult<()> {
        self.fallback_default = self.load_fallback_default(env, factory)?;
        if self.fallback_default.is_none() {
            warn!("default_apiKey/default_apiSecret not set, account operations are unavailable");
        }

        for index in 1..=MAX_KEY_INDEX {
            let Some(credentials) = credential_pair(
                env,
                &format!("apiKey{}", index),
                &format!("apiSecret{}", index),
            ) else {
                break;
            };
            let api_key = credentials.api_key.clone();
            self.rotation_pool.push((api_key, factory.create(credentials)?));
        }

        for name in env.keys() {
            let Some(pair) = name.strip_suffix(API_KEY_SUFFIX) else {
                continue;
            };
            if !pair.contains('_') || pair.starts_with(DEFAULT_PREFIX) {
                continue;
            }
            let Some(api_key) = env.get_non_empty(&name) else {
                continue;
            };

            if self.rotation_pool.iter().any(|(key, _)| *key == api_key) {
                self.pair_keys.insert(pair.to_uppercase(), api_key);
            } else {
                warn!(pair, key = %mask_key(&api_key), "Pair key is not one of the numbered trading keys, ignoring");
            }
        }

        Ok(())
    }

    pub fn mode(&self) -> BootstrapMode {
        self.mode
    }

    /// 다중 마켓 키의 거래 클라이언트.
    pub fn client_for_key(&self, api_key: &str) -> Option<TradingClient> {
        self.multi_market_clients.get(api_key).cloned()
    }

    /// API 키가 속한 마켓.
    pub fn market_for_key(&self, api_key: &str) -> ProxyResult<Market> {
        self.market_by_key
            .get(api_key)
            .copied()
            .ok_or_else(|| ProxyError::UnmappedCredential(mask_key(api_key)))
    }

    /// 마켓 기본 클라이언트 (없으면 공용 기본 클라이언트).
    pub fn default_client_for_market(&self, market: Market) -> Option<TradingClient> {
        self.default_clients
            .get(&market)
            .cloned()
            .or_else(|| self.fallback_default.clone())
    }

    /// ETH/XMR/USDT 중 하나라도 기본 클라이언트가 있으면 다중 마켓 운영.
    pub fn is_multi_market(&self) -> bool {
        Market::ALL
            .iter()
            .filter(|market| market.is_alt_market())
            .any(|market| self.default_clients.contains_key(market))
    }

    /// 마켓 전용 기본 클라이언트가 있는지 확인.
    pub fn is_active_market(&self, market: Market) -> bool {
        self.default_clients.contains_key(&market)
    }

    /// 전용 기본 클라이언트가 있는 마켓 목록 (스캔 순서).
    pub fn active_markets(&self) -> Vec<Market> {
        Market::ALL
            .into_iter()
            .filter(|market| self.default_clients.contains_key(market))
            .collect()
    }

    /// 로테이션 풀의 거래 클라이언트.
    pub fn pool_client(&self, api_key: &str) -> Option<TradingClient> {
        self.rotation_pool
            .iter()
            .find(|(key, _)| key == api_key)
            .map(|(_, client)| client.clone())
    }

    pub fn rotation_pool(&self) -> &[(String, TradingClient)] {
        &self.rotation_pool
    }

    /// 페어에 고정된 로테이션 키.
    pub fn pair_key(&self, currency_pair: &str) -> Option<&str> {
        self.pair_keys
            .get(&currency_pair.to_uppercase())
            .map(String::as_str)
    }

    pub fn fallback_default(&self) -> Option<TradingClient> {
        self.fallback_default.clone()
    }
}
