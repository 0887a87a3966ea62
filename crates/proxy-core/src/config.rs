//! 프록시 런타임 설정.
//!
//! 설정 파일(선택)과 `PROXY_` 접두사 환경 변수에서 로드한 뒤,
//! 대소문자를 구분하지 않는 평면 속성 맵으로 변환하여 해석합니다.
//! 인식되는 속성:
//! - `testMode`, `sellOnlyMode`, `{pair}_sellOnlyMode`, `hideDust`
//! - `buy_fillOrKill`, `buy_immediateOrCancel`, `sell_fillOrKill`, `sell_immediateOrCancel`
//! - `connection.maxRetries`, `connection.retryDelayMs`
//! - `cache.{namespace}.maxAgeSecs`
//! - `scheduler.tickerIntervalSecs`, `scheduler.orderBookIntervalSecs`, `scheduler.accountIntervalSecs`

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Map, Source, Value, ValueKind};

use crate::ConfigError;

const SELL_ONLY_SUFFIX: &str = "_sellonlymode";
const CACHE_PREFIX: &str = "cache.";
const MAX_AGE_SUFFIX: &str = ".maxagesecs";

/// 주문 실행 플래그.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderFlags {
    pub fill_or_kill: bool,
    pub immediate_or_cancel: bool,
}

/// 업스트림 연결 재시도 설정.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// 최대 재시도 횟수 (초기 시도 제외)
    pub max_retries: u32,
    /// 재시도 간 고정 대기 시간 (밀리초)
    pub retry_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_retries: 6,
            retry_delay_ms: 500,
        }
    }
}

impl ConnectionSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 백그라운드 갱신 주기 (0 = 비활성화).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub ticker_interval_secs: u64,
    pub order_book_interval_secs: u64,
    pub account_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            ticker_interval_secs: 10,
            order_book_interval_secs: 10,
            account_interval_secs: 0,
        }
    }
}

impl SchedulerSettings {
    pub fn ticker_interval(&self) -> Option<Duration> {
        non_zero_secs(self.ticker_interval_secs)
    }

    pub fn order_book_interval(&self) -> Option<Duration> {
        non_zero_secs(self.order_book_interval_secs)
    }

    pub fn account_interval(&self) -> Option<Duration> {
        non_zero_secs(self.account_interval_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// 프록시 설정.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// 테스트 모드 (주문을 거래소로 보내지 않음)
    pub test_mode: bool,
    /// 전역 매도 전용 모드
    pub sell_only_mode: bool,
    /// 페어별 매도 전용 모드 (키: 대문자 페어)
    pub pair_sell_only: HashMap<String, bool>,
    /// 잔고 먼지(dust) 숨김
    pub hide_dust: bool,
    /// 매수 주문 플래그
    pub buy_flags: OrderFlags,
    /// 매도 주문 플래그
    pub sell_flags: OrderFlags,
    /// 연결/재시도 설정
    pub connection: ConnectionSettings,
    /// 캐시 네임스페이스별 최대 유지 시간 (키: 소문자 네임스페이스)
    pub cache_max_age_secs: HashMap<String, u64>,
    /// 백그라운드 갱신 설정
    pub scheduler: SchedulerSettings,
}

impl ProxySettings {
    /// 평면 속성 맵에서 설정을 해석합니다.
    ///
    /// 키는 대소문자를 구분하지 않으며, 인식되지 않는 키는 무시됩니다.
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let props: HashMap<String, &str> = props
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();

        let flag = |key: &str| props.get(key).map(|v| parse_bool(v)).unwrap_or(false);
        let number = |key: &str, default: u64| {
            props
                .get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let defaults = ConnectionSettings::default();
        let scheduler_defaults = SchedulerSettings::default();

        let mut pair_sell_only = HashMap::new();
        let mut cache_max_age_secs = HashMap::new();
        for (key, value) in &props {
            if let Some(pair) = key.strip_suffix(SELL_ONLY_SUFFIX) {
                if !pair.is_empty() {
                    pair_sell_only.insert(pair.to_uppercase(), parse_bool(value));
                }
            } else if let Some(namespace) = key
                .strip_prefix(CACHE_PREFIX)
                .and_then(|rest| rest.strip_suffix(MAX_AGE_SUFFIX))
            {
                if let Ok(secs) = value.trim().parse::<u64>() {
                    cache_max_age_secs.insert(namespace.to_string(), secs);
                }
            }
        }

        Self {
            test_mode: flag("testmode"),
            sell_only_mode: flag("sellonlymode"),
            pair_sell_only,
            hide_dust: flag("hidedust"),
            buy_flags: OrderFlags {
                fill_or_kill: flag("buy_fillorkill"),
                immediate_or_cancel: flag("buy_immediateorcancel"),
            },
            sell_flags: OrderFlags {
                fill_or_kill: flag("sell_fillorkill"),
                immediate_or_cancel: flag("sell_immediateorcancel"),
            },
            connection: ConnectionSettings {
                max_retries: u32::try_from(number("connection.maxretries", u64::from(defaults.max_retries)))
                    .unwrap_or(defaults.max_retries),
                retry_delay_ms: number("connection.retrydelayms", defaults.retry_delay_ms),
            },
            cache_max_age_secs,
            scheduler: SchedulerSettings {
                ticker_interval_secs: number(
                    "scheduler.tickerintervalsecs",
                    scheduler_defaults.ticker_interval_secs,
                ),
                order_book_interval_secs: number(
                    "scheduler.orderbookintervalsecs",
                    scheduler_defaults.order_book_interval_secs,
                ),
                account_interval_secs: number(
                    "scheduler.accountintervalsecs",
                    scheduler_defaults.account_interval_secs,
                ),
            },
        }
    }

    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 경로가 없으면 `config/proxy.{toml,yaml,json,...}`을 선택적으로 읽습니다.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("config/proxy").required(false)),
        };
        let config = builder
            .add_source(
                config::Environment::with_prefix("PROXY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut props = HashMap::new();
        flatten("", config.collect()?, &mut props);

        let settings = Self::from_properties(&props);
        tracing::debug!(?settings, "Proxy settings loaded");
        Ok(settings)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// 해당 페어의 매수가 차단되는지 확인 (전역 또는 페어별 매도 전용 모드).
    pub fn is_sell_only(&self, currency_pair: &str) -> bool {
        self.sell_only_mode
            || self
                .pair_sell_only
                .get(&currency_pair.to_uppercase())
                .copied()
                .unwrap_or(false)
    }

    /// 캐시 네임스페이스의 최대 유지 시간.
    pub fn cache_max_age(&self, namespace: &str) -> Option<Duration> {
        self.cache_max_age_secs
            .get(&namespace.to_lowercase())
            .map(|secs| Duration::from_secs(*secs))
    }
}

/// `true`/`1`만 참으로 해석 (대소문자 무시).
fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// 중첩 테이블을 점 구분 키의 평면 맵으로 변환.
fn flatten(prefix: &str, table: Map<String, Value>, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };

        match value.kind {
            ValueKind::Table(nested) => flatten(&key, nested, out),
            ValueKind::Array(_) | ValueKind::Nil => {}
            scalar => {
                out.insert(key.to_lowercase(), scalar.to_string());
            }
        }
    }
}
