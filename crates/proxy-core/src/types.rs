//! 마켓 및 자격증명 타입.
//!
//! - `Market` - 기준 통화별 거래 계좌 (BTC, ETH, XMR, USDT)
//! - `ApiCredentials` - API 키/시크릿 쌍

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// 기준 통화로 구분되는 거래 계좌.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    /// 비트코인 마켓
    Btc,
    /// 이더리움 마켓
    Eth,
    /// 모네로 마켓
    Xmr,
    /// 테더 마켓
    Usdt,
}

impl Market {
    /// 인식되는 모든 마켓 (스캔 순서).
    pub const ALL: [Market; 4] = [Market::Btc, Market::Eth, Market::Xmr, Market::Usdt];

    /// 환경 변수 이름에 사용되는 마켓 코드.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Btc => "BTC",
            Market::Eth => "ETH",
            Market::Xmr => "XMR",
            Market::Usdt => "USDT",
        }
    }

    /// BTC 이외의 마켓인지 확인.
    ///
    /// 이 마켓 중 하나라도 기본 클라이언트를 가지면 다중 마켓 운영으로 간주합니다.
    pub fn is_alt_market(&self) -> bool {
        !matches!(self, Market::Btc)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(Market::Btc),
            "ETH" => Ok(Market::Eth),
            "XMR" => Ok(Market::Xmr),
            "USDT" => Ok(Market::Usdt),
            other => Err(ConfigError::Invalid(format!("Unknown market: {}", other))),
        }
    }
}

/// 거래소 API 자격증명.
///
/// # 보안
/// - `Debug` 구현은 키를 마스킹하고 시크릿은 출력하지 않습니다.
pub struct ApiCredentials {
    /// API 키 (레지스트리 전체에서 고유)
    pub api_key: String,
    /// API 시크릿
    pub api_secret: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// 서명용 시크릿 바이트.
    pub fn secret_bytes(&self) -> &[u8] {
        self.api_secret.expose_secret().as_bytes()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &mask_key(&self.api_key))
            .field("api_secret", &"***REDACTED***")
            .finish()
    }
}

/// 로그 출력용 API 키 마스킹.
pub fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count > 8 {
        let head: String = key.chars().take(4).collect();
        let tail: String = key.chars().skip(count - 4).collect();
        format!("{}...{}", head, tail)
    } else {
        "***REDACTED***".to_string()
    }
}
