//! 원시 응답 검증.
//!
//! 거래소는 일부 일시적 장애를 HTTP 상태가 아닌 응답 본문의 문자열로
//! 보고합니다. 알려진 문자열만 에러로 분류하고 나머지 본문은 그대로
//! 통과시킵니다.

use crate::error::{BenignKind, ExchangeError};
use crate::traits::{ExchangeResult, RawResponse};

const NONCE_MARKER: &str = "Nonce";
const INVALID_API_MARKER: &str = "Invalid API";
const CONNECTION_TIMED_OUT_MARKER: &str = "Connection timed out";

/// 응답 검증기.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultValidator;

impl ResultValidator {
    pub fn new() -> Self {
        Self
    }

    /// 응답을 성공 또는 일시적 에러로 분류합니다.
    pub fn validate(&self, raw: RawResponse) -> ExchangeResult<String> {
        let value = match raw {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                return Err(ExchangeError::benign(
                    BenignKind::NoValue,
                    "No value was returned",
                ))
            }
        };

        if value.contains(NONCE_MARKER) {
            return Err(ExchangeError::benign(
                BenignKind::Nonce,
                format!("nonce error: {}", value),
            ));
        }
        if value.contains(INVALID_API_MARKER) {
            return Err(ExchangeError::benign(BenignKind::InvalidApi, value));
        }
        if value.contains(CONNECTION_TIMED_OUT_MARKER) {
            return Err(ExchangeError::benign(BenignKind::ConnectionTimedOut, value));
        }

        Ok(value)
    }
}
