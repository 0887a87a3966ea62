//! 거래소 에러 타입.

use std::fmt;

use thiserror::Error;

/// 응답 본문에 포함된 일시적 에러 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenignKind {
    /// 빈 응답
    NoValue,
    /// nonce 불일치
    Nonce,
    /// API 키/서명 거부
    InvalidApi,
    /// 거래소가 본문으로 보고한 연결 타임아웃
    ConnectionTimedOut,
}

impl fmt::Display for BenignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BenignKind::NoValue => "no value",
            BenignKind::Nonce => "nonce",
            BenignKind::InvalidApi => "invalid api",
            BenignKind::ConnectionTimedOut => "connection timed out",
        };
        f.write_str(name)
    }
}

/// 거래소 관련 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 재시도 대상 응답 에러
    #[error("{message}")]
    Benign { kind: BenignKind, message: String },

    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 본문을 읽을 수 없는 HTTP 에러
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 예상하지 못한 에러
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// 재시도 한도 초과
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<ExchangeError>,
    },
}

impl ExchangeError {
    pub fn benign(kind: BenignKind, message: impl Into<String>) -> Self {
        ExchangeError::Benign {
            kind,
            message: message.into(),
        }
    }

    /// 응답 검증에서 분류된 일시적 에러인지 확인.
    pub fn is_benign(&self) -> bool {
        matches!(self, ExchangeError::Benign { .. })
    }

    /// 검증 분류 밖의 에러인지 확인 (에러 레벨로 기록).
    pub fn is_unexpected(&self) -> bool {
        !self.is_benign()
    }

    pub fn benign_kind(&self) -> Option<BenignKind> {
        match self {
            ExchangeError::Benign { kind, .. } => Some(*kind),
            ExchangeError::RetriesExhausted { last, .. } => last.benign_kind(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ExchangeError::NetworkError(err.to_string())
        } else {
            ExchangeError::Unexpected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_classification() {
        let nonce = ExchangeError::benign(BenignKind::Nonce, "nonce error: Nonce must be greater");
        assert!(nonce.is_benign());
        assert!(!nonce.is_unexpected());
        assert_eq!(nonce.to_string(), "nonce error: Nonce must be greater");

        let network = ExchangeError::NetworkError("connection reset".to_string());
        assert!(network.is_unexpected());
        assert_eq!(network.benign_kind(), None);
    }

    #[test]
    fn test_exhausted_keeps_last_kind() {
        let err = ExchangeError::RetriesExhausted {
            operation: "returnOpenOrders".to_string(),
            attempts: 3,
            last: Box::new(ExchangeError::benign(BenignKind::InvalidApi, "Invalid API key")),
        };

        assert_eq!(err.benign_kind(), Some(BenignKind::InvalidApi));
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
