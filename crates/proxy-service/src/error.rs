//! 서비스 계층 에러 타입.

use proxy_core::ConfigError;
use proxy_exchange::ExchangeError;
use thiserror::Error;

/// 프록시 서비스 에러.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 설정/자격증명 에러
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 마켓에 매핑되지 않은 API 키 (재시도 대상 아님)
    #[error("It seems you are using multiple markets but have not setup this apiKey {0}")]
    UnmappedCredential(String),

    /// 요청을 처리할 거래 클라이언트 없음
    #[error("No trading client available: {0}")]
    NoTradingClient(String),

    /// 거래소 에러 (재시도 소진 포함)
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// 응답 파싱 에러
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProxyError {
    /// 프로세스를 종료해야 하는 설정 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Config(err) if err.is_fatal())
    }

    /// 설정 문제로 인한 에러인지 확인 (재시도로 해결되지 않음).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProxyError::Config(_) | ProxyError::UnmappedCredential(_) | ProxyError::NoTradingClient(_)
        )
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Parse(err.to_string())
    }
}

/// 서비스 작업 결과 타입.
pub type ProxyResult<T> = Result<T, ProxyError>;
