//! # Proxy Exchange
//!
//! 거래소 API 경계 계층:
//! - `PublicApi` / `TradingApi` 기능 트레이트
//! - 원시 응답 검증 (`ResultValidator`)
//! - 고정 지연 재시도 (`RetryExecutor`)
//! - Poloniex HTTP 커넥터
//! - 테스트용 스크립트 거래소 (`ScriptedExchange`)

pub mod connector;
pub mod error;
pub mod retry;
pub mod simulated;
pub mod traits;
pub mod validator;

pub use connector::poloniex::{PoloniexConfig, PoloniexPublicClient, PoloniexTradingClient};
pub use error::{BenignKind, ExchangeError};
pub use retry::{FailedAttemptObserver, RetryExecutor, RetryPolicy, TracingObserver};
pub use simulated::ScriptedExchange;
pub use traits::{ExchangeResult, OrderRequest, PublicApi, RawResponse, TradingApi};
pub use validator::ResultValidator;
