//! # Proxy Core
//!
//! 거래소 프록시 전반에서 사용되는 기본 타입을 제공합니다:
//! - 마켓(기준 통화 계좌) 및 API 자격증명 타입
//! - 자격증명 환경 소스 (`EnvSource`)
//! - 런타임 설정 (`ProxySettings`)
//! - 설정 에러 타입
//! - 로깅 인프라

pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use error::*;
pub use logging::*;
pub use types::*;
