//! # Proxy Service
//!
//! 트레이딩 봇과 거래소 사이의 캐싱/재시도/라우팅 계층.
//!
//! - [`CredentialRegistry`]: API 키 → 마켓/클라이언트 매핑 (시작 시 1회 구성)
//! - [`ClientRouter`]: 요청별 거래 클라이언트 선택
//! - [`CacheCoordinator`]: single-flight 읽기 캐시와 무효화 그룹
//! - [`hide_dust`]: 잔고 먼지 필터
//! - [`ProxyService`]: 공개 작업 파사드
//! - [`RefreshScheduler`]: 캐시 예열 백그라운드 작업

pub mod cache;
pub mod dust;
pub mod error;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod service;

pub use cache::{CacheCoordinator, CacheEntry, CacheKey, InvalidationGroup, Namespace};
pub use dust::hide_dust;
pub use error::{ProxyError, ProxyResult};
pub use registry::{BootstrapMode, CredentialRegistry, TradingClientFactory};
pub use router::ClientRouter;
pub use scheduler::RefreshScheduler;
pub use service::ProxyService;
