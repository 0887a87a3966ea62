//! 설정 및 자격증명 에러 타입.

use thiserror::Error;

/// 설정/자격증명 관련 에러.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 시작 시점의 치명적 설정 오류 (프로세스 진입점이 종료 처리)
    #[error("치명적 설정 에러: {0}")]
    Fatal(String),

    /// 잘못된 설정 값
    #[error("잘못된 설정: {0}")]
    Invalid(String),

    /// 설정 소스 로드 실패
    #[error("설정 로드 실패: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    /// 치명적인 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfigError::Fatal(_))
    }
}
