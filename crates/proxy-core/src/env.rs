//! 자격증명 환경 소스.
//!
//! 레지스트리는 시작 시점에 이 소스에서 API 키/시크릿을 읽습니다.
//! 운영 환경에서는 프로세스 환경 변수(`.env` 포함)를, 테스트에서는
//! 메모리 맵을 사용합니다.

use std::collections::HashMap;

/// 키-값 환경 소스.
pub trait EnvSource: Send + Sync {
    /// 키에 해당하는 값 조회.
    fn get(&self, key: &str) -> Option<String>;

    /// 소스에 정의된 모든 키.
    fn keys(&self) -> Vec<String>;

    /// 비어있지 않은 값만 반환.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }
}

/// 프로세스 환경 변수 소스.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ProcessEnv {
    /// `.env` 파일을 로드한 뒤 프로세스 환경을 사용합니다.
    pub fn load_dotenv() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self
    }
}

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars().map(|(k, _)| k).collect()
    }
}

/// 메모리 기반 환경 소스.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// 키-값 쌍 추가 (빌더).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}
