//! 고정 지연 재시도 실행기.
//!
//! 모든 시도 결과는 `ResultValidator`를 거치며, 실패한 시도는 관찰자에게
//! 보고된 뒤 고정 지연 후 다시 시도됩니다. 계정/주문 경로는 제한된 횟수만
//! 재시도하고, 차트 데이터 경로는 성공할 때까지 재시도합니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use proxy_core::ConnectionSettings;
use tracing::{debug, error};

use crate::error::ExchangeError;
use crate::traits::{ExchangeResult, RawResponse};
use crate::validator::ResultValidator;

/// 재시도 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 재시도 횟수 (초기 시도 제외)
    pub max_retries: u32,
    /// 시도 간 고정 지연
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// 초기 시도를 포함한 최대 시도 횟수.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl From<&ConnectionSettings> for RetryPolicy {
    fn from(settings: &ConnectionSettings) -> Self {
        Self::new(settings.max_retries, settings.retry_delay())
    }
}

/// 실패한 시도 관찰자.
pub trait FailedAttemptObserver: Send + Sync {
    fn on_failed_attempt(&self, operation: &str, attempt: u32, error: &ExchangeError);
}

/// 분류된 실패를 tracing으로 기록하는 기본 관찰자.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl FailedAttemptObserver for TracingObserver {
    fn on_failed_attempt(&self, operation: &str, attempt: u32, error: &ExchangeError) {
        if error.is_benign() {
            debug!(operation, attempt, error = %error, "Retrying after benign failure");
        } else {
            error!(operation, attempt, error = %error, "Unexpected failure, retrying");
        }
    }
}

/// 재시도 실행기.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    validator: ResultValidator,
    observer: Arc<dyn FailedAttemptObserver>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            validator: ResultValidator::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FailedAttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 제한된 횟수로 재시도합니다.
    ///
    /// 모든 시도가 실패하면 마지막 에러를 `RetriesExhausted`로 감싸 반환합니다.
    pub async fn execute<F, Fut>(&self, operation: &str, mut call: F) -> ExchangeResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<RawResponse>>,
    {
        let attempts = self.policy.max_attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.attempt(&mut call).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.observer.on_failed_attempt(operation, attempt, &err);
                    last_error = Some(err);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(ExchangeError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| {
                ExchangeError::Unexpected("no attempt was made".to_string())
            })),
        })
    }

    /// 성공할 때까지 재시도합니다 (차트 데이터 경로).
    pub async fn execute_unbounded<F, Fut>(&self, operation: &str, mut call: F) -> String
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<RawResponse>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.attempt(&mut call).await {
                Ok(value) => return value,
                Err(err) => self.observer.on_failed_attempt(operation, attempt, &err),
            }
            tokio::time::sleep(self.policy.delay).await;
        }
    }

    async fn attempt<F, Fut>(&self, call: &mut F) -> ExchangeResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<RawResponse>>,
    {
        let raw = call().await?;
        self.validator.validate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenignKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(u32, bool)>>,
    }

    impl FailedAttemptObserver for RecordingObserver {
        fn on_failed_attempt(&self, _operation: &str, attempt: u32, error: &ExchangeError) {
            self.seen.lock().unwrap().push((attempt, error.is_benign()));
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("returnTicker", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some("{}".to_string())) }
            })
            .await;

        assert_eq!(result.unwrap(), "{}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_performs_initial_plus_retries() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = RetryExecutor::new(fast_policy(2)).with_observer(observer.clone());
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("returnOpenOrders", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some("Nonce must be greater".to_string())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ExchangeError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.benign_kind(), Some(BenignKind::Nonce));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![(1, true), (2, true), (3, true)]
        );
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = RetryExecutor::new(fast_policy(3)).with_observer(observer.clone());
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("buy", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ExchangeError::NetworkError("reset".to_string()))
                    } else {
                        Ok(Some(r#"{"orderNumber":"1"}"#.to_string()))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), r#"{"orderNumber":"1"}"#);
        assert_eq!(*observer.seen.lock().unwrap(), vec![(1, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retries_until_success() {
        let executor = RetryExecutor::new(RetryPolicy::new(0, Duration::from_millis(500)));
        let calls = AtomicU32::new(0);

        let value = executor
            .execute_unbounded("returnChartData", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 20 {
                        Ok(None)
                    } else {
                        Ok(Some("[]".to_string()))
                    }
                }
            })
            .await;

        assert_eq!(value, "[]");
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = ConnectionSettings {
            max_retries: 4,
            retry_delay_ms: 250,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
