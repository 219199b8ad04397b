//! 重试引擎：有界重试 + 可配置退避
//!
//! 同一套算法同时服务阻塞调用（`run`，线程 sleep）与可挂起调用（`run_async`，
//! tokio sleep 并在等待期间响应取消）。尝试计数从 1 开始；失败时用 RetryConfig 的谓词分类，
//! 不可重试或已到 max_attempts 则返回 RetryExhausted（携带全部失败记录）。

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::error::{AgentError, ErrorKind, FailureRecord, PlatformErrorKind, RetryExhausted};

/// 退避策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    #[default]
    Exponential,
    Fibonacci,
    /// 指数退避 ± 随机比例抖动
    ExponentialJitter,
}

/// 可重试判定：输入错误种类
pub type RetryPredicate = Arc<dyn Fn(&ErrorKind) -> bool + Send + Sync>;

/// 重试配置；预置 STANDARD / AGGRESSIVE / CONSERVATIVE 三档，仅数值参数不同
#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 抖动比例（0..=1），仅 ExponentialJitter 使用
    pub jitter: f64,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryConfig {
    pub fn new(
        backoff: BackoffKind,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            backoff,
            base_delay,
            max_delay,
            jitter: 0.1,
            retryable: Arc::new(ErrorKind::is_transient),
        }
    }

    /// 标准：适中的指数退避
    pub fn standard() -> Self {
        Self::new(
            BackoffKind::Exponential,
            3,
            Duration::from_millis(100),
            Duration::from_secs(2),
        )
    }

    /// 积极：更多尝试、更短的基础延迟，适合不稳定环境
    pub fn aggressive() -> Self {
        Self::new(
            BackoffKind::Exponential,
            6,
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
    }

    /// 保守：少量尝试、较长的基础延迟
    pub fn conservative() -> Self {
        Self::new(
            BackoffKind::Exponential,
            2,
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
    }

    /// 按名称取预置配置（standard / aggressive / conservative）
    pub fn profile(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "aggressive" => Some(Self::aggressive()),
            "conservative" => Some(Self::conservative()),
            _ => None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// 自定义可重试谓词
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorKind) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// 仅对列出的平台错误种类重试
    pub fn retry_on(self, kinds: Vec<PlatformErrorKind>) -> Self {
        self.with_retryable(move |kind| matches!(kind, ErrorKind::Platform(k) if kinds.contains(k)))
    }

    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        (self.retryable)(kind)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_attempts < 1 {
            return Err(AgentError::Config("retry max_attempts must be >= 1".into()));
        }
        if self.base_delay.is_zero() {
            return Err(AgentError::Config("retry base_delay must be > 0".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(AgentError::Config(format!(
                "retry max_delay ({:?}) must be >= base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(AgentError::Config("retry jitter must be within [0, 1]".into()));
        }
        Ok(())
    }

    /// 第 `attempt` 次失败之后的等待时长，上限 max_delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let exponential = || {
            2u32.checked_pow(n - 1)
                .map(|factor| self.base_delay.saturating_mul(factor))
                .unwrap_or(Duration::MAX)
        };
        let raw = match self.backoff {
            BackoffKind::Constant => self.base_delay,
            BackoffKind::Linear => self.base_delay.saturating_mul(n),
            BackoffKind::Exponential => exponential(),
            BackoffKind::Fibonacci => self.base_delay.saturating_mul(fibonacci(n)),
            BackoffKind::ExponentialJitter => {
                let value = exponential().min(self.max_delay);
                let spread = self.jitter.clamp(0.0, 1.0);
                if spread > 0.0 {
                    value.mul_f64(1.0 + rand::thread_rng().gen_range(-spread..=spread))
                } else {
                    value
                }
            }
        };
        raw.min(self.max_delay)
    }
}

/// fib(1) = 1, fib(2) = 1, fib(3) = 2 ...
fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}

/// 成功结果及其过程中记录的失败尝试
#[derive(Debug, Clone)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
    pub failures: Vec<FailureRecord>,
}

impl<T> Retried<T> {
    pub fn delays(&self) -> Vec<Duration> {
        self.failures.iter().filter_map(|f| f.delay).collect()
    }
}

/// 累计统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub exhausted: u64,
    pub retries: u64,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_attempts as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    successful: AtomicU64,
    exhausted: AtomicU64,
    retries: AtomicU64,
}

/// 重试执行器
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    counters: Counters,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 阻塞模式：退避期间阻塞当前线程
    pub fn run<T, F>(&self, mut operation: F) -> Result<Retried<T>, AgentError>
    where
        F: FnMut(u32) -> Result<T, AgentError>,
    {
        let mut failures = Vec::new();
        let mut attempt = 1;
        loop {
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            match operation(attempt) {
                Ok(value) => return Ok(self.succeeded(value, attempt, failures)),
                Err(err) => match self.record_failure(attempt, &err, &mut failures) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(self.exhausted(failures)),
                },
            }
        }
    }

    /// 挂起模式：退避期间让出调度器；每次尝试前与等待期间检查取消
    pub async fn run_async<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<Retried<T>, AgentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut failures = Vec::new();
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            match operation(attempt).await {
                Ok(value) => return Ok(self.succeeded(value, attempt, failures)),
                Err(err) => match self.record_failure(attempt, &err, &mut failures) {
                    Some(delay) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    None => return Err(self.exhausted(failures)),
                },
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_attempts: self.counters.attempts.load(Ordering::Relaxed),
            successful: self.counters.successful.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.attempts.store(0, Ordering::Relaxed);
        self.counters.successful.store(0, Ordering::Relaxed);
        self.counters.exhausted.store(0, Ordering::Relaxed);
        self.counters.retries.store(0, Ordering::Relaxed);
    }

    fn succeeded<T>(&self, value: T, attempts: u32, failures: Vec<FailureRecord>) -> Retried<T> {
        self.counters.successful.fetch_add(1, Ordering::Relaxed);
        Retried {
            value,
            attempts,
            failures,
        }
    }

    fn exhausted(&self, failures: Vec<FailureRecord>) -> AgentError {
        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        AgentError::RetryExhausted(RetryExhausted { failures })
    }

    /// 记录一次失败；返回 Some(delay) 表示应等待后重试
    fn record_failure(
        &self,
        attempt: u32,
        err: &AgentError,
        failures: &mut Vec<FailureRecord>,
    ) -> Option<Duration> {
        let kind = err.kind();
        let retry = self.config.is_retryable(&kind) && attempt < self.config.max_attempts;
        let delay = retry.then(|| self.config.delay_for(attempt));
        failures.push(FailureRecord {
            attempt,
            kind,
            message: err.to_string(),
            delay,
        });
        match delay {
            Some(d) => {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    attempt,
                    max_attempts = self.config.max_attempts,
                    delay_ms = d.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
            }
            None => {
                tracing::error!(
                    attempt,
                    max_attempts = self.config.max_attempts,
                    retryable = self.config.is_retryable(&kind),
                    error = %err,
                    "operation failed, giving up"
                );
            }
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{PlatformError, ValidationKind};

    fn cfg(backoff: BackoffKind, base_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig::new(
            backoff,
            3,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    #[test]
    fn test_backoff_sequences() {
        let ms = |c: &RetryConfig, n| c.delay_for(n).as_millis() as u64;

        let c = cfg(BackoffKind::Constant, 10, 1000);
        assert_eq!((ms(&c, 1), ms(&c, 4)), (10, 10));

        let c = cfg(BackoffKind::Linear, 10, 1000);
        assert_eq!((ms(&c, 1), ms(&c, 2), ms(&c, 3)), (10, 20, 30));

        let c = cfg(BackoffKind::Exponential, 10, 1000);
        assert_eq!((ms(&c, 1), ms(&c, 2), ms(&c, 3), ms(&c, 4)), (10, 20, 40, 80));

        let c = cfg(BackoffKind::Fibonacci, 10, 1000);
        let seq: Vec<u64> = (1..=6).map(|n| ms(&c, n)).collect();
        assert_eq!(seq, vec![10, 10, 20, 30, 50, 80]);
    }

    #[test]
    fn test_backoff_capped_at_max_delay() {
        let c = cfg(BackoffKind::Exponential, 100, 250);
        assert_eq!(c.delay_for(10), Duration::from_millis(250));
        assert_eq!(c.delay_for(5000), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let c = cfg(BackoffKind::ExponentialJitter, 100, 10_000).with_jitter(0.2);
        for _ in 0..50 {
            let d = c.delay_for(3).as_secs_f64();
            assert!((0.32..=0.48).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[test]
    fn test_profiles_differ_only_numerically() {
        let (s, a, c) = (
            RetryConfig::standard(),
            RetryConfig::aggressive(),
            RetryConfig::conservative(),
        );
        assert_eq!(s.backoff, a.backoff);
        assert_eq!(s.backoff, c.backoff);
        assert!(a.max_attempts > s.max_attempts && s.max_attempts > c.max_attempts);
        assert!(a.base_delay < s.base_delay && s.base_delay < c.base_delay);
        assert!(RetryConfig::profile("Aggressive").is_some());
        assert!(RetryConfig::profile("reckless").is_none());
        for p in [s, a, c] {
            p.validate().unwrap();
        }
    }

    #[test]
    fn test_validate_rejects_bad_numbers() {
        let mut c = RetryConfig::standard();
        c.max_attempts = 0;
        assert!(c.validate().is_err());

        let c = cfg(BackoffKind::Constant, 0, 10);
        assert!(c.validate().is_err());

        let c = cfg(BackoffKind::Constant, 100, 10);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_fails_twice_then_succeeds() {
        let executor = RetryExecutor::new(cfg(BackoffKind::Exponential, 1, 100));
        let mut calls = 0;
        let result = executor
            .run(|attempt| {
                calls += 1;
                if attempt < 3 {
                    Err(AgentError::from(PlatformError::busy("busy")))
                } else {
                    Ok("clicked")
                }
            })
            .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(result.value, "clicked");
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.delays(),
            vec![Duration::from_millis(1), Duration::from_millis(2)]
        );
    }

    #[test]
    fn test_always_failing_exhausts_with_all_records() {
        let executor = RetryExecutor::new(cfg(BackoffKind::Constant, 1, 10));
        let err = executor
            .run(|_| -> Result<(), AgentError> { Err(PlatformError::timeout("slow").into()) })
            .unwrap_err();
        match err {
            AgentError::RetryExhausted(e) => {
                assert_eq!(e.failures.len(), 3);
                let attempts: Vec<u32> = e.failures.iter().map(|f| f.attempt).collect();
                assert_eq!(attempts, vec![1, 2, 3]);
                assert!(e.failures[2].delay.is_none());
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
        let stats = executor.stats();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.retries, 2);
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let executor = RetryExecutor::new(cfg(BackoffKind::Constant, 1, 10));
        let mut calls = 0;
        let err = executor
            .run(|_| -> Result<(), AgentError> {
                calls += 1;
                Err(PlatformError::new(PlatformErrorKind::PermissionDenied, "no a11y").into())
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, AgentError::RetryExhausted(ref e) if e.failures.len() == 1));
    }

    #[test]
    fn test_custom_retry_on_list() {
        let config = cfg(BackoffKind::Constant, 1, 10).retry_on(vec![PlatformErrorKind::Other]);
        assert!(config.is_retryable(&ErrorKind::Platform(PlatformErrorKind::Other)));
        assert!(!config.is_retryable(&ErrorKind::Platform(PlatformErrorKind::Busy)));
        assert!(!config.is_retryable(&ErrorKind::Validation(ValidationKind::EmptyKeys)));
    }

    #[test]
    fn test_stats_success_rate() {
        let executor = RetryExecutor::new(cfg(BackoffKind::Constant, 1, 10));
        let _ = executor.run(|a| {
            if a == 1 {
                Err(AgentError::from(PlatformError::busy("x")))
            } else {
                Ok(())
            }
        });
        let stats = executor.stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful, 1);
        assert!((stats.success_rate() - 0.5).abs() < 1e-9);
        executor.reset_stats();
        assert_eq!(executor.stats(), RetryStats::default());
    }

    #[tokio::test]
    async fn test_run_async_matches_blocking_algorithm() {
        let executor = RetryExecutor::new(cfg(BackoffKind::Exponential, 1, 100));
        let token = CancellationToken::new();
        let result = executor
            .run_async(
                |attempt| async move {
                    if attempt < 3 {
                        Err(AgentError::from(PlatformError::busy("busy")))
                    } else {
                        Ok(attempt)
                    }
                },
                &token,
            )
            .await
            .unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(
            result.delays(),
            vec![Duration::from_millis(1), Duration::from_millis(2)]
        );
    }

    #[tokio::test]
    async fn test_run_async_cancelled_during_wait() {
        let executor = RetryExecutor::new(RetryConfig::new(
            BackoffKind::Constant,
            5,
            Duration::from_secs(30),
            Duration::from_secs(30),
        ));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = executor
            .run_async(
                |_| async { Err::<(), _>(AgentError::from(PlatformError::busy("busy"))) },
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(executor.stats().total_attempts, 1);
    }
}
