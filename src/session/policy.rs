//! 状态检查的重试策略与固定延迟
//!
//! 固定次数、固定间隔，不做指数退避。

use std::future::Future;
use std::time::Duration;

use crate::config::TimingSection;
use crate::orchestration::ApiError;

/// 固定间隔重试；NotFound 是有效答案，不重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(timing: &TimingSection) -> Self {
        Self {
            attempts: timing.status_attempts.max(1),
            delay: timing.status_retry_delay(),
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}/{}", what, attempt, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) if attempt >= attempts => {
                    tracing::warn!("{} failed after {} attempts: {}", what, attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        e,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// 控制器用到的其余固定延迟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// start / stop 之后延迟一次状态复查
    pub recheck_delay: Duration,
    /// 提交清理工作负载后等待其跑完再删除
    pub cleanup_settle: Duration,
    pub cleanup_linger_secs: u64,
}

impl Timings {
    pub fn from_config(timing: &TimingSection) -> Self {
        Self {
            recheck_delay: timing.recheck_delay(),
            cleanup_settle: timing.cleanup_settle(),
            cleanup_linger_secs: timing.cleanup_linger_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing_then_ok(failures: u32, calls: &AtomicU32) -> Result<&'static str, ApiError> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(ApiError::Transient(format!("failure {}", n)))
        } else {
            Ok("ok")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_absorbed() {
        let calls = &AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = RetryPolicy::default()
            .run("check", move || async move { failing_then_ok(2, calls) })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_surface_last_error() {
        let calls = &AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("check", move || async move { failing_then_ok(3, calls) })
            .await;
        assert_eq!(result.unwrap_err(), ApiError::Transient("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("check", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::NotFound("x".to_string()))
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
