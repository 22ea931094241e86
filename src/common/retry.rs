//! 有界指数退避重试
//!
//! 所有对远端的调用（元数据、列目录、复制、删除、授权）共用同一个重试策略值，
//! 调用方通过 `retryable` 判定函数决定某个错误是否值得再试一次。

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;

/// 重试策略
///
/// 第 n 次失败后的等待时间为 `clamp(base * 2^(n-1), min_backoff, max_backoff)`，
/// 默认值：3 次尝试，等待 3s、4s，上限 6s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 指数退避基数
    pub base: Duration,
    /// 最小等待时间
    pub min_backoff: Duration,
    /// 最大等待时间
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(2),
            min_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(6),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_secs(config.base_secs),
            min_backoff: Duration::from_secs(config.min_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// 不等待的策略（测试和本地调用用）
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: Duration::ZERO,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base.saturating_mul(factor);
        delay.clamp(self.min_backoff, self.max_backoff.max(self.min_backoff))
    }
}

/// 按策略执行异步操作
///
/// - 成功立即返回
/// - `retryable` 返回 false 时不再重试，直接返回该错误
/// - 次数用尽后返回最后一次的错误
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !retryable(&err) {
                    if attempt > 1 {
                        info!("{}: Total Attempts: {}", operation, attempt);
                    }
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                warn!(
                    "{} 失败（第 {}/{} 次）: {}，{:?} 后重试",
                    operation, attempt, policy.max_attempts, err, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(3)); // 2s 被抬到下限 3s
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(6)); // 8s 被压到上限 6s
        assert_eq!(policy.backoff(30), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_policy(&RetryPolicy::immediate(3), "op", |_| true, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_policy(&RetryPolicy::immediate(3), "op", |_| true, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("fail {}", n))
            })
            .await;

        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_with_policy(&RetryPolicy::immediate(3), "op", |_| false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
