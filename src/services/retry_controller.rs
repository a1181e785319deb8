//! 重试控制 - 业务能力层
//!
//! 包装单次后端调用：有限次数、指数退避、每次响应都经过质量检查。
//! 不读写检查点，结果交给上层决定如何保存。

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::BackendError;
use crate::infrastructure::Backend;
use crate::models::{
    Attempt, CheckpointRecord, FailureReason, QualityVerdict, RejectReason, WorkItem,
    NO_RESPONSE_SENTINEL,
};
use crate::services::quality_gate::QualityGate;

/// 指数退避策略：第 n 次尝试失败后等待 `base^n` 秒，不超过 `max_delay`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn exponential(base: f64, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    /// 第 `attempt` 次尝试之后的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.base.powi(attempt as i32);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// 重试控制器
///
/// 保证对同一个题目最多调用 `max_attempts` 次后端。
#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: u32,
    backoff: BackoffPolicy,
    call_timeout: Duration,
}

impl RetryController {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffPolicy::exponential(config.backoff_base, config.max_backoff),
            call_timeout: config.call_timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 带重试地处理一个题目
    ///
    /// 通过质量检查时立即返回 `accepted = true` 的记录；
    /// 次数用完仍未通过时返回降级记录。
    pub async fn attempt_with_retry<B>(
        &self,
        item: &WorkItem,
        backend: &B,
        gate: &QualityGate,
    ) -> CheckpointRecord
    where
        B: Backend + ?Sized,
    {
        self.attempt_with_cancel(item, backend, gate, &CancellationToken::new())
            .await
    }

    /// 与 `attempt_with_retry` 相同，但退避等待期间可被取消
    ///
    /// 正在进行的后端调用不会被打断。
    pub async fn attempt_with_cancel<B>(
        &self,
        item: &WorkItem,
        backend: &B,
        gate: &QualityGate,
        cancel: &CancellationToken,
    ) -> CheckpointRecord
    where
        B: Backend + ?Sized,
    {
        let mut attempts: Vec<Attempt> = Vec::with_capacity(self.max_attempts as usize);
        let mut last_response: Option<(String, RejectReason)> = None;
        let mut last_error: Option<String> = None;
        let mut cancelled = false;

        for attempt_number in 1..=self.max_attempts {
            let started = Instant::now();
            let outcome = match timeout(self.call_timeout, backend.call(item.request_text())).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    seconds: self.call_timeout.as_secs(),
                }),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) => {
                    let verdict = gate.evaluate(&response);
                    attempts.push(Attempt {
                        attempt_number,
                        raw_response: Some(response.clone()),
                        verdict,
                        error: None,
                        elapsed_ms,
                    });

                    match verdict {
                        QualityVerdict::Accept => {
                            debug!(
                                "[{}] ✓ 第 {}/{} 次尝试通过质量检查",
                                item.key.short(),
                                attempt_number,
                                self.max_attempts
                            );
                            return accepted_record(item, response, attempts, backend.name());
                        }
                        QualityVerdict::Reject(reason) => {
                            warn!(
                                "[{}] ⚠️ 第 {}/{} 次尝试未通过质量检查: {}",
                                item.key.short(),
                                attempt_number,
                                self.max_attempts,
                                reason
                            );
                            last_response = Some((response, reason));
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "[{}] ❌ 第 {}/{} 次调用失败: {}",
                        item.key.short(),
                        attempt_number,
                        self.max_attempts,
                        e
                    );
                    attempts.push(Attempt {
                        attempt_number,
                        raw_response: None,
                        verdict: QualityVerdict::Reject(RejectReason::Empty),
                        error: Some(e.to_string()),
                        elapsed_ms,
                    });
                    last_error = Some(e.to_string());
                }
            }

            if attempt_number < self.max_attempts {
                let delay = self.backoff.delay(attempt_number);
                debug!("[{}] 等待 {:?} 后重试", item.key.short(), delay);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        warn!("[{}] 收到取消信号，停止重试", item.key.short());
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        let failure = if cancelled {
            FailureReason::Cancelled
        } else {
            match (&last_response, last_error) {
                (Some((_, reason)), _) => FailureReason::Rejected { reason: *reason },
                (None, message) => FailureReason::Backend {
                    message: message.unwrap_or_default(),
                },
            }
        };

        let final_answer = last_response
            .map(|(response, _)| response)
            .unwrap_or_else(|| NO_RESPONSE_SENTINEL.to_string());

        CheckpointRecord {
            key: item.key.clone(),
            source_text: item.raw_text.clone(),
            final_answer,
            accepted: false,
            attempts,
            timestamp: Utc::now(),
            failure: Some(failure),
            answers: BTreeMap::new(),
        }
    }
}

fn accepted_record(
    item: &WorkItem,
    response: String,
    attempts: Vec<Attempt>,
    backend_name: &str,
) -> CheckpointRecord {
    let mut answers = BTreeMap::new();
    answers.insert(backend_name.to_string(), response.clone());

    CheckpointRecord {
        key: item.key.clone(),
        source_text: item.raw_text.clone(),
        final_answer: response,
        accepted: true,
        attempts,
        timestamp: Utc::now(),
        failure: None,
        answers,
    }
}
