//! 题目处理流程 - 流程层
//!
//! 核心职责：定义"一个题目"的完整处理流程
//!
//! 流程顺序：
//! 1. 调用后端并重试，直到通过质量检查或次数用完
//! 2. 返回检查点记录（是否保存由编排层决定）
//!
//! 是否跳过已有记录由编排层在派发前判断，这里只提供默认的跳过规则。

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::infrastructure::Backend;
use crate::models::{CheckpointRecord, WorkItem};
use crate::services::{QualityGate, RetryController};
use crate::utils::logging::truncate_text;
use crate::workflow::item_ctx::ItemCtx;

/// 判断已有记录是否可以跳过
pub type SkipPredicate = Arc<dyn Fn(&CheckpointRecord) -> bool + Send + Sync>;

/// 题目处理流程
///
/// - 持有后端、质量检查和重试控制器
/// - 不持有检查点存储
pub struct ItemFlow {
    backend: Arc<dyn Backend>,
    gate: QualityGate,
    retry: RetryController,
}

impl ItemFlow {
    pub fn new(backend: Arc<dyn Backend>, gate: QualityGate, retry: RetryController) -> Self {
        Self {
            backend,
            gate,
            retry,
        }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// 默认的跳过规则：记录已通过，且保存的答案重新检查仍然通过
    pub fn default_skip_predicate(&self) -> SkipPredicate {
        let gate = self.gate.clone();
        Arc::new(move |record: &CheckpointRecord| {
            record.accepted && gate.evaluate(&record.final_answer).is_accept()
        })
    }

    /// 处理一个题目，返回待保存的记录
    pub async fn run(
        &self,
        item: &WorkItem,
        ctx: &ItemCtx,
        cancel: &CancellationToken,
    ) -> CheckpointRecord {
        info!("{} 📝 {}", ctx, truncate_text(&item.raw_text, 40));

        let record = self
            .retry
            .attempt_with_cancel(item, self.backend.as_ref(), &self.gate, cancel)
            .await;

        if record.accepted {
            info!(
                "{} ✓ 已生成答案 (尝试 {} 次)",
                ctx,
                record.attempts.len()
            );
        } else {
            warn!(
                "{} ⚠️ {} 次尝试均未通过，保存降级记录: {}",
                ctx,
                record.attempts.len(),
                truncate_text(&record.final_answer, 40)
            );
        }

        record
    }
}
