//! 批量驱动器 - 编排层
//!
//! ## 职责
//!
//! 1. **去重**：按题目标识去重，保证同一个题目同一时刻最多只有一次处理
//! 2. **跳过**：已有有效记录的题目不再调用后端
//! 3. **并发控制**：使用 Semaphore 限制同时处理的题目数量
//! 4. **持久化**：唯一的写入任务持有检查点存储，每完成 `save_interval` 个题目保存一次，结束时再保存一次
//! 5. **取消**：收到取消信号后不再开始新题目，正在进行的调用完成后做最后一次保存
//!
//! 检查点保存失败是致命错误：立即停止派发并返回错误。
//! 单个题目重试用完不是错误，只会产生降级记录。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BatchConfig;
use crate::error::{AppError, AppResult};
use crate::models::{CheckpointRecord, FailureReason, RejectReason, WorkItem};
use crate::services::CheckpointStore;
use crate::workflow::{ItemCtx, ItemFlow, ItemState, SkipPredicate};

/// 一次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 输入题目数（去重前）
    pub total: usize,
    /// 重复题目数
    pub duplicates: usize,
    /// 已有有效记录而跳过的题目数
    pub skipped: usize,
    /// 首次生成的题目数
    pub newly_generated: usize,
    /// 已有记录无效而重新生成的题目数
    pub regenerated: usize,
    /// 本次运行中通过质量检查的题目数
    pub accepted: usize,
    /// 本次运行中保存为降级记录的题目数
    pub degraded: usize,
    /// 因取消而未开始或提前结束的题目数
    pub cancelled_items: usize,
    /// 后端调用总次数
    pub backend_calls: usize,
    /// 后端调用失败次数
    pub backend_failures: usize,
    /// 各拒绝原因出现的次数
    pub rejections: BTreeMap<RejectReason, usize>,
    /// 是否被取消
    pub interrupted: bool,
    /// 导致运行终止的致命错误
    pub fatal_error: Option<String>,
}

impl RunSummary {
    /// 本次运行实际处理（调用过后端）的题目数
    pub fn processed(&self) -> usize {
        self.newly_generated + self.regenerated
    }

    fn record_completion(&mut self, record: &CheckpointRecord, kind: DispatchKind) {
        match kind {
            DispatchKind::New => self.newly_generated += 1,
            DispatchKind::Regenerate => self.regenerated += 1,
        }
        if record.accepted {
            self.accepted += 1;
        } else {
            self.degraded += 1;
        }
        if record.failure == Some(FailureReason::Cancelled) {
            self.cancelled_items += 1;
        }

        self.backend_calls += record.attempts.len();
        self.backend_failures += record
            .attempts
            .iter()
            .filter(|attempt| attempt.error.is_some())
            .count();
        for reason in record.rejection_reasons() {
            *self.rejections.entry(reason).or_insert(0) += 1;
        }
    }
}

/// 致命错误终止的运行
///
/// 同时带回终止前的统计，调用方仍可以输出已完成的部分。
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BatchAbort {
    #[source]
    pub error: AppError,
    pub summary: RunSummary,
}

/// 需要处理的题目是首次生成还是重新生成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchKind {
    New,
    Regenerate,
}

struct Planned {
    item: WorkItem,
    ctx: ItemCtx,
    kind: DispatchKind,
}

struct Completion {
    record: CheckpointRecord,
    ctx: ItemCtx,
    kind: DispatchKind,
}

/// 批量驱动器
pub struct BatchDriver {
    flow: Arc<ItemFlow>,
    skip: SkipPredicate,
    save_interval: usize,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl BatchDriver {
    /// 使用默认跳过规则创建
    pub fn new(flow: ItemFlow, config: &BatchConfig) -> Self {
        let skip = flow.default_skip_predicate();
        Self {
            flow: Arc::new(flow),
            skip,
            save_interval: config.save_interval.max(1),
            max_concurrent: config.max_concurrent_items.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// 替换跳过规则
    pub fn with_skip_predicate(mut self, skip: SkipPredicate) -> Self {
        self.skip = skip;
        self
    }

    /// 使用外部的取消信号
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 处理所有题目
    ///
    /// 返回运行统计；检查点保存失败时返回 [`BatchAbort`]，其中带有终止前的统计
    /// （此前已保存的内容保持完整）。
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        store: &mut CheckpointStore,
    ) -> Result<RunSummary, BatchAbort> {
        let mut summary = RunSummary {
            total: items.len(),
            ..Default::default()
        };

        let plan = self.plan(items, store, &mut summary);
        let planned = plan.len();
        info!(
            "📋 共 {} 个题目: 跳过 {} 个, 重复 {} 个, 待处理 {} 个",
            summary.total, summary.skipped, summary.duplicates, planned
        );

        // 写入任务出错时只停止本次运行，不影响外部的取消信号
        let run_token = self.cancel.child_token();
        let (tx, rx) = mpsc::channel::<Completion>(self.max_concurrent * 2);

        let (dispatched, write_result) = tokio::join!(
            self.dispatch(plan, tx, run_token.clone()),
            write_loop(store, rx, self.save_interval, &run_token, &mut summary),
        );

        summary.cancelled_items += planned - dispatched;
        summary.interrupted = self.cancel.is_cancelled();

        if let Err(e) = write_result {
            error!("❌ 检查点保存失败，停止运行: {}", e);
            summary.fatal_error = Some(e.to_string());
            return Err(BatchAbort { error: e, summary });
        }

        if summary.interrupted {
            warn!(
                "⚠️ 运行被取消: 已完成 {} 个, 未完成 {} 个",
                summary.processed(),
                summary.cancelled_items
            );
        }

        Ok(summary)
    }

    /// 去重并根据已有记录决定每个题目是否需要处理
    fn plan(
        &self,
        items: Vec<WorkItem>,
        store: &CheckpointStore,
        summary: &mut RunSummary,
    ) -> Vec<Planned> {
        let mut seen = HashSet::new();
        let unique: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| {
                let fresh = seen.insert(item.key.clone());
                if !fresh {
                    debug!("[题目 #{}] 重复题目，忽略", item.key.short());
                    summary.duplicates += 1;
                }
                fresh
            })
            .collect();

        let total = unique.len();
        let mut plan = Vec::new();
        for (idx, item) in unique.into_iter().enumerate() {
            let ctx = ItemCtx::new(idx + 1, total, item.key.clone());
            let kind = match store.get(&item.key) {
                Some(existing) if (self.skip)(existing) => {
                    transition(&ctx, ItemState::Pending, ItemState::Skipped);
                    summary.skipped += 1;
                    continue;
                }
                Some(_) => DispatchKind::Regenerate,
                None => DispatchKind::New,
            };
            plan.push(Planned { item, ctx, kind });
        }
        plan
    }

    /// 派发题目到工作任务，返回实际开始处理的题目数
    async fn dispatch(
        &self,
        plan: Vec<Planned>,
        tx: mpsc::Sender<Completion>,
        token: CancellationToken,
    ) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut workers = JoinSet::new();
        let mut dispatched = 0;

        for planned in plan {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if token.is_cancelled() {
                break;
            }

            transition(&planned.ctx, ItemState::Pending, ItemState::Processing);
            dispatched += 1;

            let flow = Arc::clone(&self.flow);
            let tx = tx.clone();
            let token = token.clone();
            workers.spawn(async move {
                let _permit = permit;
                let Planned { item, ctx, kind } = planned;
                let record = flow.run(&item, &ctx, &token).await;
                if tx.send(Completion { record, ctx, kind }).await.is_err() {
                    warn!("[题目 #{}] 写入任务已停止，结果未保存", item.key.short());
                }
            });

            while let Some(result) = workers.try_join_next() {
                log_join_error(result);
            }
        }

        drop(tx);
        while let Some(result) = workers.join_next().await {
            log_join_error(result);
        }

        dispatched
    }
}

/// 唯一持有检查点存储的写入循环
async fn write_loop(
    store: &mut CheckpointStore,
    mut rx: mpsc::Receiver<Completion>,
    save_interval: usize,
    token: &CancellationToken,
    summary: &mut RunSummary,
) -> AppResult<()> {
    let mut unsaved = 0;

    while let Some(Completion { record, ctx, kind }) = rx.recv().await {
        summary.record_completion(&record, kind);
        store.upsert(record);
        transition(&ctx, ItemState::Processing, ItemState::Completed);
        unsaved += 1;

        if unsaved >= save_interval {
            if let Err(e) = store.save().await {
                token.cancel();
                return Err(e);
            }
            info!("💾 已保存检查点 ({} 条记录)", store.len());
            unsaved = 0;
        }
    }

    store.save().await.inspect_err(|_| token.cancel())?;
    info!("💾 最终保存完成 ({} 条记录)", store.len());
    Ok(())
}

fn transition(ctx: &ItemCtx, from: ItemState, to: ItemState) {
    debug_assert!(from.can_transition_to(to));
    debug!("{} {:?} → {:?}", ctx, from, to);
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("❌ 任务执行失败: {}", e);
    }
}
