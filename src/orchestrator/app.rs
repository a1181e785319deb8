//! 应用入口 - 编排层
//!
//! 1. **应用初始化**：检查配置、创建运行日志
//! 2. **批量模式**：加载题目和检查点，驱动后端生成答案
//! 3. **合并模式**：合并分片，输出完整结果和不完整记录报告

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppMode, Config};
use crate::infrastructure::OpenAiBackend;
use crate::orchestrator::batch_driver::BatchDriver;
use crate::orchestrator::shard_reconciler::{union_answers, ShardReconciler};
use crate::services::{CheckpointStore, QualityGate, RetryController};
use crate::utils::logging;
use crate::workflow::ItemFlow;

/// 应用主结构
pub struct App {
    config: Config,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置检查失败")?;

        // 初始化日志文件
        logging::init_log_file(&config.batch.run_log_file)?;

        logging::log_startup(&config);

        Ok(Self { config })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        match self.config.mode {
            AppMode::Batch => self.run_batch().await,
            AppMode::Merge => self.run_merge().await,
        }
    }

    async fn run_batch(&self) -> Result<()> {
        info!("\n📁 正在扫描待处理的题目...");
        let items = crate::models::load_all_toml_files(&self.config.batch.items_folder).await?;

        if items.is_empty() {
            warn!("⚠️ 没有找到待处理的题目，程序结束");
            return Ok(());
        }

        let mut store = CheckpointStore::load(&self.config.batch.checkpoint_path)
            .await
            .context("加载检查点失败")?;
        logging::log_items_loaded(items.len(), store.len());

        let flow = ItemFlow::new(
            Arc::new(OpenAiBackend::new(&self.config.llm)),
            QualityGate::new(&self.config.quality)?,
            RetryController::new(&self.config.retry),
        );

        let cancel = CancellationToken::new();
        spawn_ctrl_c_handler(cancel.clone());

        let driver = BatchDriver::new(flow, &self.config.batch).with_cancellation(cancel);
        match driver.run(items, &mut store).await {
            Ok(summary) => {
                logging::print_final_stats(&summary, &self.config.batch.run_log_file);
                Ok(())
            }
            Err(abort) => {
                logging::print_final_stats(&abort.summary, &self.config.batch.run_log_file);
                Err(abort.error.into())
            }
        }
    }

    async fn run_merge(&self) -> Result<()> {
        let merge = &self.config.merge;
        let reconciler =
            ShardReconciler::new(merge).with_subfield_merge(Arc::new(union_answers));

        let result = reconciler
            .reconcile_files(
                &merge.shard_paths,
                &merge.output_path,
                &merge.incomplete_output_path,
            )
            .await
            .context("分片合并失败")?;

        logging::log_merge_summary(&result.summary);
        Ok(())
    }
}

/// 收到 Ctrl-C 后发出取消信号
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("⏹️ 收到中断信号，等待进行中的题目完成后保存...");
                cancel.cancel();
            }
            Err(e) => warn!("无法监听中断信号: {}", e),
        }
    });
}
