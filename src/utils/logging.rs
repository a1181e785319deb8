/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use anyhow::{Context, Result};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppMode, Config};
use crate::orchestrator::{RunSummary, SummaryCounts};

/// 初始化 tracing 日志，默认级别 info，可通过 `RUST_LOG` 覆盖
///
/// 重复调用不会报错
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化运行日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批量答题日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法创建日志文件: {}", log_file_path))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    match config.mode {
        AppMode::Batch => {
            info!("🚀 程序启动 - 批量答题模式");
            info!("🤖 模型: {}", config.llm.model_name);
            info!("📊 最大并发数: {}", config.batch.max_concurrent_items);
            info!(
                "🔁 最多尝试 {} 次, 每 {} 题保存一次",
                config.retry.max_attempts, config.batch.save_interval
            );
            info!("💾 检查点: {}", config.batch.checkpoint_path.display());
        }
        AppMode::Merge => {
            info!("🚀 程序启动 - 分片合并模式");
            info!("📂 分片数: {}", config.merge.shard_paths.len());
            info!("📋 必需模型: {:?}", config.merge.required_models);
        }
    }
    info!("{}", "=".repeat(60));
}

/// 记录题目加载信息
///
/// # 参数
/// - `total`: 题目总数
/// - `existing`: 检查点中已有的记录数
pub fn log_items_loaded(total: usize, existing: usize) {
    info!("✓ 找到 {} 个题目", total);
    if existing > 0 {
        info!("💡 检查点中已有 {} 条记录，将跳过有效记录\n", existing);
    }
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📄 题目总数: {} (重复 {})", summary.total, summary.duplicates);
    info!("⏭️ 跳过: {}", summary.skipped);
    info!(
        "🆕 新生成: {}, 重新生成: {}",
        summary.newly_generated, summary.regenerated
    );
    info!("✅ 通过: {}", summary.accepted);
    info!("⚠️ 降级: {}", summary.degraded);
    info!(
        "📡 后端调用: {} 次 (失败 {})",
        summary.backend_calls, summary.backend_failures
    );
    for (reason, count) in &summary.rejections {
        info!("   - {}: {}", reason, count);
    }
    if summary.interrupted {
        warn!("⏹️ 运行被取消，未完成: {}", summary.cancelled_items);
    }
    if let Some(fatal) = &summary.fatal_error {
        warn!("❌ 致命错误: {}", fatal);
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 打印合并统计
pub fn log_merge_summary(counts: &SummaryCounts) {
    info!("\n{}", "=".repeat(60));
    info!("📊 合并完成统计");
    info!("{}", "=".repeat(60));
    info!("📄 记录总数: {}", counts.total);
    info!("✅ 完整: {}", counts.complete);
    info!("⚠️ 不完整: {}", counts.incomplete);
    info!("通过 / 降级: {} / {}", counts.accepted, counts.degraded);
    for (reason, count) in &counts.rejections {
        info!("   - {}: {}", reason, count);
    }
    info!("🤖 出现过的模型: {:?}", counts.models_seen);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
