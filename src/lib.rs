//! # QA Batch
//!
//! 可恢复的批量答题引擎：对大量题目调用文本生成后端，检查答案质量，
//! 把结果写入可断点续跑的检查点文件，并能合并多个独立运行产生的分片。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 与外部后端交互，只暴露"发送一次请求"的能力
//! - `Backend` - 后端接口
//! - `OpenAiBackend` - OpenAI 兼容接口的实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个题目或单个文件
//! - `QualityGate` - 答案质量检查
//! - `RetryController` - 重试与指数退避
//! - `CheckpointStore` - 检查点加载与原子保存
//! - `NameMatcher` - 模型名匹配规则
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个题目"的完整处理流程
//! - `ItemCtx` - 上下文封装（序号 + 题目标识）
//! - `ItemFlow` - 流程编排（调用 → 质量检查 → 重试）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_driver` - 批量驱动器，管理并发、跳过和保存
//! - `orchestrator/shard_reconciler` - 分片合并与完整性检查
//! - `orchestrator/app` - 应用入口
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{Backend, OpenAiBackend};
pub use models::{identify, CheckpointRecord, ItemKey, WorkItem};
pub use orchestrator::{App, BatchAbort, BatchDriver, MergedResult, RunSummary, ShardReconciler};
pub use services::{CheckpointStore, QualityGate, RetryController};
pub use workflow::{ItemCtx, ItemFlow};
