//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和结果合并，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行）
//! - 按运行模式分派到批量处理或分片合并
//! - 把 Ctrl-C 接到取消信号上
//!
//! ### `batch_driver` - 批量驱动器
//! - 去重、跳过已有有效记录的题目
//! - 控制并发数量（Semaphore）
//! - 唯一持有检查点存储，按间隔保存
//!
//! ### `shard_reconciler` - 分片合并器
//! - 按优先级合并多个结果文件
//! - 按必需模型拆分完整 / 不完整记录
//!
//! ## 层次关系
//!
//! ```text
//! app
//!     ↓
//! batch_driver (处理 Vec<WorkItem>)      shard_reconciler (处理 Vec<ShardSource>)
//!     ↓
//! workflow::ItemFlow (处理单个 WorkItem)
//!     ↓
//! services (能力层：quality gate / retry / checkpoint)
//!     ↓
//! infrastructure (基础设施：Backend)
//! ```

pub mod app;
pub mod batch_driver;
pub mod shard_reconciler;

// 重新导出主要类型
pub use app::App;
pub use batch_driver::{BatchAbort, BatchDriver, RunSummary};
pub use shard_reconciler::{
    merge_records, union_answers, IncompleteRecord, MergeFn, MergeKeySet, MergedResult,
    ShardReconciler, ShardSource, SummaryCounts,
};
