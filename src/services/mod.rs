//! 业务能力层
//!
//! 每个服务只描述"我能对单个题目做什么"，不关心流程顺序：
//! - `QualityGate` - 判断答案是否可用
//! - `RetryController` - 带退避的重试调用
//! - `CheckpointStore` - 检查点加载与原子保存
//! - `NameMatcher` - 模型名模糊匹配

pub mod checkpoint_store;
pub mod name_matcher;
pub mod quality_gate;
pub mod retry_controller;

pub use checkpoint_store::{write_json_atomic, CheckpointStore};
pub use name_matcher::{ExactMatcher, FuzzyMatcher, NameMatcher};
pub use quality_gate::QualityGate;
pub use retry_controller::{BackoffPolicy, RetryController};
