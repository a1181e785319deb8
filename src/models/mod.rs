//! 数据模型
//!
//! - `work_item` - 题目及其身份标识（ItemKey）
//! - `record` - 单次尝试、质量判定与检查点记录
//! - `loaders` - 从 TOML 文件加载题目

pub mod loaders;
pub mod record;
pub mod work_item;

pub use loaders::{load_all_toml_files, load_toml_items};
pub use record::{
    Attempt, CheckpointRecord, FailureReason, QualityVerdict, RejectReason, NO_RESPONSE_SENTINEL,
};
pub use work_item::{identify, ItemKey, WorkItem};
