//! 题目处理上下文
//!
//! 封装"我正在处理第几个题目"这一信息，以及题目在一次运行中的状态

use std::fmt::Display;

use crate::models::ItemKey;

/// 题目在一次运行中的状态
///
/// `Pending → Skipped` 或 `Pending → Processing → Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// 本次运行尚未检查
    Pending,
    /// 已有有效记录，未调用后端
    Skipped,
    /// 正在调用后端
    Processing,
    /// 结果已写入检查点存储
    Completed,
}

impl ItemState {
    /// 是否为合法的状态转换
    pub fn can_transition_to(self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (ItemState::Pending, ItemState::Skipped)
                | (ItemState::Pending, ItemState::Processing)
                | (ItemState::Processing, ItemState::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Skipped | ItemState::Completed)
    }
}

/// 题目处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 题目序号（从1开始，仅用于日志显示）
    pub index: usize,
    /// 本次运行的题目总数
    pub total: usize,
    /// 题目标识
    pub key: ItemKey,
}

impl ItemCtx {
    pub fn new(index: usize, total: usize, key: ItemKey) -> Self {
        Self { index, total, key }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[题目 {}/{} #{}]", self.index, self.total, self.key.short())
    }
}
