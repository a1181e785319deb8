//! 尝试记录与检查点记录

use crate::models::work_item::ItemKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// 所有尝试都没有拿到响应时写入 `final_answer` 的占位内容
pub const NO_RESPONSE_SENTINEL: &str = "[NO RESPONSE]";

/// 质量检查的拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// 空答案
    Empty,
    /// 过短
    TooShort,
    /// 缺少结尾标点（可能被截断）
    NoTerminalPunctuation,
    /// 命中错误模式
    MatchesErrorPattern,
    /// 内容过度重复
    ExcessivelyRepetitive,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::TooShort => "too-short",
            RejectReason::NoTerminalPunctuation => "no-terminal-punctuation",
            RejectReason::MatchesErrorPattern => "matches-error-pattern",
            RejectReason::ExcessivelyRepetitive => "excessively-repetitive",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 质量判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "kebab-case")]
pub enum QualityVerdict {
    Accept,
    Reject(RejectReason),
}

impl QualityVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, QualityVerdict::Accept)
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            QualityVerdict::Accept => None,
            QualityVerdict::Reject(reason) => Some(*reason),
        }
    }
}

/// 单次后端调用的记录，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 第几次尝试（从 1 开始）
    pub attempt_number: u32,
    /// 后端返回的原始内容，调用失败时为空
    #[serde(default)]
    pub raw_response: Option<String>,
    pub verdict: QualityVerdict,
    /// 调用失败时的错误信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 耗时（毫秒）
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// 降级记录的失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureReason {
    /// 最后一次响应未通过质量检查
    Rejected { reason: RejectReason },
    /// 所有尝试都没有拿到响应
    Backend { message: String },
    /// 退避等待期间收到取消信号
    Cancelled,
}

/// 检查点记录
///
/// `accepted = false` 表示降级记录：所有尝试都被拒绝，保留最后一次响应，
/// 下次运行时会重新处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub key: ItemKey,
    pub source_text: String,
    pub final_answer: String,
    pub accepted: bool,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// 按模型名记录的答案，合并分片时按模型取并集
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

impl CheckpointRecord {
    /// 是否为降级记录
    pub fn is_degraded(&self) -> bool {
        !self.accepted
    }

    /// 被拒绝的尝试中出现的原因
    pub fn rejection_reasons(&self) -> impl Iterator<Item = RejectReason> + '_ {
        self.attempts
            .iter()
            .filter(|attempt| attempt.raw_response.is_some())
            .filter_map(|attempt| attempt.verdict.reject_reason())
    }
}
