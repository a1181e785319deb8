//! 题目身份标识
//!
//! 同一道题在不同运行、不同分片之间通过 `ItemKey` 对齐，而不是直接比较原文。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Display;

/// 题目的稳定标识（去除首尾空白后的 SHA-256 十六进制串）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志中使用的短前缀（前 8 个字符）
    ///
    /// 从文件读入的 key 不一定是十六进制串，按字符边界截取。
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 计算题目的标识
///
/// 只去除首尾空白，内部空白与大小写保持不变；空串也会得到合法的标识。
pub fn identify(text: &str) -> ItemKey {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    ItemKey(format!("{:x}", hasher.finalize()))
}

/// 单个待处理题目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// 原始题目文本
    pub raw_text: String,
    /// 由 `raw_text` 计算出的标识，创建后不再变化
    pub key: ItemKey,
    /// 实际发送给后端的 prompt（为空时直接发送原文）
    pub prompt: Option<String>,
}

impl WorkItem {
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let key = identify(&raw_text);
        Self {
            raw_text,
            key,
            prompt: None,
        }
    }

    pub fn with_prompt(raw_text: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::new(raw_text)
        }
    }

    /// 发送给后端的文本
    pub fn request_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.raw_text)
    }
}
