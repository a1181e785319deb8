//! 模型名匹配 - 业务能力层
//!
//! 不同分片里同一个模型的名字写法经常不一致（大小写、连字符、版本后缀），
//! 完整性检查通过这里的匹配函数判断"某个记录到的名字是否覆盖了某个必需的名字"。
//! 匹配规则集中在 `NameMatcher` 中，需要更严格时替换实现即可。

/// 名字匹配规则
pub trait NameMatcher: Send + Sync {
    /// `recorded` 是否覆盖 `required`
    fn matches(&self, recorded: &str, required: &str) -> bool;

    /// 是否为规范化后完全相同的名字（用于消除歧义）
    fn is_exact(&self, recorded: &str, required: &str) -> bool {
        recorded.trim() == required.trim()
    }
}

/// 模糊匹配：忽略大小写和连字符，任意一方是另一方的子串即视为匹配
///
/// 例如 `doubao-pro` 匹配 `Doubao-Pro-32k`，`grok-3` 匹配 `grok3`。
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyMatcher;

impl FuzzyMatcher {
    fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    fn strip_hyphens(name: &str) -> String {
        name.replace('-', "")
    }
}

impl NameMatcher for FuzzyMatcher {
    fn matches(&self, recorded: &str, required: &str) -> bool {
        let recorded = Self::normalize(recorded);
        let required = Self::normalize(required);
        let recorded_bare = Self::strip_hyphens(&recorded);
        let required_bare = Self::strip_hyphens(&required);
        if recorded_bare.is_empty() || required_bare.is_empty() {
            return false;
        }

        recorded.contains(&required)
            || required.contains(&recorded)
            || recorded_bare.contains(&required_bare)
            || required_bare.contains(&recorded_bare)
    }

    fn is_exact(&self, recorded: &str, required: &str) -> bool {
        Self::strip_hyphens(&Self::normalize(recorded))
            == Self::strip_hyphens(&Self::normalize(required))
    }
}

/// 精确匹配（只忽略首尾空白）
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl NameMatcher for ExactMatcher {
    fn matches(&self, recorded: &str, required: &str) -> bool {
        !recorded.trim().is_empty() && recorded.trim() == required.trim()
    }
}
