//! 质量检查服务 - 业务能力层
//!
//! 只负责"判断一个答案能不能用"，纯函数，不调用后端也不写文件。

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use crate::config::QualityConfig;
use crate::error::{AppResult, ConfigError};
use crate::models::{QualityVerdict, RejectReason};

/// 质量检查
///
/// 检查顺序（对去除首尾空白后的答案）：
/// 1. 空答案
/// 2. 长度不足
/// 3. 命中错误模式
/// 4. 缺少结尾标点（足够长时可豁免）
/// 5. 过度重复
#[derive(Debug, Clone)]
pub struct QualityGate {
    min_length: usize,
    terminal_punctuation: Vec<char>,
    error_patterns: Vec<Regex>,
    repetition_threshold: f64,
    repetition_min_tokens: usize,
    long_answer_bypass_length: Option<usize>,
}

impl QualityGate {
    /// 根据配置创建，错误模式编译失败时返回配置错误
    pub fn new(config: &QualityConfig) -> AppResult<Self> {
        let error_patterns = config
            .error_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            min_length: config.min_length,
            terminal_punctuation: config.terminal_punctuation.clone(),
            error_patterns,
            repetition_threshold: config.repetition_threshold,
            repetition_min_tokens: config.repetition_min_tokens,
            long_answer_bypass_length: config.long_answer_bypass_length,
        })
    }

    /// 判定答案质量
    pub fn evaluate(&self, answer: &str) -> QualityVerdict {
        let answer = answer.trim();

        if answer.is_empty() {
            return QualityVerdict::Reject(RejectReason::Empty);
        }

        let length = answer.chars().count();
        if length < self.min_length {
            return QualityVerdict::Reject(RejectReason::TooShort);
        }

        if self.error_patterns.iter().any(|re| re.is_match(answer)) {
            return QualityVerdict::Reject(RejectReason::MatchesErrorPattern);
        }

        if !self.has_terminal_punctuation(answer) && !self.is_long_enough_to_bypass(length) {
            return QualityVerdict::Reject(RejectReason::NoTerminalPunctuation);
        }

        if self.is_excessively_repetitive(answer) {
            return QualityVerdict::Reject(RejectReason::ExcessivelyRepetitive);
        }

        QualityVerdict::Accept
    }

    fn has_terminal_punctuation(&self, answer: &str) -> bool {
        if self.terminal_punctuation.is_empty() {
            return true;
        }
        answer
            .chars()
            .last()
            .is_some_and(|c| self.terminal_punctuation.contains(&c))
    }

    fn is_long_enough_to_bypass(&self, length: usize) -> bool {
        self.long_answer_bypass_length
            .is_some_and(|bypass| length >= bypass)
    }

    fn is_excessively_repetitive(&self, answer: &str) -> bool {
        let tokens: Vec<&str> = answer.split_whitespace().collect();
        if tokens.len() <= self.repetition_min_tokens {
            return false;
        }

        let mut freq: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *freq.entry(token).or_insert(0) += 1;
        }
        let max_freq = freq.values().copied().max().unwrap_or(0);

        max_freq as f64 > self.repetition_threshold * tokens.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gate() -> QualityGate {
        QualityGate::new(&QualityConfig::default()).unwrap()
    }

    fn reject(reason: RejectReason) -> QualityVerdict {
        QualityVerdict::Reject(reason)
    }

    #[test]
    fn test_accepts_complete_answer() {
        assert_eq!(
            gate().evaluate("A sufficiently long and complete answer."),
            QualityVerdict::Accept
        );
        assert_eq!(gate().evaluate("这是一个足够长而且完整的回答。"), QualityVerdict::Accept);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(gate().evaluate(""), reject(RejectReason::Empty));
        assert_eq!(gate().evaluate("  \n\t "), reject(RejectReason::Empty));
    }

    #[test]
    fn test_too_short_counts_chars() {
        assert_eq!(gate().evaluate("short"), reject(RejectReason::TooShort));
        // 9 个汉字，字节数远大于 10
        assert_eq!(gate().evaluate("九个字的中文回答。"), reject(RejectReason::TooShort));
    }

    #[test]
    fn test_error_patterns_are_case_insensitive() {
        assert_eq!(
            gate().evaluate("ERROR: upstream returned 502."),
            reject(RejectReason::MatchesErrorPattern)
        );
        assert_eq!(
            gate().evaluate("[ERROR calling model] something broke."),
            reject(RejectReason::MatchesErrorPattern)
        );
        assert_eq!(
            gate().evaluate("Sorry, Rate Limit exceeded, try later."),
            reject(RejectReason::MatchesErrorPattern)
        );
    }

    #[test]
    fn test_truncation_markers() {
        assert_eq!(
            gate().evaluate("The answer starts here but then..."),
            reject(RejectReason::MatchesErrorPattern)
        );
        assert_eq!(
            gate().evaluate("回答写到一半就停了[未完成]。"),
            reject(RejectReason::MatchesErrorPattern)
        );
    }

    #[test]
    fn test_missing_terminal_punctuation() {
        assert_eq!(
            gate().evaluate("This answer was cut off in the middle of"),
            reject(RejectReason::NoTerminalPunctuation)
        );
    }

    #[test]
    fn test_long_answer_bypass() {
        let config = QualityConfig {
            long_answer_bypass_length: Some(30),
            ..QualityConfig::default()
        };
        let gate = QualityGate::new(&config).unwrap();
        assert_eq!(
            gate.evaluate("This answer is long enough to be judged complete"),
            QualityVerdict::Accept
        );
        assert_eq!(
            gate.evaluate("Short but no ending"),
            reject(RejectReason::NoTerminalPunctuation)
        );
    }

    #[test]
    fn test_repetition() {
        assert_eq!(
            gate().evaluate("the the the the the the the cat."),
            reject(RejectReason::ExcessivelyRepetitive)
        );
        // 词数不超过下限时不检查
        assert_eq!(gate().evaluate("yes yes yes yes yes."), QualityVerdict::Accept);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = QualityConfig {
            error_patterns: vec!["(unclosed".to_string()],
            ..QualityConfig::default()
        };
        assert!(QualityGate::new(&config).is_err());
    }

    proptest! {
        #[test]
        fn prop_evaluate_is_pure(answer in ".{0,200}") {
            let gate = gate();
            prop_assert_eq!(gate.evaluate(&answer), gate.evaluate(&answer));
        }
    }
}
