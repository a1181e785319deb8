//! 程序配置
//!
//! 所有参数集中在 `Config` 中，构造各组件时显式传入，不使用全局可变状态。

use crate::error::{AppError, AppResult, ConfigError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 默认的错误模式（不区分大小写）
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    r"^error:",
    r"^exception:",
    r"^null$",
    r"^undefined$",
    r"^n/a$",
    r"request failed",
    r"rate limit",
    r"timeout",
    r"\[error",
    // 截断标记
    r"\.\.\.$",
    r"……$",
    r"\[未完成\]",
    r"\[截断\]",
    r"[(（]未完",
];

/// 默认的结尾标点
pub const DEFAULT_TERMINAL_PUNCTUATION: &[char] = &[
    '。', '！', '？', '.', '!', '?', ')', '）', '"', '”', '\'', '’',
];

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 批量调用后端生成答案
    Batch,
    /// 合并多个分片结果
    Merge,
}

/// 分片合并时的优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    /// 排在前面的分片优先
    #[default]
    FirstWins,
    /// 排在后面的分片优先
    LastWins,
}

/// 质量检查配置
#[derive(Clone, Debug)]
pub struct QualityConfig {
    /// 最短长度（按字符计，去除首尾空白后）
    pub min_length: usize,
    /// 合法的结尾标点
    pub terminal_punctuation: Vec<char>,
    /// 错误模式（正则）
    pub error_patterns: Vec<String>,
    /// 单个词出现频率超过 `阈值 × 总词数` 视为重复
    pub repetition_threshold: f64,
    /// 词数不超过该值时不做重复检查
    pub repetition_min_tokens: usize,
    /// 长度达到该值时豁免结尾标点检查（None 表示不豁免）
    pub long_answer_bypass_length: Option<usize>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length: 10,
            terminal_punctuation: DEFAULT_TERMINAL_PUNCTUATION.to_vec(),
            error_patterns: DEFAULT_ERROR_PATTERNS.iter().map(|p| p.to_string()).collect(),
            repetition_threshold: 0.5,
            repetition_min_tokens: 5,
            long_answer_bypass_length: None,
        }
    }
}

/// 重试配置
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// 每个题目最多调用后端的次数
    pub max_attempts: u32,
    /// 退避底数，第 n 次失败后等待 `base^n` 秒
    pub backoff_base: f64,
    /// 单次退避的上限
    pub max_backoff: Duration,
    /// 单次后端调用超时
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// 批处理配置
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// 检查点文件路径
    pub checkpoint_path: PathBuf,
    /// 每完成多少个题目保存一次
    pub save_interval: usize,
    /// 同时处理的题目数量（1 即顺序执行）
    pub max_concurrent_items: usize,
    /// 题目 TOML 文件所在目录
    pub items_folder: String,
    /// 运行日志文件
    pub run_log_file: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("output/answers.json"),
            save_interval: 10,
            max_concurrent_items: 1,
            items_folder: "input_toml".to_string(),
            run_log_file: "run_log.txt".to_string(),
        }
    }
}

/// 分片合并配置
#[derive(Clone, Debug)]
pub struct MergeConfig {
    /// 待合并的分片文件（按优先级排列）
    pub shard_paths: Vec<PathBuf>,
    /// 合并后完整结果的输出路径
    pub output_path: PathBuf,
    /// 不完整结果的输出路径
    pub incomplete_output_path: PathBuf,
    /// 必需的模型列表（模糊匹配）
    pub required_models: Vec<String>,
    /// 重复 key 的优先级
    pub precedence: Precedence,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            shard_paths: Vec::new(),
            output_path: PathBuf::from("output/merged.json"),
            incomplete_output_path: PathBuf::from("output/incomplete.json"),
            required_models: Vec::new(),
            precedence: Precedence::FirstWins,
        }
    }
}

/// LLM 后端配置
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub model_name: String,
    /// 系统消息（可选）
    pub system_message: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            system_message: None,
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: AppMode,
    pub quality: QualityConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub merge: MergeConfig,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: AppMode::Batch,
            quality: QualityConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            merge: MergeConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// 从环境变量加载配置，未设置或无法解析的项使用默认值
    pub fn from_env() -> Self {
        let default = Self::default();

        let mode = match std::env::var("APP_MODE").ok().as_deref() {
            Some("merge") => AppMode::Merge,
            _ => default.mode,
        };

        let precedence = match std::env::var("MERGE_PRECEDENCE").ok().as_deref() {
            Some("last") => Precedence::LastWins,
            _ => default.merge.precedence,
        };

        Self {
            mode,
            quality: QualityConfig {
                min_length: env_parse("QUALITY_MIN_LENGTH", default.quality.min_length),
                terminal_punctuation: std::env::var("QUALITY_TERMINAL_PUNCTUATION")
                    .map(|v| v.chars().collect())
                    .unwrap_or(default.quality.terminal_punctuation),
                error_patterns: default.quality.error_patterns,
                repetition_threshold: env_parse(
                    "QUALITY_REPETITION_THRESHOLD",
                    default.quality.repetition_threshold,
                ),
                repetition_min_tokens: env_parse(
                    "QUALITY_REPETITION_MIN_TOKENS",
                    default.quality.repetition_min_tokens,
                ),
                long_answer_bypass_length: std::env::var("QUALITY_LONG_ANSWER_BYPASS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .or(default.quality.long_answer_bypass_length),
            },
            retry: RetryConfig {
                max_attempts: env_parse("MAX_ATTEMPTS", default.retry.max_attempts),
                backoff_base: env_parse("BACKOFF_BASE", default.retry.backoff_base),
                max_backoff: Duration::from_secs(env_parse(
                    "MAX_BACKOFF_SECS",
                    default.retry.max_backoff.as_secs(),
                )),
                call_timeout: Duration::from_secs(env_parse(
                    "CALL_TIMEOUT_SECS",
                    default.retry.call_timeout.as_secs(),
                )),
            },
            batch: BatchConfig {
                checkpoint_path: std::env::var("CHECKPOINT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(default.batch.checkpoint_path),
                save_interval: env_parse("SAVE_INTERVAL", default.batch.save_interval),
                max_concurrent_items: env_parse(
                    "MAX_CONCURRENT_ITEMS",
                    default.batch.max_concurrent_items,
                ),
                items_folder: std::env::var("ITEMS_FOLDER").unwrap_or(default.batch.items_folder),
                run_log_file: std::env::var("RUN_LOG_FILE").unwrap_or(default.batch.run_log_file),
            },
            merge: MergeConfig {
                shard_paths: std::env::var("MERGE_SHARDS")
                    .map(|v| split_list(&v).into_iter().map(PathBuf::from).collect())
                    .unwrap_or(default.merge.shard_paths),
                output_path: std::env::var("MERGE_OUTPUT")
                    .map(PathBuf::from)
                    .unwrap_or(default.merge.output_path),
                incomplete_output_path: std::env::var("MERGE_INCOMPLETE_OUTPUT")
                    .map(PathBuf::from)
                    .unwrap_or(default.merge.incomplete_output_path),
                required_models: std::env::var("REQUIRED_MODELS")
                    .map(|v| split_list(&v))
                    .unwrap_or(default.merge.required_models),
                precedence,
            },
            llm: LlmConfig {
                api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm.api_key),
                api_base_url: std::env::var("LLM_API_BASE_URL")
                    .unwrap_or(default.llm.api_base_url),
                model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm.model_name),
                system_message: std::env::var("LLM_SYSTEM_MESSAGE")
                    .ok()
                    .or(default.llm.system_message),
            },
        }
    }

    /// 检查配置取值是否合法
    pub fn validate(&self) -> AppResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::invalid_config("max_attempts", "至少需要 1 次尝试"));
        }
        if !(self.retry.backoff_base >= 0.0 && self.retry.backoff_base.is_finite()) {
            return Err(AppError::invalid_config(
                "backoff_base",
                format!("{} 不是合法的退避底数", self.retry.backoff_base),
            ));
        }
        if self.batch.save_interval == 0 {
            return Err(AppError::invalid_config("save_interval", "保存间隔必须大于 0"));
        }
        if self.batch.max_concurrent_items == 0 {
            return Err(AppError::invalid_config(
                "max_concurrent_items",
                "并发数必须大于 0",
            ));
        }
        let threshold = self.quality.repetition_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AppError::invalid_config(
                "repetition_threshold",
                format!("{} 不在 (0, 1] 范围内", threshold),
            ));
        }
        for pattern in &self.quality.error_patterns {
            regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// 读取并解析环境变量，失败时回退到默认值
fn env_parse<T: std::str::FromStr>(var_name: &str, default: T) -> T {
    match std::env::var(var_name) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    "{}",
                    ConfigError::EnvVarParseFailed {
                        var_name: var_name.to_string(),
                        value,
                        expected_type: std::any::type_name::<T>().to_string(),
                    }
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// 逗号分隔的列表
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
