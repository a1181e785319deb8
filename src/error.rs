use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 检查点读写错误（致命）
    #[error("检查点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 分片合并错误（致命）
    #[error("分片错误: {0}")]
    Shard(#[from] ShardError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 题目文件加载错误
    #[error("加载错误: {0}")]
    Load(#[from] LoadError),
}

/// 检查点存储错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 读取检查点文件失败
    #[error("读取检查点失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 检查点文件损坏
    #[error("检查点文件无法解析 ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 序列化失败
    #[error("检查点序列化失败 ({path}): {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 写入临时文件失败
    #[error("写入检查点失败 ({path}): {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 原子替换失败
    #[error("替换检查点失败 ({from} -> {to}): {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
    /// 创建目录失败
    #[error("创建目录失败 ({path}): {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 分片合并错误
#[derive(Debug, Error)]
pub enum ShardError {
    /// 分片文件不存在
    #[error("分片文件不存在: {path}")]
    NotFound { path: String },
    /// 读取分片失败
    #[error("读取分片失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 分片格式错误
    #[error("分片无法解析 ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// 没有提供任何分片
    #[error("没有需要合并的分片")]
    NoShards,
}

/// 后端调用错误
///
/// 属于瞬时错误，由重试控制器记录到 Attempt 中
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// 请求失败（网络、协议等）
    #[error("请求失败 (模型: {model}): {message}")]
    Request { model: String, message: String },
    /// 调用超时
    #[error("调用超时 ({seconds}秒)")]
    Timeout { seconds: u64 },
    /// 返回结果为空
    #[error("返回结果为空 (模型: {model})")]
    EmptyResponse { model: String },
    /// 请求频率限制
    #[error("请求频率限制 (模型: {model})")]
    RateLimited { model: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 取值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    InvalidValue { field: String, reason: String },
    /// 正则表达式无法编译
    #[error("错误模式 '{pattern}' 无法编译: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// 题目文件加载错误
#[derive(Debug, Error)]
pub enum LoadError {
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建检查点读取错误
    pub fn checkpoint_read(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Checkpoint(CheckpointError::Read {
            path: path.into(),
            source,
        })
    }

    /// 创建检查点写入错误
    pub fn checkpoint_write(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Checkpoint(CheckpointError::Write {
            path: path.into(),
            source,
        })
    }

    /// 创建配置取值错误
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// 是否属于会破坏可恢复性的持久化错误
    pub fn is_durability_error(&self) -> bool {
        matches!(self, AppError::Checkpoint(_) | AppError::Shard(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(AppError::checkpoint_write("a.json", io).is_durability_error());
        assert!(AppError::Shard(ShardError::NoShards).is_durability_error());

        let config = AppError::invalid_config("save_interval", "必须大于 0");
        assert!(!config.is_durability_error());
    }

    #[test]
    fn test_display_keeps_path() {
        let err = AppError::Shard(ShardError::NotFound {
            path: "shard-1.json".to_string(),
        });
        assert!(err.to_string().contains("shard-1.json"));
    }
}
