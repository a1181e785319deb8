//! 检查点存储 - 业务能力层
//!
//! 只负责"记住哪些题目已经做完"：启动时加载、内存中更新、原子写回磁盘。
//!
//! 写入流程：先完整写入 `<文件>.tmp` 并 fsync，再 rename 覆盖目标文件，
//! 中途崩溃时目标文件保持上一次成功保存的内容。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, CheckpointError};
use crate::models::{CheckpointRecord, ItemKey};

/// 当前写出的文件格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

/// 磁盘上的检查点文件
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<CheckpointRecord>,
}

/// 兼容两种格式：带版本信息的对象，或直接的记录数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PersistedCheckpoint {
    Envelope(CheckpointFile),
    Bare(Vec<CheckpointRecord>),
}

/// 解析检查点文件内容
pub fn parse_records(content: &str) -> Result<Vec<CheckpointRecord>, serde_json::Error> {
    Ok(match serde_json::from_str::<PersistedCheckpoint>(content)? {
        PersistedCheckpoint::Envelope(file) => {
            if file.version > CHECKPOINT_VERSION {
                warn!(
                    "检查点版本 {} 高于当前支持的版本 {}，尝试按当前格式读取",
                    file.version, CHECKPOINT_VERSION
                );
            }
            file.records
        }
        PersistedCheckpoint::Bare(records) => records,
    })
}

/// 检查点存储
///
/// 记录按 key 排序保存，同一路径 `save()` 后再 `load()` 得到相同的索引。
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    index: BTreeMap<ItemKey, CheckpointRecord>,
}

impl CheckpointStore {
    /// 创建空存储（不读取磁盘）
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: BTreeMap::new(),
        }
    }

    /// 从磁盘加载
    ///
    /// 文件不存在时返回空存储；文件损坏时返回错误，不会静默丢弃数据。
    pub async fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let mut store = Self::new(path.clone());

        let tmp_path = store.temp_path();
        if fs::try_exists(&tmp_path).await.unwrap_or(false) {
            warn!(
                "⚠️ 发现上次未完成保存留下的临时文件，已忽略: {}",
                tmp_path.display()
            );
        }

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("检查点文件不存在，从空白开始: {}", path.display());
                return Ok(store);
            }
            Err(source) => {
                return Err(AppError::checkpoint_read(path.display().to_string(), source));
            }
        };

        let records = parse_records(&content).map_err(|source| CheckpointError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let total = records.len();
        for record in records {
            if let Some(previous) = store.upsert(record) {
                warn!("检查点中存在重复记录，保留后一条: {}", previous.key.short());
            }
        }

        info!(
            "✓ 已加载检查点 {} ({} 条记录，去重后 {} 条)",
            path.display(),
            total,
            store.len()
        );
        Ok(store)
    }

    /// 插入或整体替换同 key 的记录，返回被替换的旧记录
    pub fn upsert(&mut self, record: CheckpointRecord) -> Option<CheckpointRecord> {
        self.index.insert(record.key.clone(), record)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&CheckpointRecord> {
        self.index.get(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 按 key 顺序遍历记录
    pub fn records(&self) -> impl Iterator<Item = &CheckpointRecord> {
        self.index.values()
    }

    pub fn index(&self) -> &BTreeMap<ItemKey, CheckpointRecord> {
        &self.index
    }

    pub fn into_records(self) -> Vec<CheckpointRecord> {
        self.index.into_values().collect()
    }

    /// 原子保存全部记录
    pub async fn save(&self) -> AppResult<()> {
        let tmp_path = self.stage().await?;
        self.commit(&tmp_path).await?;
        debug!("💾 检查点已保存: {} ({} 条)", self.path.display(), self.len());
        Ok(())
    }

    /// 第一步：写入临时文件并落盘
    pub(crate) async fn stage(&self) -> AppResult<PathBuf> {
        let file = CheckpointFile {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            records: self.index.values().cloned().collect(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|source| CheckpointError::Serialize {
                path: self.path.display().to_string(),
                source,
            })?;

        let tmp_path = self.temp_path();
        write_synced(&tmp_path, &bytes).await?;
        Ok(tmp_path)
    }

    /// 第二步：用临时文件替换目标文件
    pub(crate) async fn commit(&self, tmp_path: &Path) -> AppResult<()> {
        fs::rename(tmp_path, &self.path)
            .await
            .map_err(|source| CheckpointError::Rename {
                from: tmp_path.display().to_string(),
                to: self.path.display().to_string(),
                source,
            })?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.path)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// 写入文件并 fsync，必要时创建父目录
async fn write_synced(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| CheckpointError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
    }

    let write_err = |source| AppError::checkpoint_write(path.display().to_string(), source);

    let mut file = fs::File::create(path).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(())
}

/// 以"临时文件 + rename"的方式原子写入任意 JSON 数据
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CheckpointError::Serialize {
        path: path.display().to_string(),
        source,
    })?;

    let tmp_path = temp_path_for(path);
    write_synced(&tmp_path, &bytes).await?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|source| CheckpointError::Rename {
            from: tmp_path.display().to_string(),
            to: path.display().to_string(),
            source,
        })?;
    Ok(())
}
