//! 分片合并器 - 编排层
//!
//! 把多个独立运行产生的结果文件合并成一份，并按模型覆盖情况分成
//! 完整 / 不完整两部分。下游默认只应该看到完整部分。
//!
//! 任何一个分片无法读取或解析都会终止整个合并，不会写出部分结果。

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{MergeConfig, Precedence};
use crate::error::{AppResult, ShardError};
use crate::models::{CheckpointRecord, ItemKey, RejectReason};
use crate::services::checkpoint_store::parse_records;
use crate::services::{write_json_atomic, CheckpointStore, FuzzyMatcher, NameMatcher};

/// 同一 key 出现在多个分片时的合并函数：`existing` 为优先级更高的一方
pub type MergeFn = Arc<dyn Fn(&mut CheckpointRecord, &CheckpointRecord) + Send + Sync>;

/// 一个已加载的分片
#[derive(Debug, Clone)]
pub struct ShardSource {
    pub path: PathBuf,
    pub records: Vec<CheckpointRecord>,
}

impl ShardSource {
    pub fn new(path: impl Into<PathBuf>, records: Vec<CheckpointRecord>) -> Self {
        Self {
            path: path.into(),
            records,
        }
    }

    /// 读取分片文件（格式与检查点文件相同）
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let content = tokio::fs::read_to_string(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ShardError::NotFound {
                    path: path_str.clone(),
                }
            } else {
                ShardError::Read {
                    path: path_str.clone(),
                    source,
                }
            }
        })?;

        let records = parse_records(&content).map_err(|source| ShardError::Parse {
            path: path_str.clone(),
            source,
        })?;

        info!("✓ 已加载分片: {} ({} 条记录)", path_str, records.len());
        Ok(Self::new(path, records))
    }
}

/// 必需的模型集合（保持配置中的顺序，去重）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeKeySet {
    required: Vec<String>,
}

impl MergeKeySet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut required: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !required.iter().any(|r| r == name) {
                required.push(name.to_string());
            }
        }
        Self { required }
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.required
    }

    /// 返回记录中缺少的必需模型
    ///
    /// 每个记录到的模型名最多覆盖一个必需名：优先规范化后完全相同的，
    /// 其次按配置顺序选第一个尚未覆盖的，都没有时选第一个匹配的。
    /// 降级记录不覆盖任何模型。
    pub fn missing(&self, record: &CheckpointRecord, matcher: &dyn NameMatcher) -> Vec<String> {
        if record.is_degraded() {
            return self.required.clone();
        }
        let mut covered: BTreeSet<usize> = BTreeSet::new();

        for recorded in record.answers.keys() {
            let candidates: Vec<usize> = self
                .required
                .iter()
                .enumerate()
                .filter(|(_, required)| matcher.matches(recorded, required))
                .map(|(idx, _)| idx)
                .collect();

            let Some(&first) = candidates.first() else {
                continue;
            };

            let chosen = candidates
                .iter()
                .copied()
                .find(|&idx| matcher.is_exact(recorded, &self.required[idx]))
                .or_else(|| candidates.iter().copied().find(|idx| !covered.contains(idx)))
                .unwrap_or(first);

            if candidates.len() > 1 {
                let names: Vec<&str> = candidates
                    .iter()
                    .map(|&idx| self.required[idx].as_str())
                    .collect();
                warn!(
                    "[题目 #{}] ⚠️ 模型名 '{}' 同时匹配 {:?}，按 '{}' 处理",
                    record.key.short(),
                    recorded,
                    names,
                    self.required[chosen]
                );
            }
            covered.insert(chosen);
        }

        self.required
            .iter()
            .enumerate()
            .filter(|(idx, _)| !covered.contains(idx))
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// 内置的合并函数：按模型取答案的并集
///
/// 已有的模型答案优先；降级记录的答案从不参与合并。
/// 已有记录是降级记录而新记录已通过时，整条替换为新记录。
pub fn union_answers(existing: &mut CheckpointRecord, incoming: &CheckpointRecord) {
    if !incoming.accepted {
        return;
    }
    if existing.is_degraded() {
        *existing = incoming.clone();
        return;
    }

    for (model, answer) in &incoming.answers {
        existing
            .answers
            .entry(model.clone())
            .or_insert_with(|| answer.clone());
    }
}

/// 按优先级合并所有分片的记录
///
/// 未出现过的 key 直接插入；出现过的 key 有合并函数时合并，否则保留先出现的。
pub fn merge_records(
    shards: &[ShardSource],
    precedence: Precedence,
    subfield_merge: Option<&MergeFn>,
) -> BTreeMap<ItemKey, CheckpointRecord> {
    let ordered: Vec<&ShardSource> = match precedence {
        Precedence::FirstWins => shards.iter().collect(),
        Precedence::LastWins => shards.iter().rev().collect(),
    };

    let mut merged: BTreeMap<ItemKey, CheckpointRecord> = BTreeMap::new();
    for shard in ordered {
        for record in &shard.records {
            match merged.get_mut(&record.key) {
                None => {
                    merged.insert(record.key.clone(), record.clone());
                }
                Some(existing) => {
                    if let Some(merge_fn) = subfield_merge {
                        merge_fn(existing, record);
                    }
                }
            }
        }
    }
    merged
}

/// 缺少模型答案的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteRecord {
    pub record: CheckpointRecord,
    pub missing: Vec<String>,
}

/// 交给报告组件的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub accepted: usize,
    pub degraded: usize,
    /// 各拒绝原因出现的次数
    pub rejections: BTreeMap<RejectReason, usize>,
    /// 出现过的模型名
    pub models_seen: BTreeSet<String>,
}

impl SummaryCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CheckpointRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.total += 1;
            if record.accepted {
                counts.accepted += 1;
            } else {
                counts.degraded += 1;
            }
            for reason in record.rejection_reasons() {
                *counts.rejections.entry(reason).or_insert(0) += 1;
            }
            counts.models_seen.extend(record.answers.keys().cloned());
        }
        counts
    }
}

/// 合并结果
#[derive(Debug, Clone, Default)]
pub struct MergedResult {
    /// 覆盖了所有必需模型的记录（按 key 排序）
    pub complete: Vec<CheckpointRecord>,
    /// 缺少模型答案的记录，需单独输出
    pub incomplete: Vec<IncompleteRecord>,
    pub summary: SummaryCounts,
}

// ========== 不完整记录报告 ==========

#[derive(Debug, Serialize)]
struct IncompleteReport<'a> {
    metadata: ReportMetadata<'a>,
    records: Vec<&'a CheckpointRecord>,
    missing_info: Vec<MissingInfo<'a>>,
}

#[derive(Debug, Serialize)]
struct ReportMetadata<'a> {
    generated_at: DateTime<Utc>,
    total_incomplete: usize,
    required_models: &'a [String],
    source_files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MissingInfo<'a> {
    key: &'a ItemKey,
    source_text: &'a str,
    issue: &'static str,
    missing_models: &'a [String],
    existing_models: Vec<&'a str>,
}

/// 分片合并器
pub struct ShardReconciler {
    precedence: Precedence,
    required: MergeKeySet,
    matcher: Box<dyn NameMatcher>,
    subfield_merge: Option<MergeFn>,
}

impl ShardReconciler {
    /// 使用模糊匹配、不合并子字段
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            precedence: config.precedence,
            required: MergeKeySet::new(&config.required_models),
            matcher: Box::new(FuzzyMatcher),
            subfield_merge: None,
        }
    }

    pub fn with_matcher(mut self, matcher: impl NameMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn with_subfield_merge(mut self, merge_fn: MergeFn) -> Self {
        self.subfield_merge = Some(merge_fn);
        self
    }

    pub fn required(&self) -> &MergeKeySet {
        &self.required
    }

    /// 合并并做完整性检查
    pub fn merge(&self, shards: &[ShardSource]) -> MergedResult {
        let merged = merge_records(shards, self.precedence, self.subfield_merge.as_ref());
        let summary_base = SummaryCounts::from_records(merged.values());

        let mut complete = Vec::new();
        let mut incomplete = Vec::new();
        for record in merged.into_values() {
            let missing = self.required.missing(&record, self.matcher.as_ref());
            if missing.is_empty() {
                complete.push(record);
            } else {
                incomplete.push(IncompleteRecord { record, missing });
            }
        }

        let summary = SummaryCounts {
            complete: complete.len(),
            incomplete: incomplete.len(),
            ..summary_base
        };

        MergedResult {
            complete,
            incomplete,
            summary,
        }
    }

    /// 读取分片文件、合并，并写出完整结果和不完整记录报告
    ///
    /// 任一分片加载失败时直接返回错误，不写任何文件。
    pub async fn reconcile_files(
        &self,
        shard_paths: &[PathBuf],
        output_path: &Path,
        incomplete_output_path: &Path,
    ) -> AppResult<MergedResult> {
        if shard_paths.is_empty() {
            return Err(ShardError::NoShards.into());
        }

        info!("📂 正在加载 {} 个分片...", shard_paths.len());
        let shards = try_join_all(shard_paths.iter().map(ShardSource::load)).await?;

        let result = self.merge(&shards);

        let mut store = CheckpointStore::new(output_path);
        for record in &result.complete {
            store.upsert(record.clone());
        }
        store.save().await?;
        info!(
            "💾 完整结果已保存: {} ({} 条)",
            output_path.display(),
            result.complete.len()
        );

        self.write_incomplete_report(&result, shard_paths, incomplete_output_path)
            .await?;

        Ok(result)
    }

    async fn write_incomplete_report(
        &self,
        result: &MergedResult,
        shard_paths: &[PathBuf],
        path: &Path,
    ) -> AppResult<()> {
        let missing_info = result
            .incomplete
            .iter()
            .map(|incomplete| MissingInfo {
                key: &incomplete.record.key,
                source_text: &incomplete.record.source_text,
                issue: if incomplete.record.answers.is_empty() {
                    "缺少answers字段"
                } else {
                    "缺少部分模型答案"
                },
                missing_models: &incomplete.missing,
                existing_models: incomplete.record.answers.keys().map(String::as_str).collect(),
            })
            .collect();

        let report = IncompleteReport {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                total_incomplete: result.incomplete.len(),
                required_models: self.required.names(),
                source_files: shard_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            },
            records: result.incomplete.iter().map(|i| &i.record).collect(),
            missing_info,
        };

        write_json_atomic(path, &report).await?;

        if result.incomplete.is_empty() {
            info!("✓ 所有记录都包含必需的模型答案");
        } else {
            warn!(
                "⚠️ {} 条记录缺少模型答案，已单独保存: {}",
                result.incomplete.len(),
                path.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identify;
    use crate::services::ExactMatcher;

    fn record(text: &str, accepted: bool, answers: &[(&str, &str)]) -> CheckpointRecord {
        CheckpointRecord {
            key: identify(text),
            source_text: text.to_string(),
            final_answer: answers.first().map(|(_, a)| a.to_string()).unwrap_or_default(),
            accepted,
            attempts: Vec::new(),
            timestamp: Utc::now(),
            failure: None,
            answers: answers
                .iter()
                .map(|(m, a)| (m.to_string(), a.to_string()))
                .collect(),
        }
    }

    fn reconciler(required: &[&str], precedence: Precedence) -> ShardReconciler {
        ShardReconciler::new(&MergeConfig {
            required_models: required.iter().map(|s| s.to_string()).collect(),
            precedence,
            ..MergeConfig::default()
        })
    }

    #[test]
    fn test_union_of_two_shards() {
        let a = ShardSource::new("a.json", vec![record("K", true, &[("modelX", "foo")])]);
        let b = ShardSource::new("b.json", vec![record("K", true, &[("modelY", "bar")])]);

        let result = reconciler(&[], Precedence::FirstWins)
            .with_subfield_merge(Arc::new(union_answers))
            .merge(&[a, b]);

        assert_eq!(result.complete.len(), 1);
        let merged = &result.complete[0];
        assert_eq!(merged.answers.get("modelX").map(String::as_str), Some("foo"));
        assert_eq!(merged.answers.get("modelY").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_precedence_without_merge_fn() {
        let a = ShardSource::new("a.json", vec![record("K", true, &[("m", "from-a")])]);
        let b = ShardSource::new("b.json", vec![record("K", true, &[("m", "from-b")])]);
        let shards = [a, b];

        let first = merge_records(&shards, Precedence::FirstWins, None);
        let last = merge_records(&shards, Precedence::LastWins, None);

        assert_eq!(first[&identify("K")].answers["m"], "from-a");
        assert_eq!(last[&identify("K")].answers["m"], "from-b");
    }

    #[test]
    fn test_union_promotes_degraded_record() {
        let mut degraded = record("K", false, &[]);
        degraded.final_answer = "short".to_string();
        let accepted = record("K", true, &[("grok-3", "A complete answer.")]);

        union_answers(&mut degraded, &accepted);

        assert!(degraded.accepted);
        assert_eq!(degraded.final_answer, "A complete answer.");
        assert!(degraded.answers.contains_key("grok-3"));
    }

    #[test]
    fn test_degraded_answers_never_win_or_count() {
        let a = ShardSource::new("a.json", vec![record("K", false, &[("m", "truncated answ")])]);
        let b = ShardSource::new(
            "b.json",
            vec![record("K", true, &[("m", "A complete accepted answer.")])],
        );

        let result = reconciler(&["m"], Precedence::FirstWins)
            .with_subfield_merge(Arc::new(union_answers))
            .merge(&[a, b]);

        assert_eq!(result.complete.len(), 1);
        assert_eq!(result.complete[0].answers["m"], "A complete accepted answer.");

        // 降级记录自己的答案不算覆盖
        let only_degraded =
            ShardSource::new("c.json", vec![record("K", false, &[("m", "truncated answ")])]);
        let result = reconciler(&["m"], Precedence::FirstWins).merge(&[only_degraded]);
        assert_eq!(result.incomplete.len(), 1);
        assert_eq!(result.incomplete[0].missing, vec!["m"]);
    }

    #[test]
    fn test_union_ignores_degraded_incoming() {
        let mut accepted = record("K", true, &[("a", "x.")]);
        let degraded = record("K", false, &[("b", "partial")]);

        union_answers(&mut accepted, &degraded);

        assert!(accepted.accepted);
        assert!(!accepted.answers.contains_key("b"));
    }

    #[test]
    fn test_partition_complete_and_incomplete() {
        let shard = ShardSource::new(
            "a.json",
            vec![
                record(
                    "Q1",
                    true,
                    &[("Doubao-Pro-32k", "a."), ("gemini-2.5-flash", "b."), ("grok3", "c.")],
                ),
                record("Q2", true, &[("doubao-pro", "a.")]),
                record("Q3", false, &[]),
            ],
        );

        let result = reconciler(&["doubao-pro", "gemini-2.5-flash", "grok-3"], Precedence::FirstWins)
            .merge(&[shard]);

        assert_eq!(result.complete.len(), 1);
        assert_eq!(result.complete[0].key, identify("Q1"));
        assert_eq!(result.incomplete.len(), 2);
        assert_eq!(result.summary.complete, 1);
        assert_eq!(result.summary.incomplete, 2);
        assert_eq!(result.summary.degraded, 1);

        let q2 = result
            .incomplete
            .iter()
            .find(|i| i.record.key == identify("Q2"))
            .unwrap();
        assert_eq!(q2.missing, vec!["gemini-2.5-flash", "grok-3"]);
    }

    #[test]
    fn test_exact_matcher_is_swappable() {
        let shard = ShardSource::new("a.json", vec![record("Q", true, &[("grok3", "c.")])]);
        let result = reconciler(&["grok-3"], Precedence::FirstWins)
            .with_matcher(ExactMatcher)
            .merge(&[shard]);
        assert_eq!(result.incomplete.len(), 1);
    }

    #[test]
    fn test_ambiguous_match_prefers_exact_then_uncovered() {
        let keys = MergeKeySet::new(["gpt-4", "gpt-4o"]);
        let matcher = FuzzyMatcher;

        // "gpt-4o" 同时匹配两个必需名，完全相同的优先
        let only_4o = record("Q", true, &[("gpt-4o", "a.")]);
        assert_eq!(keys.missing(&only_4o, &matcher), vec!["gpt-4"]);

        // 没有完全相同的时按顺序选第一个尚未覆盖的
        let keys = MergeKeySet::new(["gpt", "gpt-4"]);
        let both = record("Q", true, &[("gpt-4-turbo", "a."), ("gpt4", "b.")]);
        assert!(keys.missing(&both, &matcher).is_empty());
    }

    #[test]
    fn test_key_set_dedupes_and_trims() {
        let keys = MergeKeySet::new([" grok-3 ", "grok-3", ""]);
        assert_eq!(keys.names(), ["grok-3".to_string()]);
    }

    #[test]
    fn test_summary_counts_models() {
        let records = [
            record("Q1", true, &[("a", "x."), ("b", "y.")]),
            record("Q2", false, &[("b", "z.")]),
        ];
        let counts = SummaryCounts::from_records(records.iter());
        assert_eq!(counts.total, 2);
        assert_eq!(counts.accepted, 1);
        assert_eq!(counts.degraded, 1);
        assert_eq!(counts.models_seen.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_shard_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShardSource::load(dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Shard(ShardError::NotFound { .. })
        ));
    }
}
