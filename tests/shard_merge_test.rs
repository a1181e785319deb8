use chrono::{DateTime, Utc};
use proptest::prelude::*;
use qa_batch::config::{MergeConfig, Precedence};
use qa_batch::models::{identify, CheckpointRecord};
use qa_batch::orchestrator::{merge_records, union_answers, MergeFn, ShardReconciler, ShardSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fixed_time() -> DateTime<Utc> {
    "2025-01-01T00:00:00Z".parse().unwrap()
}

fn record(text: &str, accepted: bool, answers: &[(&str, &str)]) -> CheckpointRecord {
    CheckpointRecord {
        key: identify(text),
        source_text: text.to_string(),
        final_answer: answers
            .first()
            .map(|(_, a)| a.to_string())
            .unwrap_or_else(|| "short".to_string()),
        accepted,
        attempts: Vec::new(),
        timestamp: fixed_time(),
        failure: None,
        answers: answers
            .iter()
            .map(|(m, a)| (m.to_string(), a.to_string()))
            .collect(),
    }
}

fn write_shard(dir: &Path, name: &str, records: &[CheckpointRecord]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(records).unwrap()).unwrap();
    path
}

fn reconciler(required: &[&str], precedence: Precedence) -> ShardReconciler {
    ShardReconciler::new(&MergeConfig {
        required_models: required.iter().map(|s| s.to_string()).collect(),
        precedence,
        ..MergeConfig::default()
    })
    .with_subfield_merge(Arc::new(union_answers))
}

#[tokio::test]
async fn test_two_shards_union_model_answers() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_shard(dir.path(), "a.json", &[record("K", true, &[("modelX", "foo")])]);
    let b = write_shard(dir.path(), "b.json", &[record("K", true, &[("modelY", "bar")])]);
    let output = dir.path().join("merged.json");
    let incomplete = dir.path().join("incomplete.json");

    let result = reconciler(&["modelX", "modelY"], Precedence::FirstWins)
        .reconcile_files(&[a, b], &output, &incomplete)
        .await
        .unwrap();

    assert_eq!(result.complete.len(), 1);
    assert!(result.incomplete.is_empty());
    let merged = &result.complete[0];
    assert_eq!(merged.answers["modelX"], "foo");
    assert_eq!(merged.answers["modelY"], "bar");

    let store = qa_batch::CheckpointStore::load(&output).await.unwrap();
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_incomplete_records_go_to_labeled_report() {
    let dir = tempfile::tempdir().unwrap();
    let shard = write_shard(
        dir.path(),
        "a.json",
        &[
            record(
                "Q1",
                true,
                &[("doubao-pro-32k", "a."), ("Gemini-2.5-Flash", "b."), ("grok3", "c.")],
            ),
            record("Q2", true, &[("doubao-pro", "a.")]),
            record("Q3", false, &[]),
        ],
    );
    let output = dir.path().join("merged.json");
    let incomplete = dir.path().join("incomplete.json");

    let result = reconciler(&["doubao-pro", "gemini-2.5-flash", "grok-3"], Precedence::FirstWins)
        .reconcile_files(&[shard.clone()], &output, &incomplete)
        .await
        .unwrap();

    assert_eq!(result.complete.len(), 1);
    assert_eq!(result.incomplete.len(), 2);

    // 下游只看到完整记录
    let store = qa_batch::CheckpointStore::load(&output).await.unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.contains(&identify("Q1")));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&incomplete).unwrap()).unwrap();
    assert_eq!(report["metadata"]["total_incomplete"], 2);
    assert_eq!(
        report["metadata"]["source_files"][0],
        shard.display().to_string()
    );
    assert_eq!(report["records"].as_array().unwrap().len(), 2);

    let infos = report["missing_info"].as_array().unwrap();
    let q3 = infos
        .iter()
        .find(|info| info["source_text"] == "Q3")
        .unwrap();
    assert_eq!(q3["issue"], "缺少answers字段");
    assert_eq!(q3["missing_models"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_corrupt_shard_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_shard(dir.path(), "good.json", &[record("K", true, &[("m", "x.")])]);
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ not json").unwrap();
    let output = dir.path().join("merged.json");
    let incomplete = dir.path().join("incomplete.json");

    let err = reconciler(&[], Precedence::FirstWins)
        .reconcile_files(&[good, bad], &output, &incomplete)
        .await
        .unwrap_err();

    assert!(err.is_durability_error());
    assert!(!output.exists());
    assert!(!incomplete.exists());
}

#[tokio::test]
async fn test_missing_shard_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_shard(dir.path(), "good.json", &[record("K", true, &[("m", "x.")])]);
    let output = dir.path().join("merged.json");

    let result = reconciler(&[], Precedence::FirstWins)
        .reconcile_files(
            &[good, dir.path().join("absent.json")],
            &output,
            &dir.path().join("incomplete.json"),
        )
        .await;

    assert!(result.is_err());
    assert!(!output.exists());
}

#[tokio::test]
async fn test_no_shards_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = reconciler(&[], Precedence::FirstWins)
        .reconcile_files(
            &[],
            &dir.path().join("merged.json"),
            &dir.path().join("incomplete.json"),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_merging_output_again_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let shards = vec![
        write_shard(
            dir.path(),
            "a.json",
            &[
                record("Q1", true, &[("modelX", "a1.")]),
                record("Q2", false, &[]),
            ],
        ),
        write_shard(
            dir.path(),
            "b.json",
            &[
                record("Q1", true, &[("modelY", "b1.")]),
                record("Q2", true, &[("modelX", "b2.")]),
                record("Q3", true, &[("modelX", "b3.")]),
            ],
        ),
    ];

    for precedence in [Precedence::FirstWins, Precedence::LastWins] {
        let reconciler = reconciler(&["modelX"], precedence);
        let output = dir.path().join("merged.json");
        let incomplete = dir.path().join("incomplete.json");

        let once = reconciler
            .reconcile_files(&shards, &output, &incomplete)
            .await
            .unwrap();

        let mut with_output = shards.clone();
        with_output.push(dir.path().join("merged-copy.json"));
        std::fs::copy(&output, dir.path().join("merged-copy.json")).unwrap();

        let twice = reconciler
            .reconcile_files(&with_output, &dir.path().join("merged-2.json"), &incomplete)
            .await
            .unwrap();

        assert_eq!(once.complete, twice.complete);
        assert_eq!(once.incomplete, twice.incomplete);
        assert_eq!(once.summary, twice.summary);
    }
}

fn arb_shards() -> impl Strategy<Value = Vec<Vec<(u8, u8, bool)>>> {
    prop::collection::vec(prop::collection::vec((0u8..4, 0u8..3, any::<bool>()), 0..6), 1..4)
}

fn build_shards(layout: &[Vec<(u8, u8, bool)>]) -> Vec<ShardSource> {
    layout.iter()
        .enumerate()
        .map(|(idx, entries)| {
            let records = entries
                .iter()
                .map(|&(key, model, accepted)| {
                    let model = format!("model-{}", model);
                    let answer = format!("shard {} answer.", idx);
                    if accepted {
                        record(&format!("Q{}", key), true, &[(model.as_str(), answer.as_str())])
                    } else {
                        record(&format!("Q{}", key), false, &[(model.as_str(), "partial")])
                    }
                })
                .collect();
            ShardSource::new(format!("shard-{}.json", idx), records)
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_merge_is_idempotent(layout in arb_shards(), last_wins in any::<bool>()) {
        let precedence = if last_wins { Precedence::LastWins } else { Precedence::FirstWins };
        let merge_fn: MergeFn = Arc::new(union_answers);
        let shards = build_shards(&layout);

        let once = merge_records(&shards, precedence, Some(&merge_fn));

        let mut again = shards.clone();
        again.push(ShardSource::new("merged.json", once.values().cloned().collect()));
        let twice = merge_records(&again, precedence, Some(&merge_fn));

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_union_never_loses_models(layout in arb_shards()) {
        let merge_fn: MergeFn = Arc::new(union_answers);
        let shards = build_shards(&layout);
        let merged = merge_records(&shards, Precedence::FirstWins, Some(&merge_fn));

        let mut expected: BTreeMap<_, Vec<String>> = BTreeMap::new();
        for shard in &shards {
            for record in shard.records.iter().filter(|r| r.accepted) {
                expected
                    .entry(record.key.clone())
                    .or_default()
                    .extend(record.answers.keys().cloned());
            }
        }
        for (key, models) in expected {
            let record = &merged[&key];
            prop_assert!(record.accepted);
            for model in models {
                prop_assert!(record.answers.contains_key(&model));
            }
            // 降级记录的答案不会混进已通过的记录
            prop_assert!(record.answers.values().all(|answer| answer != "partial"));
        }
    }
}
