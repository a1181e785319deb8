use crate::error::{AppResult, LoadError};
use crate::models::work_item::WorkItem;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// TOML 文件中的单个题目
#[derive(Debug, Clone, Deserialize)]
struct ItemEntry {
    question: String,
    #[serde(default)]
    prompt: Option<String>,
}

/// TOML 文件结构
///
/// ```toml
/// [[items]]
/// question = "What is X?"
/// prompt = "Answer the question in full sentences: What is X?"
/// ```
#[derive(Debug, Clone, Deserialize)]
struct ItemFile {
    #[serde(default)]
    items: Vec<ItemEntry>,
}

/// 从单个 TOML 文件加载题目
pub async fn load_toml_items(toml_file_path: &Path) -> AppResult<Vec<WorkItem>> {
    let path = toml_file_path.display().to_string();
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|source| LoadError::ReadFailed {
            path: path.clone(),
            source,
        })?;

    let file: ItemFile =
        toml::from_str(&content).map_err(|source| LoadError::TomlParseFailed { path, source })?;

    Ok(file
        .items
        .into_iter()
        .map(|entry| match entry.prompt {
            Some(prompt) if !prompt.trim().is_empty() => {
                WorkItem::with_prompt(entry.question, prompt)
            }
            _ => WorkItem::new(entry.question),
        })
        .collect())
}

/// 从文件夹中加载所有 TOML 文件中的题目
///
/// 文件按名称排序后依次读取；单个文件解析失败只记录警告并跳过。
pub async fn load_all_toml_files(folder_path: &str) -> AppResult<Vec<WorkItem>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        return Err(LoadError::DirectoryNotFound {
            path: folder_path.to_string(),
        }
        .into());
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .map_err(|source| LoadError::ReadFailed {
            path: folder_path.to_string(),
            source,
        })?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| LoadError::ReadFailed {
            path: folder_path.to_string(),
            source,
        })?
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(path);
        }
    }
    toml_files.sort();

    let mut items = Vec::new();
    for path in toml_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_toml_items(&path).await {
            Ok(loaded) => {
                tracing::info!("成功加载 {} 个题目", loaded.len());
                items.extend(loaded);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_items_with_and_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.toml");
        std::fs::write(
            &path,
            r#"
[[items]]
question = "What is X?"

[[items]]
question = "What is Y?"
prompt = "Explain Y."
"#,
        )
        .unwrap();

        let items = load_toml_items(&path).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].request_text(), "What is X?");
        assert_eq!(items[1].request_text(), "Explain Y.");
    }

    #[tokio::test]
    async fn test_folder_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.toml"), "[[items]]\nquestion = \"Q1\"\n").unwrap();
        std::fs::write(dir.path().join("2.toml"), "not = [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let items = load_all_toml_files(dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].raw_text, "Q1");
    }

    #[tokio::test]
    async fn test_missing_folder_is_error() {
        let result = load_all_toml_files("/definitely/not/here").await;
        assert!(result.is_err());
    }
}
