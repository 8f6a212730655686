//! File-based retriever collaborator.
//!
//! A deliberately small implementation of the engine's `Retriever`
//! capability: paragraphs of the configured text files ranked by query
//! term overlap. Good enough to exercise retrieval-augmented workflows
//! locally; swap in an embedding-backed implementation for real corpora.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use waypoint_engine::{RetrievedChunk, Retriever};
use waypoint_types::RagConfig;

const DEFAULT_TOP_K: usize = 3;
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];
/// Query terms shorter than this carry no signal.
const MIN_TERM_LEN: usize = 4;

pub struct FileRetriever;

#[async_trait]
impl Retriever for FileRetriever {
    async fn retrieve(&self, query: &str, config: &RagConfig) -> Result<Vec<RetrievedChunk>> {
        let Some(root) = config.path.as_deref() else {
            return Ok(Vec::new());
        };
        let top_k = config.top_k.unwrap_or(DEFAULT_TOP_K);

        let mut files = Vec::new();
        collect_text_files(Path::new(root), &mut files);
        debug!(root, files = files.len(), "scanning retrieval corpus");

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|term| term.len() >= MIN_TERM_LEN)
            .map(String::from)
            .collect();

        let mut scored = Vec::new();
        for file in &files {
            let Ok(contents) = fs::read_to_string(file) else {
                continue;
            };
            let source = file.display().to_string();
            for (index, paragraph) in contents.split("\n\n").enumerate() {
                let text = paragraph.trim();
                if text.is_empty() {
                    continue;
                }
                let haystack = text.to_lowercase();
                let score = terms
                    .iter()
                    .filter(|term| haystack.contains(term.as_str()))
                    .count();
                if score > 0 {
                    scored.push((
                        score,
                        RetrievedChunk {
                            id: format!("{source}:{index}"),
                            text: text.to_string(),
                            source: source.clone(),
                        },
                    ));
                }
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, chunk)| chunk)
            .collect())
    }
}

fn collect_text_files(path: &Path, files: &mut Vec<PathBuf>) {
    if path.is_file() {
        files.push(path.to_path_buf());
        return;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            collect_text_files(&entry_path, files);
        } else if entry_path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| TEXT_EXTENSIONS.contains(&extension))
        {
            files.push(entry_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &Path, top_k: Option<usize>) -> RagConfig {
        RagConfig {
            path: Some(path.display().to_string()),
            top_k,
            template: None,
        }
    }

    #[tokio::test]
    async fn ranks_paragraphs_by_term_overlap() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("runbook.md"),
            "Disk pressure on database hosts.\n\nNetwork flaps are usually transient.\n\nEscalate disk alerts on database primaries immediately.",
        )
        .expect("write corpus");

        let chunks = FileRetriever
            .retrieve("what to do about disk alerts on the database", &config(dir.path(), Some(2)))
            .await
            .expect("retrieve");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("disk"));
        assert!(chunks[0].source.ends_with("runbook.md"));
    }

    #[tokio::test]
    async fn respects_top_k_and_skips_unrelated_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("notes.txt"),
            "Completely unrelated paragraph.\n\nAnother one about gardening.",
        )
        .expect("write corpus");

        let chunks = FileRetriever
            .retrieve("database disk alerts", &config(dir.path(), None))
            .await
            .expect("retrieve");
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn missing_path_yields_no_chunks() {
        let chunks = FileRetriever
            .retrieve("anything", &RagConfig::default())
            .await
            .expect("retrieve");
        assert!(chunks.is_empty());
    }
}
