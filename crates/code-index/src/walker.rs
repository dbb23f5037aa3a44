//! Filesystem walk feeding the BM25 index.
//!
//! `.gitignore`-aware via the `ignore` walker, with configurable exclude
//! globs on top. Large files are split into chunks on line boundaries so a
//! single oversized file cannot dominate the postings.

use crate::bm25::{content_hash, Bm25Index, CodeDocument};
use crate::error::{IndexError, Result};
use crate::stats::IndexStats;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Compile exclude patterns once per indexing run. Invalid globs are
/// skipped with a warning rather than failing the walk.
pub fn build_exclude_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("Skipping invalid exclude pattern {pattern:?}: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("Failed to build exclude set: {e}");
        GlobSet::empty()
    })
}

pub struct DirectoryIndexer<'a> {
    index: &'a mut Bm25Index,
    /// Whole-file hashes from the previous run, keyed by relative path.
    file_hashes: &'a mut BTreeMap<String, String>,
    exclude: &'a GlobSet,
    chunk_lines: usize,
}

impl<'a> DirectoryIndexer<'a> {
    pub fn new(
        index: &'a mut Bm25Index,
        file_hashes: &'a mut BTreeMap<String, String>,
        exclude: &'a GlobSet,
        chunk_lines: usize,
    ) -> Self {
        Self {
            index,
            file_hashes,
            exclude,
            chunk_lines: chunk_lines.max(1),
        }
    }

    /// Walk `root` and index every text file. When `force` is false, files
    /// whose stored content hash matches are skipped.
    pub fn index_directory(&mut self, root: &Path, force: bool) -> Result<IndexStats> {
        if !root.exists() {
            return Err(IndexError::InvalidPath(format!(
                "path does not exist: {}",
                root.display()
            )));
        }

        let start = Instant::now();
        let mut stats = IndexStats::default();

        for entry in WalkBuilder::new(root).hidden(false).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Failed to read entry: {e}");
                    stats.errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            if self.exclude.is_match(&relative) {
                continue;
            }

            stats.files_scanned += 1;
            match self.index_file(path, &relative, force) {
                Ok(FileOutcome::Indexed { chunks, language }) => {
                    stats.files_indexed += 1;
                    stats.chunks += chunks;
                    if let Some(lang) = language {
                        *stats.languages.entry(lang).or_insert(0) += 1;
                    }
                }
                Ok(FileOutcome::Skipped) => stats.files_skipped += 1,
                Ok(FileOutcome::NotText) => {}
                Err(e) => {
                    log::warn!("Failed to index {relative}: {e}");
                    stats.errors += 1;
                }
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Indexed {} of {} files ({} skipped, {} chunks) in {}ms",
            stats.files_indexed,
            stats.files_scanned,
            stats.files_skipped,
            stats.chunks,
            stats.elapsed_ms
        );
        Ok(stats)
    }

    fn index_file(&mut self, path: &Path, relative: &str, force: bool) -> Result<FileOutcome> {
        let bytes = std::fs::read(path)?;
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(FileOutcome::NotText);
        };

        let hash = content_hash(&content);
        if !force && self.file_hashes.get(relative) == Some(&hash) {
            return Ok(FileOutcome::Skipped);
        }

        let language = language_for(path).map(str::to_string);
        let documents = chunk_file(relative, &content, language.as_deref(), self.chunk_lines);
        let chunks = documents.len();

        // Replace every chunk of the prior revision, including trailing
        // chunks the new revision no longer produces.
        self.remove_stale_chunks(relative, chunks);
        self.index.index(documents);
        self.file_hashes.insert(relative.to_string(), hash);

        Ok(FileOutcome::Indexed { chunks, language })
    }

    fn remove_stale_chunks(&mut self, relative: &str, new_chunks: usize) {
        self.index.remove(relative);
        let mut chunk = new_chunks.max(1);
        loop {
            let chunk_path = chunk_path(relative, chunk);
            if self.index.content_hash(&chunk_path).is_none() {
                break;
            }
            self.index.remove(&chunk_path);
            chunk += 1;
        }
    }
}

enum FileOutcome {
    Indexed {
        chunks: usize,
        language: Option<String>,
    },
    Skipped,
    NotText,
}

fn chunk_path(relative: &str, chunk: usize) -> String {
    format!("{relative}#{chunk}")
}

/// Split a file into index documents. Files within the chunk budget become
/// one document at the bare path; larger files split on line boundaries
/// into `path#1`, `path#2`, ...
fn chunk_file(
    relative: &str,
    content: &str,
    language: Option<&str>,
    chunk_lines: usize,
) -> Vec<CodeDocument> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= chunk_lines {
        let mut doc = CodeDocument::new(relative, content);
        if let Some(lang) = language {
            doc = doc.with_language(lang);
        }
        return vec![doc];
    }

    lines
        .chunks(chunk_lines)
        .enumerate()
        .map(|(i, chunk)| {
            let mut doc = CodeDocument::new(chunk_path(relative, i + 1), chunk.join("\n"));
            if let Some(lang) = language {
                doc = doc.with_language(lang);
            }
            doc
        })
        .collect()
}

fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "rb" => "ruby",
        "sh" => "shell",
        "md" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn small_file_is_one_document() {
        let docs = chunk_file("a.rs", "fn main() {}\n", Some("rust"), 100);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "a.rs");
        assert_eq!(docs[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn large_file_splits_on_line_boundaries() {
        let content = (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let docs = chunk_file("big.txt", &content, None, 4);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].path, "big.txt#1");
        assert_eq!(docs[2].path, "big.txt#3");
        assert_eq!(docs[0].content, "line 0\nline 1\nline 2\nline 3");
        assert_eq!(docs[2].content, "line 8\nline 9");
    }

    #[test]
    fn exclude_set_matches_nested_paths() {
        let set = build_exclude_set(&["**/node_modules/**".to_string()]);
        assert!(set.is_match("web/node_modules/pkg/index.js"));
        assert!(!set.is_match("src/main.rs"));
    }
}
