//! Inverted-index BM25 ranking over code documents.
//!
//! Postings map token -> (document path, term frequency); per-document
//! lengths feed the normalization term. Parameters `k1` and `b` are
//! configurable (defaults 1.5 / 0.75). Ordering is deterministic: score
//! descending, then path ascending.

use crate::tokenize::tokenize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// A document handed to the index. Path is the identity: re-indexing the
/// same path replaces the prior entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDocument {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CodeDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            language: None,
            metadata: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub path: String,
    pub score: f64,
    /// Lines of the document containing query terms, capped at two.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    content: String,
    language: Option<String>,
    metadata: Option<serde_json::Value>,
    /// Token count after stop-word filtering.
    length: u64,
    content_hash: String,
}

/// The process-local index. Callers treat it as a best-effort cache; it is
/// rebuildable from the filesystem at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    /// BTreeMap keeps persistence and iteration deterministic by path.
    docs: BTreeMap<String, DocEntry>,
    /// token -> path -> term frequency.
    postings: HashMap<String, HashMap<String, u32>>,
    total_tokens: u64,
}

impl Bm25Index {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            docs: BTreeMap::new(),
            postings: HashMap::new(),
            total_tokens: 0,
        }
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Stored content hash for a path, if indexed.
    pub fn content_hash(&self, path: &str) -> Option<&str> {
        self.docs.get(path).map(|d| d.content_hash.as_str())
    }

    pub fn document_content(&self, path: &str) -> Option<&str> {
        self.docs.get(path).map(|d| d.content.as_str())
    }

    /// Add or replace documents keyed by path. Idempotent per path.
    pub fn index(&mut self, documents: Vec<CodeDocument>) {
        for doc in documents {
            self.index_one(doc);
        }
    }

    fn index_one(&mut self, doc: CodeDocument) {
        self.remove(&doc.path);

        let tokens = tokenize(&doc.content);
        let length = tokens.len() as u64;
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }
        for (token, count) in tf {
            self.postings
                .entry(token)
                .or_default()
                .insert(doc.path.clone(), count);
        }

        self.total_tokens += length;
        self.docs.insert(
            doc.path.clone(),
            DocEntry {
                content_hash: content_hash(&doc.content),
                content: doc.content,
                language: doc.language,
                metadata: doc.metadata,
                length,
            },
        );
    }

    /// Remove a document and its postings. No-op for unknown paths.
    pub fn remove(&mut self, path: &str) {
        let Some(entry) = self.docs.remove(path) else {
            return;
        };
        self.total_tokens -= entry.length;
        self.postings.retain(|_, paths| {
            paths.remove(path);
            !paths.is_empty()
        });
    }

    fn avgdl(&self) -> f64 {
        if self.docs.is_empty() {
            return 0.0;
        }
        self.total_tokens as f64 / self.docs.len() as f64
    }

    /// Best match with a cache confidence in [0, 1]: the share of
    /// corpus-known query terms the top document actually contains. Terms
    /// the corpus has never seen are uninformative and do not dilute the
    /// confidence; a query with no known terms scores zero.
    pub fn cache_hit(&self, query: &str) -> Option<(SearchResult, f64)> {
        let top = self.search(query, 1).into_iter().next()?;
        let terms = tokenize(query);
        let informative: Vec<&String> = terms
            .iter()
            .filter(|t| self.postings.contains_key(t.as_str()))
            .collect();
        if informative.is_empty() {
            return Some((top, 0.0));
        }
        let matched = informative
            .iter()
            .filter(|t| {
                self.postings
                    .get(t.as_str())
                    .is_some_and(|paths| paths.contains_key(&top.path))
            })
            .count();
        let confidence = matched as f64 / informative.len() as f64;
        Some((top, confidence))
    }

    /// Top-`limit` documents ranked by BM25, tie-break by ascending path.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n = self.docs.len() as f64;
        let avgdl = self.avgdl();
        let mut scores: HashMap<&str, f64> = HashMap::new();

        for term in &terms {
            let Some(paths) = self.postings.get(term) else {
                continue;
            };
            let df = paths.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (path, &tf) in paths {
                let doc_len = self.docs[path].length as f64;
                let tf = tf as f64;
                let norm = self.k1 * (1.0 - self.b + self.b * doc_len / avgdl.max(1.0));
                let contribution = idf * tf * (self.k1 + 1.0) / (tf + norm);
                *scores.entry(path.as_str()).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(&str, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(limit);

        ranked
            .into_iter()
            .map(|(path, score)| {
                let entry = &self.docs[path];
                SearchResult {
                    content: entry.content.clone(),
                    path: path.to_string(),
                    score,
                    highlights: highlight_lines(&entry.content, &terms),
                }
            })
            .collect()
    }
}

/// First lines (up to two) containing any query term.
fn highlight_lines(content: &str, terms: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.lines() {
        let lowered = line.to_lowercase();
        if terms.iter().any(|t| lowered.contains(t.as_str())) {
            out.push(line.trim().to_string());
            if out.len() == 2 {
                break;
            }
        }
    }
    out
}

/// Hex sha256 of file content, used to skip unchanged files on re-index.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
