// ── Metamemory: Archived Topic Index ────────────────────────────────────────
//
// Similarity index over the final summaries of archived threads, keyed by
// thread name. The embedding function is pluggable. `HashEmbedder`, the
// default, hashes words into signed buckets: deterministic and cheap, but
// it only matches shared vocabulary, so it is NOT suitable for production
// retrieval. Swap in a real embedding model through `Embedder`.

use super::thread_store::TopicThread;
use crate::atoms::constants::HASH_EMBEDDING_DIMS;
use log::debug;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        HashEmbedder { dims: dims.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIMS)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1)
            .map(|w| w.to_lowercase());
        for word in words {
            let digest = Sha256::digest(word.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ═════════════════════════════════════════════════════════════════════════════
// Index
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct IndexEntry {
    name: String,
    summary: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub summary: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    /// Insertion order; ties in search keep this order.
    entries: Vec<IndexEntry>,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("size", &self.entries.len())
            .finish()
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new(Arc::new(HashEmbedder::default()))
    }
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        VectorIndex {
            embedder,
            entries: Vec::new(),
        }
    }

    /// Index a thread under its name using its current summary.
    pub fn add_thread(&mut self, thread: &TopicThread) {
        self.add(&thread.name, thread.summary());
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn add(&mut self, name: &str, summary: &str) {
        let vector = self.embedder.embed(summary);
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.summary = summary.to_string();
                entry.vector = vector;
            }
            None => self.entries.push(IndexEntry {
                name: name.to_string(),
                summary: summary.to_string(),
                vector,
            }),
        }
        debug!("[vector] Indexed '{}' ({} entries)", name, self.entries.len());
    }

    /// Top `top_k` entries by descending similarity; ties by insertion order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        if top_k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        let q = self.embedder.embed(query);
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|e| SearchHit {
                name: e.name.clone(),
                summary: e.summary.clone(),
                score: cosine_similarity(&q, &e.vector),
            })
            .collect();
        // sort_by is stable
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    pub fn remove_thread(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}
