// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read-only retrieval contract the Context Assembler consults for RAG
//! augmentation. The indexer that populates a store is out of scope; only
//! the query side is modeled here.

use async_trait::async_trait;

/// Fixed embedding dimension used by the (out-of-scope) producer.
pub const EMBEDDING_DIM: usize = 1536;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub file_path: String,
    pub text_chunk: String,
}

/// Nearest-neighbor search over precomputed embeddings. The core never
/// writes through this trait — indexing is someone else's job.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_n: usize,
        path_filter: Option<&str>,
    ) -> anyhow::Result<Vec<RetrievedChunk>>;
}

/// In-memory test double. Embeddings are compared by cosine similarity;
/// `path_filter`, when set, restricts candidates to matching `file_path`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryVectorStore {
    documents: Vec<(RetrievedChunk, Vec<f32>)>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: RetrievedChunk, embedding: Vec<f32>) {
        self.documents.push((chunk, embedding));
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_n: usize,
        path_filter: Option<&str>,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        let mut scored: Vec<(f32, &RetrievedChunk)> = self
            .documents
            .iter()
            .filter(|(chunk, _)| path_filter.map(|p| chunk.file_path == p).unwrap_or(true))
            .map(|(chunk, emb)| (cosine_similarity(query_embedding, emb), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(top_n).map(|(_, c)| c.clone()).collect())
    }
}

/// A store that is absent or uninitialized: retrieval always returns empty
/// so the lifecycle proceeds without RAG augmentation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyVectorStore;

#[async_trait]
impl VectorStoreClient for EmptyVectorStore {
    async fn search_similar(&self, _query_embedding: &[f32], _top_n: usize, _path_filter: Option<&str>) -> anyhow::Result<Vec<RetrievedChunk>> {
        Ok(Vec::new())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
