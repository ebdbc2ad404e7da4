//! Context resolution: turn an inbound request into a ranked shortlist of
//! existing contexts. The resolver never decides; it ranks, and the deep
//! tier (or a threshold-clearing top hit) decides.

use crate::embedding::Embedder;
use crate::store::Store;
use crate::tool_args::now_epoch;
use crate::types::{CandidateMatch, Context, ContextState, CoreError, derive_id};
use crate::vector_store::SqliteVectorIndex;

/// Shortlist cap. More candidates than this just burns decision-prompt
/// tokens without improving pick quality.
pub(crate) const MAX_CANDIDATES: usize = 5;

/// Cosine floor below which a stored context is considered unrelated.
pub(crate) const SCORE_THRESHOLD: f32 = 0.35;

/// Two scores closer than this are a tie; recency breaks it.
const TIE_EPSILON: f32 = 1e-6;

pub(crate) struct Resolver {
    index: SqliteVectorIndex,
    embedder: Box<dyn Embedder>,
}

impl Resolver {
    pub(crate) fn new(index: SqliteVectorIndex, embedder: Box<dyn Embedder>) -> Self {
        Resolver { index, embedder }
    }

    /// Ranked candidates for a request: best score first, near-ties broken
    /// by most recently updated context. Candidates are built from the
    /// index's cached metadata alone; no relational reads happen here.
    /// Empty when nothing clears the threshold — that is a "create new
    /// context" signal, not an error.
    pub(crate) fn resolve(&self, request_text: &str) -> Result<Vec<CandidateMatch>, CoreError> {
        let query = self.embedder.embed_query(request_text)?;
        let hits = self
            .index
            .search(&query, MAX_CANDIDATES, SCORE_THRESHOLD)
            .map_err(CoreError::Store)?;

        let mut candidates: Vec<CandidateMatch> = hits
            .into_iter()
            .map(|hit| CandidateMatch {
                context_id: hit.context_id,
                score: hit.score,
                summary: hit.summary,
                updated_at: hit.updated_at,
            })
            .collect();
        candidates.sort_by(|a, b| {
            if (a.score - b.score).abs() < TIE_EPSILON {
                b.updated_at.cmp(&a.updated_at)
            } else {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }
        });
        Ok(candidates)
    }

    /// Open a new context seeded with the request that triggered it. The
    /// row starts in `needs_summary`; the initial embedding covers the name
    /// plus the seed text so the context is findable before its first sweep.
    pub(crate) fn create_context(
        &self,
        store: &Store,
        name: &str,
        seed_text: &str,
    ) -> Result<Context, CoreError> {
        let now = now_epoch();
        if let Some(existing) = store.context_by_name(name) {
            return Ok(existing);
        }
        let ctx = Context {
            id: derive_id("ctx", name, now),
            name: name.to_string(),
            summary: String::new(),
            state: ContextState::NeedsSummary,
            updated_at: now,
        };
        store.insert_context(&ctx).map_err(CoreError::Store)?;
        let doc = format!("{name}\n{seed_text}");
        let embedding = self.embedder.embed_document(&doc)?;
        // Summary is empty pre-sweep; the name stands in as metadata.
        self.index
            .upsert(&ctx.id, &embedding, name, now)
            .map_err(CoreError::Store)?;
        Ok(ctx)
    }

    /// Refresh a context's vector and cached summary after re-summarization.
    pub(crate) fn reindex(&self, ctx: &Context) -> Result<(), CoreError> {
        let doc = format!("{}\n{}", ctx.name, ctx.summary);
        let embedding = self.embedder.embed_document(&doc)?;
        let summary = if ctx.summary.is_empty() { &ctx.name } else { &ctx.summary };
        self.index
            .upsert(&ctx.id, &embedding, summary, now_epoch())
            .map_err(CoreError::Store)
    }

    /// Drop the vector of a merged-away context.
    pub(crate) fn forget(&self, context_id: &str) -> Result<(), CoreError> {
        self.index.remove(context_id).map_err(CoreError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::StubEmbedder;
    use std::path::PathBuf;

    fn temp_path(name: &str, suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("aura_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("resolver_{}_{name}_{suffix}.sqlite", std::process::id()))
    }

    fn fixture(name: &str) -> (Store, Resolver, PathBuf, PathBuf) {
        let store_path = temp_path(name, "store");
        let index_path = temp_path(name, "index");
        let _ = std::fs::remove_file(&store_path);
        let _ = std::fs::remove_file(&index_path);
        let store = Store::open_or_create(&store_path).unwrap();
        let index = SqliteVectorIndex::open_or_create(&index_path).unwrap();
        let resolver = Resolver::new(index, Box::new(StubEmbedder::new()));
        (store, resolver, store_path, index_path)
    }

    #[test]
    fn test_create_then_resolve_same_topic() {
        let (store, resolver, sp, ip) = fixture("same_topic");
        let ctx = resolver
            .create_context(&store, "Guitar", "practice barre chords daily")
            .unwrap();
        assert!(ctx.id.starts_with("ctx-"));
        assert_eq!(ctx.state, ContextState::NeedsSummary);

        let candidates = resolver.resolve("practice barre chords daily").unwrap();
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].context_id, ctx.id);
        // Summary is empty pre-sweep; name stands in.
        assert_eq!(candidates[0].summary, "Guitar");
        std::fs::remove_file(&sp).ok();
        std::fs::remove_file(&ip).ok();
    }

    #[test]
    fn test_reindex_refreshes_cached_summary() {
        let (store, resolver, sp, ip) = fixture("reindex_meta");
        let mut ctx = resolver
            .create_context(&store, "Guitar", "practice log for chords")
            .unwrap();
        ctx.summary = "Practice log for barre chords.".to_string();
        resolver.reindex(&ctx).unwrap();

        // The refreshed summary comes straight off the index metadata.
        let candidates = resolver.resolve("practice log for barre chords").unwrap();
        assert_eq!(candidates[0].context_id, ctx.id);
        assert_eq!(candidates[0].summary, "Practice log for barre chords.");
        std::fs::remove_file(&sp).ok();
        std::fs::remove_file(&ip).ok();
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let (store, resolver, sp, ip) = fixture("no_match");
        resolver
            .create_context(&store, "Guitar", "practice barre chords scales")
            .unwrap();
        let candidates = resolver
            .resolve("xylophone zoning variance paperwork")
            .unwrap();
        assert!(candidates.is_empty());
        std::fs::remove_file(&sp).ok();
        std::fs::remove_file(&ip).ok();
    }

    #[test]
    fn test_create_context_is_name_idempotent() {
        let (store, resolver, sp, ip) = fixture("idempotent");
        let a = resolver.create_context(&store, "Guitar", "chords").unwrap();
        let b = resolver.create_context(&store, "Guitar", "different seed").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_contexts().unwrap().len(), 1);
        std::fs::remove_file(&sp).ok();
        std::fs::remove_file(&ip).ok();
    }

    #[test]
    fn test_candidates_capped_and_ordered() {
        let (store, resolver, sp, ip) = fixture("capped");
        for i in 0..8 {
            resolver
                .create_context(
                    &store,
                    &format!("Topic{i}"),
                    "shared overlapping words here plus extra",
                )
                .unwrap();
        }
        let candidates = resolver
            .resolve("shared overlapping words here plus extra")
            .unwrap();
        assert!(candidates.len() <= MAX_CANDIDATES);
        for pair in candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score - 1e-6);
        }
        std::fs::remove_file(&sp).ok();
        std::fs::remove_file(&ip).ok();
    }
}
