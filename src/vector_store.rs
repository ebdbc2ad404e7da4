//! Embedding index for contexts: one vector per context id, stored as
//! little-endian f32 blobs in the shared SQLite file, with the context's
//! summary text and update time riding along as metadata so retrieval never
//! touches relational rows. The scan is brute-force cosine parallelized
//! with rayon; at personal-assistant scale (hundreds of contexts) this
//! beats maintaining an ANN structure.

use std::path::Path;

use rayon::prelude::*;
use rusqlite::{Connection, params};

pub(crate) struct SqliteVectorIndex {
    conn: Connection,
}

/// Scored hit with its cached metadata. Carries everything the resolver
/// needs to build a candidate match without a relational read.
#[derive(Debug, Clone)]
pub(crate) struct VectorHit {
    pub(crate) context_id: String,
    pub(crate) score: f32,
    pub(crate) summary: String,
    pub(crate) updated_at: i64,
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(v.len() * 4);
    for x in v {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

impl SqliteVectorIndex {
    pub(crate) fn open_or_create(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("create db dir: {e}"))?;
        }
        let conn = Connection::open(path).map_err(|e| format!("open vector db: {e}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| format!("set WAL: {e}"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS context_vectors (
                context_id TEXT PRIMARY KEY,
                dim        INTEGER NOT NULL,
                embedding  BLOB NOT NULL,
                summary    TEXT NOT NULL DEFAULT '',
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| format!("vector schema: {e}"))?;
        Ok(SqliteVectorIndex { conn })
    }

    /// Insert or replace the vector and cached summary for a context.
    /// Called on context creation and again by the sweep after each
    /// re-summarization.
    pub(crate) fn upsert(
        &self,
        context_id: &str,
        embedding: &[f32],
        summary: &str,
        now: i64,
    ) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO context_vectors (context_id, dim, embedding, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(context_id) DO UPDATE SET
                    dim = excluded.dim,
                    embedding = excluded.embedding,
                    summary = excluded.summary,
                    updated_at = excluded.updated_at",
                params![
                    context_id,
                    embedding.len() as i64,
                    vec_to_blob(embedding),
                    summary,
                    now
                ],
            )
            .map_err(|e| format!("upsert vector: {e}"))?;
        Ok(())
    }

    pub(crate) fn remove(&self, context_id: &str) -> Result<(), String> {
        self.conn
            .execute(
                "DELETE FROM context_vectors WHERE context_id = ?1",
                params![context_id],
            )
            .map_err(|e| format!("remove vector: {e}"))?;
        Ok(())
    }

    pub(crate) fn len(&self) -> Result<usize, String> {
        self.conn
            .query_row("SELECT COUNT(*) FROM context_vectors", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| e.to_string())
    }

    /// Score every stored vector against the query and return the top `k`
    /// above `threshold`, best first. Vectors whose dimension disagrees
    /// with the query score 0 and fall below any sane threshold.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT context_id, embedding, summary, updated_at FROM context_vectors")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| e.to_string())?;
        let stored: Vec<(String, Vec<u8>, String, i64)> =
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())?;

        let mut hits: Vec<VectorHit> = stored
            .par_iter()
            .map(|(id, blob, summary, updated_at)| VectorHit {
                context_id: id.clone(),
                score: cosine_similarity(query, &blob_to_vec(blob)),
                summary: summary.clone(),
                updated_at: *updated_at,
            })
            .filter(|h| h.score >= threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("aura_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_vectors_{}_{name}.sqlite", std::process::id()))
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn test_cosine_basics() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        // Dimension mismatch scores zero rather than panicking.
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_search_orders_and_bounds() {
        let path = temp_db_path("search");
        let _ = std::fs::remove_file(&path);
        let index = SqliteVectorIndex::open_or_create(&path).unwrap();

        index.upsert("ctx-exact", &[1.0, 0.0, 0.0], "exact topic", 10).unwrap();
        index.upsert("ctx-close", &[0.9, 0.1, 0.0], "close topic", 20).unwrap();
        index.upsert("ctx-far", &[0.0, 0.0, 1.0], "far topic", 30).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 5, 0.5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].context_id, "ctx-exact");
        assert_eq!(hits[1].context_id, "ctx-close");
        assert!(hits[0].score >= hits[1].score);
        // Metadata rides with the hit; no relational lookup needed.
        assert_eq!(hits[0].summary, "exact topic");
        assert_eq!(hits[0].updated_at, 10);

        // k caps the result even when more pass the threshold.
        let hits = index.search(&[1.0, 0.0, 0.0], 1, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_upsert_replaces() {
        let path = temp_db_path("upsert");
        let _ = std::fs::remove_file(&path);
        let index = SqliteVectorIndex::open_or_create(&path).unwrap();

        index.upsert("ctx-a", &[1.0, 0.0], "first summary", 10).unwrap();
        index.upsert("ctx-a", &[0.0, 1.0], "second summary", 20).unwrap();
        assert_eq!(index.len().unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], 5, 0.9).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].context_id, "ctx-a");
        assert_eq!(hits[0].summary, "second summary");

        index.remove("ctx-a").unwrap();
        assert_eq!(index.len().unwrap(), 0);
        std::fs::remove_file(&path).ok();
    }
}
