//! Durable vector index over SQLite with `sqlite-vec`.
//!
//! Embeddings are stored alongside chunk metadata and searched with
//! `vec_distance_cosine`; similarity is reported as `1 - distance` so
//! scores line up with the in-memory backend.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, ffi};

use super::{ChunkHit, VectorIndex};
use crate::error::VaultError;
use crate::types::ChunkRecord;

#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Connection,
}

impl SqliteVectorIndex {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?;

        // Fail fast if the vec extension did not load.
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| VaultError::Storage(err.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunks (
                     id TEXT PRIMARY KEY,
                     document_id TEXT NOT NULL,
                     position INTEGER NOT NULL,
                     record TEXT NOT NULL,
                     embedding TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunks_document_id
                     ON chunks(document_id);",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| VaultError::Storage(err.to_string()))?;

        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), VaultError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *const c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(VaultError::Storage)
    }

    fn encode(chunk: &ChunkRecord) -> Result<(String, String), VaultError> {
        let embedding = chunk
            .embedding
            .as_ref()
            .ok_or_else(|| VaultError::IndexWrite(format!("chunk {} has no embedding", chunk.id)))?;
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| VaultError::IndexWrite(err.to_string()))?;

        // The stored record omits the vector; it lives in its own column.
        let mut stripped = chunk.clone();
        stripped.embedding = None;
        let record_json = serde_json::to_string(&stripped)
            .map_err(|err| VaultError::IndexWrite(err.to_string()))?;
        Ok((record_json, embedding_json))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<(), VaultError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let (record_json, embedding_json) = Self::encode(chunk)?;
            rows.push((
                chunk.id.clone(),
                chunk.document_id.clone(),
                chunk.position as i64,
                record_json,
                embedding_json,
            ));
        }

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (id, document_id, position, record, embedding) in &rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks
                             (id, document_id, position, record, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        (id, document_id, position, record, embedding),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| VaultError::IndexWrite(err.to_string()))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, VaultError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM chunks WHERE document_id = ?1", [&document_id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| VaultError::IndexWrite(err.to_string()))
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkHit>, VaultError> {
        let query_json = serde_json::to_string(query)
            .map_err(|err| VaultError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT record, \
                         vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance \
                         FROM chunks \
                         ORDER BY distance ASC, document_id ASC, position ASC \
                         LIMIT {top_k}"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let rows = stmt
                    .query_map([&query_json], |row| {
                        let record: String = row.get(0)?;
                        let distance: f32 = row.get(1)?;
                        Ok((record, distance))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut hits = Vec::new();
                for row in rows {
                    let (record, distance) = row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    hits.push((record, 1.0 - distance));
                }
                Ok(hits)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?
            .into_iter()
            .map(|(record, score)| {
                let chunk: ChunkRecord = serde_json::from_str(&record)
                    .map_err(|err| VaultError::Storage(err.to_string()))?;
                Ok(ChunkHit { chunk, score })
            })
            .collect()
    }

    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>, VaultError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id FROM chunks WHERE document_id = ?1 ORDER BY position ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&document_id], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(ids)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, VaultError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))
    }
}
