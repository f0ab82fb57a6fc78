//! Enrolled face embeddings.

use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, GalleryEntry, PersonId};
use rusqlite::{params, Row};
use serde::Serialize;

/// A gallery row as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEmbedding {
    pub id: i64,
    pub person_id: PersonId,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Enroll one embedding for `person_id`. Returns the new row id.
    ///
    /// The roster entry and the embedding are written together or not at all.
    pub fn add_embedding(
        &self,
        person_id: PersonId,
        embedding: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let encoded = serde_json::to_string(&embedding.values)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO roster (person_id) VALUES (?1)",
            [person_id],
        )?;
        tx.execute(
            "INSERT INTO face_embeddings (person_id, embedding, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![person_id, encoded, embedding.model_version, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        tracing::info!(id, person_id, dim = embedding.len(), "embedding enrolled");
        Ok(id)
    }

    pub fn remove_embedding(&self, id: i64) -> Result<(), StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM face_embeddings WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(StoreError::EmbeddingNotFound(id));
        }
        tracing::info!(id, "embedding removed");
        Ok(())
    }

    pub fn embeddings_for(&self, person_id: PersonId) -> Result<Vec<StoredEmbedding>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_id, embedding, model_version, created_at
             FROM face_embeddings WHERE person_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([person_id], stored_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every enrolled embedding, oldest first.
    pub fn list_embeddings(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_id, embedding, model_version, created_at
             FROM face_embeddings ORDER BY id",
        )?;
        let rows = stmt.query_map([], stored_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The matcher's view of the gallery.
    ///
    /// Undecodable rows come back with an empty embedding, which scores 0.0,
    /// so one bad row never takes identification down.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        Ok(self
            .list_embeddings()?
            .into_iter()
            .map(|stored| GalleryEntry {
                person_id: stored.person_id,
                embedding: stored.embedding,
            })
            .collect())
    }
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEmbedding> {
    let id: i64 = row.get(0)?;
    let encoded: String = row.get(2)?;
    let model_version: Option<String> = row.get(3)?;

    let values = match serde_json::from_str::<Vec<f32>>(&encoded) {
        Ok(values) => values,
        Err(e) => {
            tracing::warn!(id, error = %e, "corrupt gallery embedding; it will never match");
            Vec::new()
        }
    };

    Ok(StoredEmbedding {
        id,
        person_id: row.get(1)?,
        embedding: Embedding {
            values,
            model_version,
        },
        created_at: row.get(4)?,
    })
}
