//! SQLite persistence for the registered-person gallery.
//!
//! Two tables: `persons` (unique display names) and `face_vectors`
//! (embeddings, several per person, cascade-deleted with their owner).
//! Embeddings are stored as little-endian f32 blobs. [`GalleryStore::load_gallery`]
//! materializes the snapshot the matcher runs against; its entry order is
//! pinned to vector insertion order so matcher tie-breaks are reproducible,
//! and its revision strictly increases with every committed registration.

use namesake_core::{Embedding, Gallery, GalleryEntry};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("person '{0}' already exists")]
    DuplicateName(String),
    #[error("stored vector {id} has a corrupt embedding blob")]
    CorruptVector { id: i64 },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A registered person with their stored vector count.
#[derive(Debug, Clone)]
pub struct PersonRow {
    pub id: i64,
    pub name: String,
    pub vector_count: usize,
}

/// Result of registering one face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub person_id: i64,
    pub vector_id: i64,
    /// False when the name already existed and the vector was appended.
    pub new_person: bool,
}

/// Aggregate store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub person_count: usize,
    pub vector_count: usize,
    pub avg_vectors_per_person: f64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS face_vectors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER NOT NULL,
    dim INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (person_id) REFERENCES persons (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_vectors_person_id
    ON face_vectors (person_id);
";

/// SQLite-backed gallery store.
pub struct GalleryStore {
    conn: Connection,
}

impl GalleryStore {
    /// Open (or create) the store at `path`, creating parent directories
    /// and the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::initialize(conn)?;
        tracing::info!(path = %path.display(), "gallery store opened");
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Add a new person. Fails with [`StoreError::DuplicateName`] if the
    /// name is taken.
    pub fn add_person(&self, name: &str) -> Result<i64, StoreError> {
        match self
            .conn
            .execute("INSERT INTO persons (name) VALUES (?1)", [name])
        {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(name, id, "person added");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateName(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a person by display name.
    pub fn person_by_name(&self, name: &str) -> Result<Option<(i64, String)>, StoreError> {
        let result = self.conn.query_row(
            "SELECT id, name FROM persons WHERE name = ?1",
            [name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All persons with their vector counts, ordered by name.
    pub fn all_persons(&self) -> Result<Vec<PersonRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COUNT(fv.id)
             FROM persons p
             LEFT JOIN face_vectors fv ON fv.person_id = p.id
             GROUP BY p.id
             ORDER BY p.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PersonRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    vector_count: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Register a face embedding under `name`, creating the person on first
    /// registration and appending to the existing person afterwards.
    pub fn register_embedding(
        &self,
        name: &str,
        embedding: &Embedding,
    ) -> Result<Registration, StoreError> {
        let (person_id, new_person) = match self.add_person(name) {
            Ok(id) => (id, true),
            Err(StoreError::DuplicateName(_)) => {
                let (id, _) = self
                    .person_by_name(name)?
                    .ok_or_else(|| StoreError::DuplicateName(name.to_string()))?;
                (id, false)
            }
            Err(e) => return Err(e),
        };
        let vector_id = self.add_vector(person_id, embedding)?;
        Ok(Registration {
            person_id,
            vector_id,
            new_person,
        })
    }

    /// Append an embedding to a person. Stored vectors are immutable.
    pub fn add_vector(&self, person_id: i64, embedding: &Embedding) -> Result<i64, StoreError> {
        let blob = embedding_to_bytes(embedding);
        self.conn.execute(
            "INSERT INTO face_vectors (person_id, dim, embedding) VALUES (?1, ?2, ?3)",
            rusqlite::params![person_id, embedding.dim() as i64, blob],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(person_id, vector_id = id, dim = embedding.dim(), "vector added");
        Ok(id)
    }

    /// All embeddings stored for one person, in insertion order.
    pub fn vectors_for(&self, person_id: i64) -> Result<Vec<Embedding>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, embedding FROM face_vectors WHERE person_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([person_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            embeddings.push(bytes_to_embedding(&blob).ok_or(StoreError::CorruptVector { id })?);
        }
        Ok(embeddings)
    }

    /// Delete a person and, via cascade, all their vectors. Returns whether
    /// a row was deleted.
    pub fn delete_person(&self, person_id: i64) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM persons WHERE id = ?1", [person_id])?;
        if deleted > 0 {
            tracing::info!(person_id, "person deleted");
        }
        Ok(deleted > 0)
    }

    /// Materialize the matching snapshot.
    ///
    /// Entries come back in vector insertion order; the revision is the
    /// largest stored vector id (0 when empty), so any committed
    /// registration produces a strictly newer snapshot.
    pub fn load_gallery(&self) -> Result<Gallery, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT fv.id, p.name, fv.embedding
             FROM face_vectors fv
             JOIN persons p ON p.id = fv.person_id
             ORDER BY fv.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut revision = 0u64;
        let mut entries = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let embedding =
                bytes_to_embedding(&blob).ok_or(StoreError::CorruptVector { id })?;
            revision = revision.max(id as u64);
            entries.push(GalleryEntry { name, embedding });
        }

        tracing::debug!(entries = entries.len(), revision, "gallery snapshot loaded");
        Ok(Gallery::new(revision, entries))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let person_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
        let vector_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM face_vectors", [], |row| row.get(0))?;
        Ok(StoreStats {
            person_count: person_count as usize,
            vector_count: vector_count as usize,
            avg_vectors_per_person: if person_count > 0 {
                vector_count as f64 / person_count as f64
            } else {
                0.0
            },
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Encode an embedding as little-endian f32 bytes.
fn embedding_to_bytes(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob. `None` when the length is not a
/// multiple of four.
fn bytes_to_embedding(bytes: &[u8]) -> Option<Embedding> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Embedding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GalleryStore {
        GalleryStore::open_in_memory().unwrap()
    }

    #[test]
    fn add_and_lookup_person() {
        let s = store();
        let id = s.add_person("alice").unwrap();
        assert_eq!(s.person_by_name("alice").unwrap(), Some((id, "alice".into())));
        assert_eq!(s.person_by_name("bob").unwrap(), None);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let s = store();
        s.add_person("alice").unwrap();
        assert!(matches!(
            s.add_person("alice"),
            Err(StoreError::DuplicateName(name)) if name == "alice"
        ));
    }

    #[test]
    fn vectors_roundtrip() {
        let s = store();
        let id = s.add_person("alice").unwrap();
        let e1 = Embedding::new(vec![0.25, -1.5, 3.0]);
        let e2 = Embedding::new(vec![1.0, 2.0, 3.0]);
        s.add_vector(id, &e1).unwrap();
        s.add_vector(id, &e2).unwrap();

        let loaded = s.vectors_for(id).unwrap();
        assert_eq!(loaded, vec![e1, e2]);
    }

    #[test]
    fn delete_person_cascades_to_vectors() {
        let s = store();
        let id = s.add_person("alice").unwrap();
        s.add_vector(id, &Embedding::new(vec![1.0])).unwrap();

        assert!(s.delete_person(id).unwrap());
        assert!(s.vectors_for(id).unwrap().is_empty());
        assert_eq!(s.stats().unwrap().vector_count, 0);
        // Deleting again reports nothing deleted.
        assert!(!s.delete_person(id).unwrap());
    }

    #[test]
    fn register_embedding_appends_to_existing_person() {
        let s = store();
        let first = s
            .register_embedding("alice", &Embedding::new(vec![1.0]))
            .unwrap();
        assert!(first.new_person);

        let second = s
            .register_embedding("alice", &Embedding::new(vec![2.0]))
            .unwrap();
        assert!(!second.new_person);
        assert_eq!(second.person_id, first.person_id);
        assert_ne!(second.vector_id, first.vector_id);

        assert_eq!(s.vectors_for(first.person_id).unwrap().len(), 2);
        assert_eq!(s.stats().unwrap().person_count, 1);
    }

    #[test]
    fn gallery_order_is_vector_insertion_order() {
        let s = store();
        let alice = s.add_person("alice").unwrap();
        let bob = s.add_person("bob").unwrap();
        // Interleave registrations; load order must follow vector ids,
        // not person names.
        s.add_vector(bob, &Embedding::new(vec![1.0])).unwrap();
        s.add_vector(alice, &Embedding::new(vec![2.0])).unwrap();
        s.add_vector(bob, &Embedding::new(vec![3.0])).unwrap();

        let gallery = s.load_gallery().unwrap();
        let names: Vec<&str> = gallery.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice", "bob"]);
    }

    #[test]
    fn gallery_revision_increases_with_registrations() {
        let s = store();
        let id = s.add_person("alice").unwrap();

        let empty = s.load_gallery().unwrap();
        assert_eq!(empty.revision(), 0);
        assert!(empty.is_empty());

        s.add_vector(id, &Embedding::new(vec![1.0])).unwrap();
        let first = s.load_gallery().unwrap();
        s.add_vector(id, &Embedding::new(vec![2.0])).unwrap();
        let second = s.load_gallery().unwrap();

        assert!(first.revision() > 0);
        assert!(second.revision() > first.revision());
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn all_persons_reports_vector_counts() {
        let s = store();
        let alice = s.add_person("alice").unwrap();
        s.add_person("bob").unwrap();
        s.add_vector(alice, &Embedding::new(vec![1.0])).unwrap();
        s.add_vector(alice, &Embedding::new(vec![2.0])).unwrap();

        let persons = s.all_persons().unwrap();
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].name, "alice");
        assert_eq!(persons[0].vector_count, 2);
        assert_eq!(persons[1].name, "bob");
        assert_eq!(persons[1].vector_count, 0);
    }

    #[test]
    fn stats_average() {
        let s = store();
        let alice = s.add_person("alice").unwrap();
        let bob = s.add_person("bob").unwrap();
        s.add_vector(alice, &Embedding::new(vec![1.0])).unwrap();
        s.add_vector(alice, &Embedding::new(vec![2.0])).unwrap();
        s.add_vector(bob, &Embedding::new(vec![3.0])).unwrap();

        let stats = s.stats().unwrap();
        assert_eq!(stats.person_count, 2);
        assert_eq!(stats.vector_count, 3);
        assert!((stats.avg_vectors_per_person - 1.5).abs() < 1e-9);
    }

    #[test]
    fn corrupt_blob_is_a_typed_error() {
        let s = store();
        let id = s.add_person("alice").unwrap();
        s.conn
            .execute(
                "INSERT INTO face_vectors (person_id, dim, embedding) VALUES (?1, 1, x'0102')",
                [id],
            )
            .unwrap();
        assert!(matches!(
            s.vectors_for(id),
            Err(StoreError::CorruptVector { .. })
        ));
    }
}
