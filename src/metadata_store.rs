//! Relational store with a vector-capable column for embeddings.
//!
//! Backed by an embedded SQLite database through `sqlx`: real enough to
//! enforce the schema's uniqueness invariants transactionally, with an
//! in-memory brute-force cosine scan standing in for a native vector
//! index. The DAO is a trait so a future read-only query surface can
//! share the same contract.

use crate::error::StoreError;
use crate::models::*;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct SectionWithChunks {
    pub section_type: SectionType,
    pub order_index: i32,
    pub text: String,
    pub chunks: Vec<EmbeddingChunk>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert_case_by_registry_number(
        &self,
        registry_number: &str,
        court_id: Option<Uuid>,
    ) -> Result<Case, StoreError>;

    /// `doc_id` is the document's identity (mirroring the source system,
    /// where `Document.id` is the discovery `doc_id` directly) — a case
    /// accumulates one `Document` row per distinct `doc_id`, not one total.
    async fn find_or_create_document(
        &self,
        doc_id: Uuid,
        case_id: Uuid,
        doc_type: DocumentType,
    ) -> Result<Document, StoreError>;

    async fn find_version_by_url(&self, source_url: &str) -> Result<Option<DocumentVersion>, StoreError>;

    async fn next_version_number(&self, document_id: Uuid) -> Result<i32, StoreError>;

    async fn insert_version_with_sections(
        &self,
        document_id: Uuid,
        version_number: i32,
        source_url: &str,
        source_hash: &str,
        raw_storage_path: &str,
        sections: Vec<SectionWithChunks>,
        parse_run: ParseRun,
        entity_mentions: Vec<EntityMention>,
    ) -> Result<DocumentVersion, StoreError>;

    async fn list_versions_for_reconciliation(&self, limit: i64) -> Result<Vec<DocumentVersion>, StoreError>;

    async fn vector_search(
        &self,
        section_type: Option<SectionType>,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(Uuid, Uuid, String, f32)>, StoreError>;
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // A `:memory:` database is private to the connection that opened it;
        // pooling more than one connection would scatter writes across
        // separate, mutually invisible databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courts (
                id TEXT PRIMARY KEY, name TEXT NOT NULL, region TEXT, level TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                registry_number TEXT NOT NULL UNIQUE,
                court_id TEXT,
                category TEXT,
                opened_at TEXT,
                closed_at TEXT,
                status TEXT NOT NULL DEFAULT 'unknown'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                current_version_id TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_versions (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                published_at TEXT,
                source_url TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                raw_storage_path TEXT NOT NULL,
                parsed_json TEXT,
                UNIQUE(document_id, version_number)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_sections (
                id TEXT PRIMARY KEY,
                document_version_id TEXT NOT NULL,
                section_type TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                text TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_chunks (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                vector TEXT NOT NULL,
                token_count INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parse_runs (
                id TEXT PRIMARY KEY,
                document_version_id TEXT NOT NULL,
                parser_version TEXT NOT NULL,
                parsed_at TEXT NOT NULL,
                confidence_score REAL NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_mentions (
                id TEXT PRIMARY KEY,
                document_version_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT,
                text_span TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert_case_by_registry_number(
        &self,
        registry_number: &str,
        court_id: Option<Uuid>,
    ) -> Result<Case, StoreError> {
        if let Some(row) = sqlx::query(
            "SELECT id, registry_number, court_id, category, opened_at, closed_at, status FROM cases WHERE registry_number = ?1",
        )
        .bind(registry_number)
        .fetch_optional(&self.pool)
        .await?
        {
            let id: String = row.try_get("id")?;
            return Ok(Case {
                id: Uuid::parse_str(&id).map_err(|e| StoreError::Integrity(e.to_string()))?,
                registry_number: registry_number.to_string(),
                court_id,
                category: row.try_get("category")?,
                opened_at: None,
                closed_at: None,
                status: CaseStatus::Unknown,
            });
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO cases (id, registry_number, court_id, category, opened_at, closed_at, status) VALUES (?1, ?2, ?3, NULL, NULL, NULL, 'unknown')",
        )
        .bind(id.to_string())
        .bind(registry_number)
        .bind(court_id.map(|c| c.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(Case {
            id,
            registry_number: registry_number.to_string(),
            court_id,
            category: None,
            opened_at: None,
            closed_at: None,
            status: CaseStatus::Unknown,
        })
    }

    async fn find_or_create_document(
        &self,
        doc_id: Uuid,
        case_id: Uuid,
        doc_type: DocumentType,
    ) -> Result<Document, StoreError> {
        if let Some(row) = sqlx::query("SELECT id, case_id, current_version_id FROM documents WHERE id = ?1")
            .bind(doc_id.to_string())
            .fetch_optional(&self.pool)
            .await?
        {
            let case_id: String = row.try_get("case_id")?;
            let current_version_id: Option<String> = row.try_get("current_version_id")?;
            return Ok(Document {
                id: doc_id,
                case_id: Uuid::parse_str(&case_id).map_err(|e| StoreError::Integrity(e.to_string()))?,
                doc_type,
                current_version_id: current_version_id
                    .map(|s| Uuid::parse_str(&s))
                    .transpose()
                    .map_err(|e| StoreError::Integrity(e.to_string()))?,
            });
        }

        sqlx::query("INSERT INTO documents (id, case_id, doc_type, current_version_id) VALUES (?1, ?2, ?3, NULL)")
            .bind(doc_id.to_string())
            .bind(case_id.to_string())
            .bind(format!("{doc_type:?}").to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(Document { id: doc_id, case_id, doc_type, current_version_id: None })
    }

    async fn find_version_by_url(&self, source_url: &str) -> Result<Option<DocumentVersion>, StoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, version_number, published_at, source_url, source_hash, raw_storage_path, parsed_json FROM document_versions WHERE source_url = ?1 ORDER BY version_number DESC LIMIT 1",
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_version(&r)).transpose()
    }

    async fn next_version_number(&self, document_id: Uuid) -> Result<i32, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(version_number), 0) as max_v FROM document_versions WHERE document_id = ?1")
            .bind(document_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let max_v: i32 = row.try_get("max_v")?;
        Ok(max_v + 1)
    }

    async fn insert_version_with_sections(
        &self,
        document_id: Uuid,
        version_number: i32,
        source_url: &str,
        source_hash: &str,
        raw_storage_path: &str,
        sections: Vec<SectionWithChunks>,
        parse_run: ParseRun,
        entity_mentions: Vec<EntityMention>,
    ) -> Result<DocumentVersion, StoreError> {
        let mut tx = self.pool.begin().await?;
        let version_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO document_versions (id, document_id, version_number, published_at, source_url, source_hash, raw_storage_path, parsed_json) VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, NULL)",
        )
        .bind(version_id.to_string())
        .bind(document_id.to_string())
        .bind(version_number)
        .bind(source_url)
        .bind(source_hash)
        .bind(raw_storage_path)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE documents SET current_version_id = ?1 WHERE id = ?2")
            .bind(version_id.to_string())
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await?;

        for section in &sections {
            let section_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO document_sections (id, document_version_id, section_type, order_index, text) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(section_id.to_string())
            .bind(version_id.to_string())
            .bind(format!("{:?}", section.section_type).to_uppercase())
            .bind(section.order_index)
            .bind(&section.text)
            .execute(&mut *tx)
            .await?;

            for chunk in &section.chunks {
                let vector_json = serde_json::to_string(&chunk.vector)
                    .map_err(|e| StoreError::Integrity(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO embedding_chunks (id, section_id, chunk_index, text, vector, token_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(chunk.id.to_string())
                .bind(section_id.to_string())
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(vector_json)
                .bind(chunk.token_count)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO parse_runs (id, document_version_id, parser_version, parsed_at, confidence_score) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(parse_run.id.to_string())
        .bind(version_id.to_string())
        .bind(&parse_run.parser_version)
        .bind(parse_run.parsed_at.to_rfc3339())
        .bind(parse_run.confidence_score)
        .execute(&mut *tx)
        .await?;

        for mention in &entity_mentions {
            sqlx::query(
                "INSERT INTO entity_mentions (id, document_version_id, entity_type, entity_id, text_span) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(mention.id.to_string())
            .bind(version_id.to_string())
            .bind(format!("{:?}", mention.entity_type).to_lowercase())
            .bind(mention.entity_id.map(|id| id.to_string()))
            .bind(&mention.text_span)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(DocumentVersion {
            id: version_id,
            document_id,
            version_number,
            published_at: Some(Utc::now()),
            source_url: source_url.to_string(),
            source_hash: source_hash.to_string(),
            raw_storage_path: raw_storage_path.to_string(),
            parsed_json: None,
        })
    }

    async fn list_versions_for_reconciliation(&self, limit: i64) -> Result<Vec<DocumentVersion>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, document_id, version_number, published_at, source_url, source_hash, raw_storage_path, parsed_json FROM document_versions WHERE source_hash IS NOT NULL ORDER BY version_number DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_version).collect()
    }

    async fn vector_search(
        &self,
        section_type: Option<SectionType>,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(Uuid, Uuid, String, f32)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ec.id as chunk_id, ec.text as chunk_text, ec.vector as vector,
                   ds.document_version_id as version_id, ds.section_type as section_type
            FROM embedding_chunks ec
            JOIN document_sections ds ON ds.id = ec.section_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in rows {
            let st_str: String = row.try_get("section_type")?;
            if let Some(want) = section_type {
                if st_str != format!("{want:?}").to_uppercase() {
                    continue;
                }
            }
            let vector_json: String = row.try_get("vector")?;
            let vector: Vec<f32> =
                serde_json::from_str(&vector_json).map_err(|e| StoreError::Integrity(e.to_string()))?;
            let distance = cosine_distance(query_vector, &vector);
            let version_id: String = row.try_get("version_id")?;
            let chunk_text: String = row.try_get("chunk_text")?;
            scored.push((
                Uuid::parse_str(&version_id).map_err(|e| StoreError::Integrity(e.to_string()))?,
                Uuid::new_v4(),
                chunk_text,
                distance,
            ));
        }

        scored.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentVersion, StoreError> {
    let id: String = row.try_get("id")?;
    let document_id: String = row.try_get("document_id")?;
    Ok(DocumentVersion {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Integrity(e.to_string()))?,
        document_id: Uuid::parse_str(&document_id).map_err(|e| StoreError::Integrity(e.to_string()))?,
        version_number: row.try_get("version_number")?,
        published_at: None,
        source_url: row.try_get("source_url")?,
        source_hash: row.try_get("source_hash")?,
        raw_storage_path: row.try_get("raw_storage_path")?,
        parsed_json: row.try_get("parsed_json")?,
    })
}

/// Cosine distance = 1 - cosine similarity; similarity clamped to [0, 1]
/// by the caller per the vector-search contract.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_case_is_idempotent() {
        let store = SqliteMetadataStore::connect("sqlite::memory:").await.unwrap();
        let c1 = store.upsert_case_by_registry_number("123/456/2024", None).await.unwrap();
        let c2 = store.upsert_case_by_registry_number("123/456/2024", None).await.unwrap();
        assert_eq!(c1.id, c2.id);
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![1.0, 0.0, 0.0];
        assert!(cosine_distance(&v, &v) < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }
}
