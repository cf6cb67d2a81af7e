//! The relational data model: courts, judges, cases, documents and their
//! versions, parties, law references, sections and embedding chunks.
//!
//! Mirrors the entity set of the source registry's schema, including the
//! audit trail (`ParseRun`, `EntityMention`) the distilled specification
//! left implicit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Court {
    pub id: Uuid,
    pub name: String,
    pub region: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Judge {
    pub id: Uuid,
    pub full_name: String,
    pub court_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Case {
    pub id: Uuid,
    pub registry_number: String,
    pub court_id: Option<Uuid>,
    pub category: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: CaseStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Decision,
    Ruling,
    Order,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub case_id: Uuid,
    pub doc_type: DocumentType,
    pub current_version_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: String,
    pub source_hash: String,
    pub raw_storage_path: String,
    pub parsed_json: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartyType {
    Person,
    Company,
    State,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Party {
    pub id: Uuid,
    pub party_type: PartyType,
    pub normalized_name: String,
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaseParty {
    pub case_id: Uuid,
    pub party_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LawArticle {
    pub id: Uuid,
    pub code: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentLawRef {
    pub document_version_id: Uuid,
    pub law_article_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Claim {
    pub id: Uuid,
    pub case_id: Uuid,
    pub claim_type: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DecisionResult {
    Won,
    Lost,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DecisionOutcome {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub party_id: Uuid,
    pub result: DecisionResult,
    pub amount_awarded: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionType {
    Facts,
    Claims,
    Arguments,
    LawReferences,
    CourtReasoning,
    Decision,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentSection {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub section_type: SectionType,
    pub order_index: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub id: Uuid,
    pub section_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub vector: Vec<f32>,
    pub token_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Judge,
    Party,
    Law,
    Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmbeddingEntityLink {
    pub embedding_chunk_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaseRelationType {
    Appeal,
    Cassation,
    Retrial,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaseRelation {
    pub from_case_id: Uuid,
    pub to_case_id: Uuid,
    pub relation_type: CaseRelationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentRelationType {
    Amends,
    Cancels,
    Refers,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentRelation {
    pub from_version_id: Uuid,
    pub to_version_id: Uuid,
    pub relation_type: DocumentRelationType,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParseRun {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub parser_version: String,
    pub parsed_at: DateTime<Utc>,
    pub confidence_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EntityMention {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Option<Uuid>,
    pub text_span: String,
}
