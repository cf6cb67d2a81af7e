//! Orchestrates discovery → fetch → parse → embed and is the sole writer
//! to the Metadata Store. One discovery tuple at a time; failures at any
//! stage publish a `failed` event and stop without poisoning the batch.

use crate::change_monitor::DiscoveryTuple;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::StageError;
use crate::event_bus::{DiscoveredEvent, EventBus, FailedEvent, FetchedEvent, ParsedEvent};
use crate::fetcher::FetcherPool;
use crate::metadata_store::{MetadataStore, SectionWithChunks};
use crate::metrics::{InFlightGuard, Metrics};
use crate::models::{DocumentType, EmbeddingChunk, EntityMention, EntityType, ParseRun, SectionType};
use crate::parser::{self, SectionKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct PipelineCoordinator {
    config: Arc<Config>,
    fetcher: Arc<FetcherPool>,
    store: Arc<dyn MetadataStore>,
    bus: Arc<dyn EventBus>,
    embeddings: Arc<dyn EmbeddingProvider>,
    metrics: Arc<Metrics>,
}

impl PipelineCoordinator {
    pub fn new(
        config: Arc<Config>,
        fetcher: Arc<FetcherPool>,
        store: Arc<dyn MetadataStore>,
        bus: Arc<dyn EventBus>,
        embeddings: Arc<dyn EmbeddingProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { config, fetcher, store, bus, embeddings, metrics }
    }

    /// Processes one discovery/reconciliation tuple end to end. Returns
    /// `Ok(None)` for a non-fatal terminal outcome (404, already current)
    /// and `Ok(Some(version_id))` on success.
    #[instrument(skip(self, tuple), fields(doc_id = %tuple.doc_id))]
    pub async fn process(&self, tuple: DiscoveryTuple) -> anyhow::Result<Option<Uuid>> {
        let _in_flight = InFlightGuard::enter(&self.metrics.active_document_processing, "total");
        let started = Instant::now();

        self.bus
            .publish_discovered(&DiscoveredEvent {
                doc_id: tuple.doc_id,
                case_id: None,
                url: tuple.url.clone(),
                discovered_at: Utc::now(),
                hash_hint: tuple.hash_hint.clone(),
            })
            .await
            .ok();
        self.metrics.documents_discovered_total.inc();

        let fetched = match self.fetch_stage(&tuple).await {
            Ok(Some(f)) => f,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.publish_failure(tuple.doc_id, &e).await;
                return Ok(None);
            }
        };

        let parsed = self.parse_stage(&fetched);

        let sections = match self.embed_stage(&parsed).await {
            Ok(sections) => sections,
            Err(e) => {
                self.publish_failure(tuple.doc_id, &e).await;
                return Ok(None);
            }
        };

        let version_id = match self.persist_stage(&tuple, &fetched, &parsed, sections).await {
            Ok(id) => id,
            Err(e) => {
                self.publish_failure(tuple.doc_id, &e).await;
                return Ok(None);
            }
        };

        self.bus
            .publish_parsed(&ParsedEvent {
                doc_id: tuple.doc_id,
                version_id,
                law_refs: parsed.law_references.clone(),
                parsed_at: Utc::now(),
            })
            .await
            .ok();

        self.metrics
            .document_processing_duration_seconds
            .with_label_values(&["total"])
            .observe(started.elapsed().as_secs_f64());

        Ok(Some(version_id))
    }

    async fn fetch_stage(
        &self,
        tuple: &DiscoveryTuple,
    ) -> Result<Option<crate::fetcher::FetchedDocument>, StageError> {
        let started = Instant::now();
        let result = self.fetcher.fetch(&tuple.url, tuple.doc_id).await;
        self.metrics
            .document_processing_duration_seconds
            .with_label_values(&["fetch"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(Some(doc)) => {
                self.metrics.documents_fetched_total.with_label_values(&["success"]).inc();
                self.bus
                    .publish_fetched(&FetchedEvent {
                        doc_id: tuple.doc_id,
                        storage_path: doc.storage_path.clone(),
                        sha256: doc.sha256.clone(),
                        fetched_at: doc.fetched_at,
                    })
                    .await
                    .ok();
                Ok(Some(doc))
            }
            Ok(None) => {
                self.metrics.documents_fetched_total.with_label_values(&["not_found"]).inc();
                Ok(None)
            }
            Err(e) => {
                self.metrics.documents_fetched_total.with_label_values(&["failed"]).inc();
                Err(e.into())
            }
        }
    }

    fn parse_stage(&self, fetched: &crate::fetcher::FetchedDocument) -> parser::ParsedDocument {
        let started = Instant::now();
        let parsed = parser::parse(&fetched.bytes, &fetched.content_type, &fetched.url);
        self.metrics
            .document_processing_duration_seconds
            .with_label_values(&["parse"])
            .observe(started.elapsed().as_secs_f64());
        let status = if parsed.confidence > 0.0 { "success" } else { "empty" };
        self.metrics.documents_parsed_total.with_label_values(&[status]).inc();
        parsed
    }

    async fn persist_stage(
        &self,
        tuple: &DiscoveryTuple,
        fetched: &crate::fetcher::FetchedDocument,
        parsed: &parser::ParsedDocument,
        sections: Vec<SectionWithChunks>,
    ) -> Result<Uuid, StageError> {
        let registry_number = parsed.case_number.clone().unwrap_or_else(|| format!("UNKNOWN-{}", tuple.doc_id));
        let case = self.store.upsert_case_by_registry_number(&registry_number, None).await?;
        let document = self.store.find_or_create_document(tuple.doc_id, case.id, DocumentType::Decision).await?;
        let version_number = self.store.next_version_number(document.id).await?;

        let parse_run = ParseRun {
            id: Uuid::new_v4(),
            document_version_id: Uuid::nil(),
            parser_version: self.config.parser_version.clone(),
            parsed_at: Utc::now(),
            confidence_score: parsed.confidence,
        };

        let entity_mentions = collect_entity_mentions(parsed);

        let version = self
            .store
            .insert_version_with_sections(
                document.id,
                version_number,
                &tuple.url,
                &fetched.sha256,
                &fetched.storage_path,
                sections,
                parse_run,
                entity_mentions,
            )
            .await?;

        Ok(version.id)
    }

    /// Chunks and embeds every non-empty section, returning the sections
    /// with their chunks attached so they can be persisted atomically
    /// alongside the version they belong to.
    async fn embed_stage(&self, parsed: &parser::ParsedDocument) -> Result<Vec<SectionWithChunks>, StageError> {
        let started = Instant::now();
        let _in_flight = InFlightGuard::enter(&self.metrics.active_document_processing, "embed");
        let mut out = Vec::with_capacity(parsed.sections.len());

        for section in &parsed.sections {
            let mut chunk_records = Vec::new();
            if !section.text.trim().is_empty() {
                let chunks = self.embeddings.chunk_text(&section.text, self.config.embedding_chunk_size);
                let vectors = self.embeddings.embed_batch(&chunks).await?;

                chunk_records = chunks
                    .iter()
                    .zip(vectors.iter())
                    .enumerate()
                    .map(|(i, (text, vector))| EmbeddingChunk {
                        id: Uuid::new_v4(),
                        section_id: Uuid::nil(),
                        chunk_index: i as i32,
                        text: text.clone(),
                        vector: vector.clone(),
                        token_count: self.embeddings.count_tokens(text) as i32,
                    })
                    .collect();

                self.metrics.embeddings_generated_total.inc_by(chunk_records.len() as f64);
            }

            out.push(SectionWithChunks {
                section_type: map_section_kind(section.kind),
                order_index: section.order_index,
                text: section.text.clone(),
                chunks: chunk_records,
            });
        }

        self.metrics
            .embedding_generation_duration_seconds
            .with_label_values(&[&self.config.embedding_model])
            .observe(started.elapsed().as_secs_f64());
        Ok(out)
    }

    async fn publish_failure(&self, doc_id: Uuid, error: &StageError) {
        warn!(doc_id = %doc_id, stage = error.stage, kind = ?error.kind, "stage failed");
        self.metrics.documents_fetched_total.with_label_values(&["failed"]).inc();
        self.bus
            .publish_failed(&FailedEvent {
                doc_id,
                stage: error.stage.to_string(),
                error: error.message.clone(),
                error_details: Some(format!("{:?}", error.kind)),
                failed_at: Utc::now(),
            })
            .await
            .ok();
    }
}

/// Every extracted judge/law/amount span becomes an audit-trail
/// `EntityMention` tied to the version, independent of whether that span
/// also resolved to a concrete entity row (`entity_id` stays null here —
/// Judge/Party/LawArticle resolution is left to a later pass).
fn collect_entity_mentions(parsed: &parser::ParsedDocument) -> Vec<EntityMention> {
    let mut mentions = Vec::new();

    if let Some(judge) = &parsed.judge {
        mentions.push(EntityMention {
            id: Uuid::new_v4(),
            document_version_id: Uuid::nil(),
            entity_type: EntityType::Judge,
            entity_id: None,
            text_span: judge.clone(),
        });
    }

    for law_ref in &parsed.law_references {
        mentions.push(EntityMention {
            id: Uuid::new_v4(),
            document_version_id: Uuid::nil(),
            entity_type: EntityType::Law,
            entity_id: None,
            text_span: law_ref.clone(),
        });
    }

    for amount in &parsed.amounts {
        mentions.push(EntityMention {
            id: Uuid::new_v4(),
            document_version_id: Uuid::nil(),
            entity_type: EntityType::Amount,
            entity_id: None,
            text_span: format!("{} {}", amount.value, amount.currency),
        });
    }

    mentions
}

fn map_section_kind(kind: SectionKind) -> SectionType {
    match kind {
        SectionKind::Facts => SectionType::Facts,
        SectionKind::Claims => SectionType::Claims,
        SectionKind::Arguments => SectionType::Arguments,
        SectionKind::LawReferences => SectionType::LawReferences,
        SectionKind::CourtReasoning => SectionType::CourtReasoning,
        SectionKind::Decision => SectionType::Decision,
        SectionKind::Text => SectionType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::map_section_kind;
    use crate::models::SectionType;
    use crate::parser::SectionKind;

    #[test]
    fn section_kind_mapping_is_total() {
        assert_eq!(map_section_kind(SectionKind::Text), SectionType::Text);
        assert_eq!(map_section_kind(SectionKind::Decision), SectionType::Decision);
    }
}
