//! Content catalog upserts and quest-level ingest
//!
//! The catalog is the record graph built around each narrated item:
//! language → project → quest → asset → content link → audio, plus tag
//! links. Every write is an exists-then-create upsert, and every touched row
//! lands in the session record: newly created rows as in-session (rollback
//! deletes them), pre-existing rows as not (rollback leaves them).

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};
use verseforge_store::{Filter, RecordStore, StoreResult};

use crate::content::ContentItem;
use crate::error::ItemError;
use crate::orchestrator::{BatchOrchestrator, BatchReport};
use crate::session::SessionRecorder;

pub const LANGUAGE_TABLE: &str = "language";
pub const PROJECT_TABLE: &str = "project";
pub const QUEST_TABLE: &str = "quest";
pub const ASSET_TABLE: &str = "asset";
pub const TAG_TABLE: &str = "tag";
pub const ASSET_CONTENT_LINK_TABLE: &str = "asset_content_link";
pub const QUEST_ASSET_LINK_TABLE: &str = "quest_asset_link";
pub const ASSET_TAG_LINK_TABLE: &str = "asset_tag_link";
pub const QUEST_TAG_LINK_TABLE: &str = "quest_tag_link";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Upsert front-end over the record store, wired to the session recorder.
pub struct Catalog {
    records: Arc<dyn RecordStore>,
    recorder: Arc<SessionRecorder>,
}

impl Catalog {
    pub fn new(records: Arc<dyn RecordStore>, recorder: Arc<SessionRecorder>) -> Self {
        Self { records, recorder }
    }

    /// Exists-then-create. Returns the row id and whether it was created now.
    pub async fn upsert(
        &self,
        table: &str,
        filter: Filter,
        fields: Value,
    ) -> StoreResult<(String, bool)> {
        if let Some(id) = self.records.exists(table, &filter).await? {
            debug!(table, id = %id, "catalog row exists");
            self.recorder.record(table, &id, false);
            return Ok((id, false));
        }
        let id = self.records.create(table, fields).await?;
        debug!(table, id = %id, "catalog row created");
        self.recorder.record(table, &id, true);
        Ok((id, true))
    }

    pub async fn ensure_language(&self, code: &str, name: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                LANGUAGE_TABLE,
                Filter::new().eq("code", code),
                json!({"code": code, "name": name}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_project(&self, name: &str, language_id: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                PROJECT_TABLE,
                Filter::new().eq("name", name),
                json!({"name": name, "language_id": language_id}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_quest(&self, name: &str, project_id: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                QUEST_TABLE,
                Filter::new().eq("name", name).eq("project_id", project_id),
                json!({"name": name, "project_id": project_id}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_asset(&self, name: &str, language_id: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                ASSET_TABLE,
                Filter::new().eq("name", name),
                json!({"name": name, "language_id": language_id}),
            )
            .await?;
        Ok(id)
    }

    /// Link an asset to its narration content. `has_audio` gates resume:
    /// items whose link already carries audio are skipped on re-ingest.
    pub async fn ensure_content_link(
        &self,
        asset_id: &str,
        audio_id: Option<&str>,
        locator: Option<&str>,
    ) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                ASSET_CONTENT_LINK_TABLE,
                Filter::new().eq("asset_id", asset_id),
                json!({
                    "asset_id": asset_id,
                    "audio_id": audio_id,
                    "locator": locator,
                    "has_audio": audio_id.is_some(),
                }),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_quest_asset_link(
        &self,
        quest_id: &str,
        asset_id: &str,
    ) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                QUEST_ASSET_LINK_TABLE,
                Filter::new().eq("quest_id", quest_id).eq("asset_id", asset_id),
                json!({"quest_id": quest_id, "asset_id": asset_id}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_tag(&self, name: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                TAG_TABLE,
                Filter::new().eq("name", name),
                json!({"name": name}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_asset_tag_link(&self, asset_id: &str, tag_id: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                ASSET_TAG_LINK_TABLE,
                Filter::new().eq("asset_id", asset_id).eq("tag_id", tag_id),
                json!({"asset_id": asset_id, "tag_id": tag_id}),
            )
            .await?;
        Ok(id)
    }

    pub async fn ensure_quest_tag_link(&self, quest_id: &str, tag_id: &str) -> StoreResult<String> {
        let (id, _) = self
            .upsert(
                QUEST_TAG_LINK_TABLE,
                Filter::new().eq("quest_id", quest_id).eq("tag_id", tag_id),
                json!({"quest_id": quest_id, "tag_id": tag_id}),
            )
            .await?;
        Ok(id)
    }

    /// Whether an asset with this name already has narration linked.
    pub async fn has_narration(&self, asset_name: &str) -> StoreResult<bool> {
        let asset = self
            .records
            .exists(ASSET_TABLE, &Filter::new().eq("name", asset_name))
            .await?;
        let asset_id = match asset {
            Some(id) => id,
            None => return Ok(false),
        };
        let link = self
            .records
            .exists(
                ASSET_CONTENT_LINK_TABLE,
                &Filter::new().eq("asset_id", asset_id.as_str()).eq("has_audio", true),
            )
            .await?;
        Ok(link.is_some())
    }
}

// ---------------------------------------------------------------------------
// QuestIngest
// ---------------------------------------------------------------------------

/// Outcome of ingesting one quest's worth of items.
#[derive(Debug)]
pub struct IngestReport {
    pub project_id: String,
    pub quest_id: String,
    /// References skipped because their asset already had narration.
    pub skipped: Vec<String>,
    pub batch: BatchReport,
}

/// Drives the orchestrator for a quest and wires results into the catalog.
pub struct QuestIngest {
    catalog: Catalog,
    orchestrator: Arc<BatchOrchestrator>,
    language_code: String,
    tags: Vec<String>,
}

impl QuestIngest {
    pub fn new(
        catalog: Catalog,
        orchestrator: Arc<BatchOrchestrator>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            orchestrator,
            language_code: language_code.into(),
            tags: Vec::new(),
        }
    }

    /// Tags applied to the quest and every ingested asset.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn asset_name(&self, reference: &str) -> String {
        format!("{}_{}", reference, self.language_code)
    }

    pub async fn run(
        &self,
        project_name: &str,
        quest_name: &str,
        language_name: &str,
        items: Vec<ContentItem>,
    ) -> Result<IngestReport, ItemError> {
        let language_id = self
            .catalog
            .ensure_language(&self.language_code, language_name)
            .await?;
        let project_id = self.catalog.ensure_project(project_name, &language_id).await?;
        let quest_id = self.catalog.ensure_quest(quest_name, &project_id).await?;

        let mut tag_ids = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag_id = self.catalog.ensure_tag(tag).await?;
            self.catalog.ensure_quest_tag_link(&quest_id, &tag_id).await?;
            tag_ids.push(tag_id);
        }

        // Resume: drop items whose asset already carries narration.
        let mut pending = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        for item in items {
            if self.catalog.has_narration(&self.asset_name(&item.reference)).await? {
                debug!(reference = %item.reference, "narration already linked, skipping");
                skipped.push(item.reference);
            } else {
                pending.push(item);
            }
        }

        let batch = self.orchestrator.run(pending).await;

        for success in batch.results.iter().flatten() {
            let asset_id = self
                .catalog
                .ensure_asset(&self.asset_name(&success.reference), &language_id)
                .await?;
            self.catalog
                .ensure_content_link(
                    &asset_id,
                    success.artifact.record_id.as_deref(),
                    success.artifact.remote_path.as_deref(),
                )
                .await?;
            self.catalog.ensure_quest_asset_link(&quest_id, &asset_id).await?;
            for tag_id in &tag_ids {
                self.catalog.ensure_asset_tag_link(&asset_id, tag_id).await?;
            }
        }

        info!(
            quest = quest_name,
            succeeded = batch.succeeded(),
            failed = batch.failed(),
            skipped = skipped.len(),
            "quest ingest done"
        );
        Ok(IngestReport {
            project_id,
            quest_id,
            skipped,
            batch,
        })
    }
}
