//! Concurrent batch narration
//!
//! Drives a batch of content items through reuse lookup, synthesis, and
//! persistence. Items run as independent tasks under the shared rate
//! limiter; the report maps outcomes back to input order no matter how
//! completion interleaves, and one item's failure (including a panic in its
//! task) never fails the batch.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verseforge_store::{ObjectStore, RecordStore};

use crate::audio::AudioFormat;
use crate::content::{ContentItem, Fingerprint, VoiceConfig};
use crate::error::ItemError;
use crate::provider::Dispatcher;
use crate::reuse::{ReuseResolver, AUDIO_TABLE};
use crate::session::SessionRecorder;

// ---------------------------------------------------------------------------
// Policy and layout
// ---------------------------------------------------------------------------

/// What to do with generated audio.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Write each artifact to the local output directory.
    pub save_local: bool,
    /// Upload to the object store and create an `audio` record.
    pub persist_remote: bool,
    /// Look up prior artifacts by fingerprint before synthesizing.
    pub reuse_existing: bool,
    /// Synthesize even when a reusable artifact exists.
    pub force_regenerate: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            save_local: false,
            persist_remote: true,
            reuse_existing: true,
            force_regenerate: false,
        }
    }
}

impl RunPolicy {
    /// Reuse needs remote persistence (that is where prior artifacts live)
    /// and loses to an explicit regenerate request.
    pub fn reuse_enabled(&self) -> bool {
        self.persist_remote && self.reuse_existing && !self.force_regenerate
    }
}

/// Where artifacts land.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub bucket: String,
    /// Folder prefix inside the bucket, e.g. "narration/en".
    pub content_folder: String,
    /// Local output directory; required when `save_local` is set.
    pub local_dir: Option<PathBuf>,
    /// Participates in artifact file names.
    pub language_code: String,
}

impl StorageLayout {
    /// `{reference}_{language}_{voice}_{uuid}.{ext}`, reference sanitized to
    /// filesystem-safe characters.
    fn file_name(&self, reference: &str, voice_id: &str, format: AudioFormat) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            sanitize(reference),
            self.language_code,
            sanitize(voice_id),
            Uuid::new_v4().simple(),
            format.extension()
        )
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Whether an artifact came from a fresh provider call or a fingerprint hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Generated,
    Reused,
}

/// The narration produced (or referenced) for one item.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    /// Id of the `audio` record, when remote persistence is on.
    pub record_id: Option<String>,
    pub provider: &'static str,
    pub fingerprint: Fingerprint,
    pub origin: ArtifactOrigin,
    /// Unknown for reused artifacts (their bytes are not re-fetched).
    pub format: Option<AudioFormat>,
    pub remote_path: Option<String>,
    pub local_path: Option<PathBuf>,
    /// Raw audio, kept only when no persistence sink consumed it.
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ItemSuccess {
    pub reference: String,
    pub artifact: AudioArtifact,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub reference: String,
    pub error: ItemError,
}

/// One entry per input item, in input order.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<Result<ItemSuccess, ItemFailure>>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct BatchContext {
    dispatcher: Arc<Dispatcher>,
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    recorder: Arc<SessionRecorder>,
    resolver: ReuseResolver,
    voice: VoiceConfig,
    policy: RunPolicy,
    layout: StorageLayout,
}

pub struct BatchOrchestrator {
    // Shared with every item task.
    context: Arc<BatchContext>,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        recorder: Arc<SessionRecorder>,
        voice: VoiceConfig,
        policy: RunPolicy,
        layout: StorageLayout,
    ) -> Self {
        let resolver = ReuseResolver::new(records.clone());
        Self {
            context: Arc::new(BatchContext {
                dispatcher,
                records,
                objects,
                recorder,
                resolver,
                voice,
                policy,
                layout,
            }),
        }
    }

    /// Run the batch. Always returns exactly `items.len()` results, in input
    /// order; a panicked item task becomes that item's `Aborted` failure.
    pub async fn run(&self, items: Vec<ContentItem>) -> BatchReport {
        let context = &self.context;
        info!(items = items.len(), provider = context.dispatcher.provider_id(), "batch start");

        let handles: Vec<(String, JoinHandle<Result<ItemSuccess, ItemError>>)> = items
            .into_iter()
            .map(|item| {
                let context = Arc::clone(context);
                let reference = item.reference.clone();
                (reference, tokio::spawn(async move { context.process_item(item).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (reference, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(success)) => Ok(success),
                Ok(Err(error)) => {
                    context.recorder.record_failure(&reference, &error.to_string());
                    Err(ItemFailure { reference, error })
                }
                Err(join_err) => {
                    let error = ItemError::Aborted(join_err.to_string());
                    warn!(reference = %reference, %error, "item task aborted");
                    context.recorder.record_failure(&reference, &error.to_string());
                    Err(ItemFailure { reference, error })
                }
            };
            results.push(outcome);
        }

        let report = BatchReport { results };
        info!(succeeded = report.succeeded(), failed = report.failed(), "batch done");
        report
    }
}

impl BatchContext {
    async fn process_item(&self, item: ContentItem) -> Result<ItemSuccess, ItemError> {
        if item.text.trim().is_empty() {
            return Err(ItemError::EmptyText);
        }

        let fingerprint = Fingerprint::compute(
            &item.text,
            self.dispatcher.provider_id(),
            &self.voice.voice_id,
        );

        if self.policy.reuse_enabled() {
            if let Some(id) = self.resolver.find(&fingerprint).await? {
                // Referenced, not created: rollback must leave it alone.
                self.recorder.record(AUDIO_TABLE, &id, false);
                debug!(reference = %item.reference, id = %id, "reusing prior narration");
                return Ok(ItemSuccess {
                    reference: item.reference,
                    artifact: AudioArtifact {
                        record_id: Some(id),
                        provider: self.dispatcher.provider_id(),
                        fingerprint,
                        origin: ArtifactOrigin::Reused,
                        format: None,
                        remote_path: None,
                        local_path: None,
                        bytes: None,
                    },
                });
            }
        }

        let audio = self.dispatcher.synthesize(&item.text, &self.voice).await?;
        let file_name = self
            .layout
            .file_name(&item.reference, &self.voice.voice_id, audio.format);

        let mut local_path = None;
        if self.policy.save_local {
            let dir = self.layout.local_dir.as_ref().ok_or_else(|| {
                ItemError::LocalSave("save_local set but no local directory configured".into())
            })?;
            let path = dir.join(&file_name);
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ItemError::LocalSave(e.to_string()))?;
            tokio::fs::write(&path, &audio.bytes)
                .await
                .map_err(|e| ItemError::LocalSave(e.to_string()))?;
            self.recorder
                .record_local_audio(&path.to_string_lossy(), &item.reference);
            local_path = Some(path);
        }

        let mut record_id = None;
        let mut remote_path = None;
        if self.policy.persist_remote {
            let path = format!("{}/{}", self.layout.content_folder, file_name);
            self.objects
                .put(&self.layout.bucket, &path, audio.bytes.clone())
                .await?;
            self.recorder.record_remote_audio(&self.layout.bucket, &path);

            let id = self
                .records
                .create(
                    AUDIO_TABLE,
                    serde_json::json!({
                        "fingerprint": fingerprint.as_str(),
                        "bucket": self.layout.bucket,
                        "path": path,
                        "format": audio.format,
                        "reference": item.reference,
                        "provider": self.dispatcher.provider_id(),
                        "voice_id": self.voice.voice_id,
                    }),
                )
                .await?;
            self.recorder.record(AUDIO_TABLE, &id, true);
            record_id = Some(id);
            remote_path = Some(path);
        }

        let persisted = local_path.is_some() || remote_path.is_some();
        Ok(ItemSuccess {
            reference: item.reference,
            artifact: AudioArtifact {
                record_id,
                provider: self.dispatcher.provider_id(),
                fingerprint,
                origin: ArtifactOrigin::Generated,
                format: Some(audio.format),
                remote_path,
                local_path,
                bytes: if persisted { None } else { Some(audio.bytes) },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StubProvider;
    use crate::rate_limit::{RateLimiter, RateLimiterConfig};
    use crate::retry::RetryPolicy;
    use verseforge_store::fakes::{MemoryObjectStore, MemoryRecordStore};

    fn harness(
        stub: Arc<StubProvider>,
        policy: RunPolicy,
    ) -> (Arc<BatchOrchestrator>, Arc<MemoryRecordStore>, Arc<MemoryObjectStore>, Arc<SessionRecorder>)
    {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = Arc::new(SessionRecorder::new());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(stub, limiter, RetryPolicy::default()));
        let layout = StorageLayout {
            bucket: "narration".into(),
            content_folder: "audio/en".into(),
            local_dir: None,
            language_code: "en".into(),
        };
        let orchestrator = Arc::new(BatchOrchestrator::new(
            dispatcher,
            records.clone(),
            objects.clone(),
            recorder.clone(),
            VoiceConfig::new("onyx"),
            policy,
            layout,
        ));
        (orchestrator, records, objects, recorder)
    }

    #[tokio::test]
    async fn test_results_map_to_input_order() {
        let stub = Arc::new(StubProvider::new());
        let (orchestrator, _, _, _) = harness(stub, RunPolicy::default());

        let items = vec![
            ContentItem::new("Gen 1:1", "In the beginning"),
            ContentItem::new("Gen 1:2", ""),
            ContentItem::new("Gen 1:3", "And God said"),
        ];
        let report = orchestrator.run(items).await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].as_ref().unwrap().reference, "Gen 1:1");
        assert!(matches!(
            report.results[1].as_ref().unwrap_err().error,
            ItemError::EmptyText
        ));
        assert_eq!(report.results[2].as_ref().unwrap().reference, "Gen 1:3");
    }

    #[tokio::test]
    async fn test_remote_persistence_records_audio_row_and_object() {
        let stub = Arc::new(StubProvider::new());
        let (orchestrator, records, objects, recorder) = harness(stub, RunPolicy::default());

        let report = orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;
        assert_eq!(report.succeeded(), 1);

        assert_eq!(records.row_count(AUDIO_TABLE), 1);
        assert_eq!(objects.object_count(), 1);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.entries(AUDIO_TABLE).len(), 1);
        assert!(snapshot.entries(AUDIO_TABLE)[0].created_in_session);
        assert_eq!(snapshot.remote_audio.len(), 1);
        assert_eq!(snapshot.remote_audio[0].bucket, "narration");
        assert!(snapshot.remote_audio[0].path.starts_with("audio/en/gen_1_1_en_onyx_"));
    }

    #[tokio::test]
    async fn test_identical_text_reuses_without_second_provider_call() {
        let stub = Arc::new(StubProvider::new());
        let (orchestrator, _, _, recorder) = harness(stub.clone(), RunPolicy::default());

        let first = orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;
        let second = orchestrator
            .run(vec![ContentItem::new("Gen 1:1 again", "In  the\nbeginning")])
            .await;

        assert_eq!(stub.total_calls(), 1);
        let first_artifact = &first.results[0].as_ref().unwrap().artifact;
        let reused = &second.results[0].as_ref().unwrap().artifact;
        assert_eq!(reused.origin, ArtifactOrigin::Reused);
        assert_eq!(reused.record_id, first_artifact.record_id);

        // The reused row is marked pre-existing for this (second) reference,
        // but the first-wins rule keeps the original created flag.
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.entries(AUDIO_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn test_force_regenerate_bypasses_reuse() {
        let stub = Arc::new(StubProvider::new());
        let policy = RunPolicy {
            force_regenerate: true,
            ..RunPolicy::default()
        };
        let (orchestrator, records, _, _) = harness(stub.clone(), policy);

        orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;
        orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;

        assert_eq!(stub.total_calls(), 2);
        assert_eq!(records.row_count(AUDIO_TABLE), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_isolated_to_its_item() {
        let stub = Arc::new(StubProvider::new());
        stub.fail_times(
            "unpronounceable",
            crate::error::SynthesisError::Permanent("422".into()),
            99,
        );
        let (orchestrator, records, _, recorder) = harness(stub, RunPolicy::default());

        let items = vec![
            ContentItem::new("v1", "verse one"),
            ContentItem::new("v2", "verse two"),
            ContentItem::new("v3", "verse three"),
            ContentItem::new("v4", "unpronounceable"),
            ContentItem::new("v5", "verse five"),
        ];
        let report = orchestrator.run(items).await;

        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        assert!(report.results[3].is_err());
        assert_eq!(records.row_count(AUDIO_TABLE), 4);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].reference, "v4");
    }

    #[tokio::test]
    async fn test_no_sink_returns_bytes_inline() {
        let stub = Arc::new(StubProvider::new());
        let policy = RunPolicy {
            save_local: false,
            persist_remote: false,
            reuse_existing: false,
            force_regenerate: false,
        };
        let (orchestrator, records, objects, _) = harness(stub, policy);

        let report = orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;
        let artifact = &report.results[0].as_ref().unwrap().artifact;
        assert!(artifact.bytes.is_some());
        assert_eq!(records.row_count(AUDIO_TABLE), 0);
        assert_eq!(objects.object_count(), 0);
    }

    #[tokio::test]
    async fn test_save_local_writes_file_and_records_path() {
        let stub = Arc::new(StubProvider::new());
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = Arc::new(SessionRecorder::new());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(stub, limiter, RetryPolicy::default()));
        let orchestrator = Arc::new(BatchOrchestrator::new(
            dispatcher,
            records,
            objects,
            recorder.clone(),
            VoiceConfig::new("onyx"),
            RunPolicy {
                save_local: true,
                persist_remote: false,
                reuse_existing: false,
                force_regenerate: false,
            },
            StorageLayout {
                bucket: "narration".into(),
                content_folder: "audio/en".into(),
                local_dir: Some(dir.path().to_path_buf()),
                language_code: "en".into(),
            },
        ));

        let report = orchestrator
            .run(vec![ContentItem::new("Gen 1:1", "In the beginning")])
            .await;
        let artifact = &report.results[0].as_ref().unwrap().artifact;
        let path = artifact.local_path.as_ref().unwrap();
        assert!(path.exists());

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.local_audio.len(), 1);
        assert_eq!(snapshot.local_audio[0].reference, "Gen 1:1");
    }
}
