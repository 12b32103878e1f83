use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifact::TempArtifact;
use crate::crypto::Cipher;
use crate::naming::{backup_filename, backup_label, now_local};
use crate::progress::{ProgressSink, TaskProgress};
use crate::retention::RetentionPolicy;
use crate::select::{Selection, filter_family, to_choices};
use crate::snapshot::SnapshotSource;
use crate::storage::{RemoteObject, RemoteStore};
use crate::{Error, FAMILY_MARKER, Result};

pub const RESTORE_ARTIFACT_NAME: &str = "scoop_temp_restore.json";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Substring every owned label carries; other objects are never touched.
    pub family_marker: String,
    /// Where plaintext temp artifacts live while an operation runs.
    pub cache_dir: PathBuf,
    pub retention: RetentionPolicy,
}

impl ManagerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            family_marker: FAMILY_MARKER.to_string(),
            cache_dir: cache_dir.into(),
            retention: RetentionPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.family_marker.is_empty() {
            return Err(Error::config("family marker must not be empty"));
        }
        self.retention.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    pub id: String,
    pub filename: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored { id: String, label: String },
    NothingToRestore,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ManageOutcome {
    Deleted(DeleteReport),
    NoBackups,
    Cancelled,
    NothingSelected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledOutcome {
    pub backup: BackupOutcome,
    pub kept: Vec<String>,
    pub pruned: DeleteReport,
}

impl ScheduledOutcome {
    pub fn pruned_count(&self) -> usize {
        self.pruned.deleted.len()
    }
}

/// Runs backup, restore, manage and scheduled retention against one store.
/// Each operation is a single sequential chain; nothing is retried and no
/// locking happens across invocations.
pub struct BackupManager<S, X, P> {
    store: S,
    source: X,
    selection: P,
    cipher: Cipher,
    config: ManagerConfig,
    progress: Option<Box<dyn ProgressSink>>,
}

impl<S, X, P> BackupManager<S, X, P>
where
    S: RemoteStore,
    X: SnapshotSource,
    P: Selection,
{
    pub fn new(store: S, source: X, selection: P, cipher: Cipher, config: ManagerConfig) -> Self {
        Self {
            store,
            source,
            selection,
            cipher,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &X {
        &self.source
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Export, encrypt, upload. Nothing reaches the store if the export fails.
    pub async fn backup(&self) -> Result<BackupOutcome> {
        let res = self.run_backup().await;
        report("backup", res)
    }

    /// Family entries in store order.
    pub async fn list(&self) -> Result<Vec<RemoteObject>> {
        let res = self.list_family().await;
        report("list", res)
    }

    pub async fn restore(&self) -> Result<RestoreOutcome> {
        let res = self.run_restore().await;
        report("restore", res)
    }

    /// Deletes the selected backups one by one; a failed delete does not stop
    /// the rest.
    pub async fn manage(&self) -> Result<ManageOutcome> {
        let res = self.run_manage().await;
        report("manage", res)
    }

    /// Backup, then prune the family down to the retention policy. Pruning is
    /// skipped entirely when the backup fails.
    pub async fn scheduled(&self) -> Result<ScheduledOutcome> {
        let res = self.run_scheduled().await;
        report("scheduled", res)
    }

    async fn run_backup(&self) -> Result<BackupOutcome> {
        debug!(event = "phase.start", phase = "export", "phase.start");
        self.emit(TaskProgress::phase("export"));
        let plaintext = self.source.export().await?;

        let now = now_local();
        let filename = backup_filename(&now);
        let label = backup_label(&self.config.family_marker, &now);

        let artifact = TempArtifact::write(&self.config.cache_dir, &filename, &plaintext)?;
        debug!(
            event = "backup.export",
            filename = %filename,
            bytes = plaintext.len(),
            artifact = %artifact.path().display(),
            "backup.export"
        );

        self.emit(TaskProgress::phase("encrypt"));
        let payload = self.cipher.encrypt(&plaintext)?;

        debug!(event = "phase.start", phase = "upload", "phase.start");
        self.emit(TaskProgress::phase("upload"));
        let id = self
            .store
            .create(&label, BTreeMap::from([(filename.clone(), payload)]))
            .await?;
        artifact.remove();

        info!(
            event = "backup.created",
            provider = self.store.provider(),
            id = %id,
            filename = %filename,
            "backup.created"
        );
        Ok(BackupOutcome {
            id,
            filename,
            label,
        })
    }

    async fn list_family(&self) -> Result<Vec<RemoteObject>> {
        let all = self.store.list().await?;
        let total = all.len();
        let family = filter_family(all, &self.config.family_marker);
        debug!(
            event = "store.listed",
            objects = total,
            family = family.len(),
            "store.listed"
        );
        Ok(family)
    }

    async fn run_restore(&self) -> Result<RestoreOutcome> {
        let entries = self.list_family().await?;
        if entries.is_empty() {
            info!(event = "restore.empty", "restore.empty");
            return Ok(RestoreOutcome::NothingToRestore);
        }

        let Some(id) = self
            .selection
            .choose_one("Select a backup to restore", &to_choices(&entries))?
        else {
            info!(event = "restore.cancelled", "restore.cancelled");
            return Ok(RestoreOutcome::Cancelled);
        };

        let entry = entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::UnknownBackup { id: id.clone() })?;
        let content = entry
            .payload()
            .ok_or_else(|| Error::MissingPayload { id: id.clone() })?;

        self.emit(TaskProgress {
            phase: "download".to_string(),
            object_id: Some(id.clone()),
            ..TaskProgress::default()
        });
        let payload = self.store.read_content(content).await?;
        let plaintext = self.cipher.decrypt(&payload)?;

        let artifact =
            TempArtifact::write(&self.config.cache_dir, RESTORE_ARTIFACT_NAME, &plaintext)?;
        self.emit(TaskProgress {
            phase: "import".to_string(),
            object_id: Some(id.clone()),
            ..TaskProgress::default()
        });
        debug!(
            event = "restore.import",
            id = %id,
            artifact = %artifact.path().display(),
            "restore.import"
        );
        let imported = self.source.import(artifact.path()).await;
        artifact.remove();
        imported?;

        info!(event = "restore.applied", id = %id, "restore.applied");
        Ok(RestoreOutcome::Restored {
            id,
            label: entry.label.clone(),
        })
    }

    async fn run_manage(&self) -> Result<ManageOutcome> {
        let entries = self.list_family().await?;
        if entries.is_empty() {
            info!(event = "manage.empty", "manage.empty");
            return Ok(ManageOutcome::NoBackups);
        }

        let Some(ids) = self
            .selection
            .choose_many("Select backups to delete", &to_choices(&entries))?
        else {
            return Ok(ManageOutcome::Cancelled);
        };
        if ids.is_empty() {
            return Ok(ManageOutcome::NothingSelected);
        }

        Ok(ManageOutcome::Deleted(self.delete_each(&entries, ids).await))
    }

    async fn run_scheduled(&self) -> Result<ScheduledOutcome> {
        let backup = self.run_backup().await?;

        let entries = self.list_family().await?;
        let (kept, mut prune) = self.config.retention.partition(entries);
        if let Some(pos) = prune.iter().position(|e| e.id == backup.id) {
            warn!(
                event = "retention.skip_fresh",
                id = %backup.id,
                "retention.skip_fresh"
            );
            prune.remove(pos);
        }

        let ids: Vec<String> = prune.iter().map(|e| e.id.clone()).collect();
        let pruned = self.delete_each(&prune, ids).await;
        info!(
            event = "retention.prune",
            kept = kept.len(),
            pruned = pruned.deleted.len(),
            failed = pruned.failed.len(),
            "retention.prune"
        );

        Ok(ScheduledOutcome {
            backup,
            kept: kept.into_iter().map(|e| e.id).collect(),
            pruned,
        })
    }

    /// Deletes `ids` that belong to `known`, one request each.
    async fn delete_each(&self, known: &[RemoteObject], ids: Vec<String>) -> DeleteReport {
        let known: HashSet<&str> = known.iter().map(|e| e.id.as_str()).collect();
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        let total = ids.len() as u64;

        let mut report = DeleteReport::default();
        for (done, id) in ids.into_iter().enumerate() {
            let res = if known.contains(id.as_str()) {
                self.store.delete(&id).await
            } else {
                Err(Error::UnknownBackup { id: id.clone() })
            };
            match res {
                Ok(()) => {
                    info!(event = "backup.deleted", id = %id, "backup.deleted");
                    report.deleted.push(id.clone());
                }
                Err(e) => {
                    error!(
                        event = "backup.delete_failed",
                        id = %id,
                        error = %e,
                        "backup.delete_failed"
                    );
                    report.failed.push(DeleteFailure {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
            self.emit(TaskProgress {
                phase: "delete".to_string(),
                object_id: Some(id),
                items_total: Some(total),
                items_done: Some(done as u64 + 1),
            });
        }
        report
    }

    fn emit(&self, progress: TaskProgress) {
        if let Some(sink) = &self.progress {
            sink.on_progress(progress);
        }
    }
}

fn report<T>(kind: &'static str, res: Result<T>) -> Result<T> {
    if let Err(e) = &res {
        error!(event = "run.failed", kind, error = %e, "run.failed");
    }
    res
}
