mod artifact;
pub mod config;
mod crypto;
mod error;
mod manager;
mod naming;
mod progress;
mod retention;
pub mod run_log;
mod select;
mod snapshot;
mod storage;

pub const APP_NAME: &str = "ScoopBackup";
/// Label substring identifying objects owned by this backup family.
pub const FAMILY_MARKER: &str = "Scoop Backup";

pub use artifact::TempArtifact;
pub use crypto::{Cipher, decrypt_text, encrypt_text};
pub use error::{Error, Result};
pub use manager::{
    BackupManager, BackupOutcome, DeleteFailure, DeleteReport, ManageOutcome, ManagerConfig,
    RESTORE_ARTIFACT_NAME, RestoreOutcome, ScheduledOutcome,
};
pub use naming::{backup_filename, backup_label, parse_backup_filename};
pub use progress::{ProgressSink, TaskProgress};
pub use retention::{ListOrder, RetentionPolicy};
pub use select::{Choice, PresetSelection, Selection, filter_family, to_choices};
pub use snapshot::{CommandSnapshotSource, SnapshotSource};
pub use storage::{
    BoxFuture, ContentRef, GistStore, GistStoreConfig, InMemoryStore, RemoteObject, RemoteStore,
};
