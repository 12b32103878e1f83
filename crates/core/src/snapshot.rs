use std::ffi::{OsStr, OsString};
use std::path::Path;

use tracing::debug;

use crate::storage::BoxFuture;
use crate::{Error, Result};

/// Produces the configuration snapshot text and applies a restored one.
pub trait SnapshotSource {
    fn export(&self) -> BoxFuture<'_, String>;

    /// Applies the snapshot stored at `path`.
    fn import<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ()>;
}

/// Runs `<program> export` and `<program> import <file>`.
#[derive(Debug, Clone)]
pub struct CommandSnapshotSource {
    program: OsString,
}

impl CommandSnapshotSource {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&OsStr]) -> std::result::Result<String, String> {
        debug!(
            event = "snapshot.exec",
            program = %self.program.to_string_lossy(),
            args = ?args,
            "snapshot.exec"
        );
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program.to_string_lossy()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{}: {}", output.status, stderr.trim()));
        }
        String::from_utf8(output.stdout).map_err(|e| format!("output is not UTF-8: {e}"))
    }
}

impl SnapshotSource for CommandSnapshotSource {
    fn export(&self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            self.run(&[OsStr::new("export")])
                .await
                .map_err(|message| Error::Export { message })
        })
    }

    fn import<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(&[OsStr::new("import"), path.as_os_str()])
                .await
                .map(|_| ())
                .map_err(|message| Error::Import { message })
        })
    }
}
