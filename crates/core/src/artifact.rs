use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::Result;

/// Plaintext snapshot on local disk for the duration of one operation.
/// The file is deleted when this value is dropped or removed, on every path.
#[derive(Debug)]
pub struct TempArtifact {
    file: NamedTempFile,
}

impl TempArtifact {
    /// Creates `dir` if needed and writes `contents` to a fresh file whose name
    /// starts with the stem of `name` and keeps its extension.
    pub fn write(dir: &Path, name: &str, contents: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let (stem, ext) = match name.rfind('.') {
            Some(pos) if pos > 0 => name.split_at(pos),
            _ => (name, ""),
        };
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{stem}."))
            .suffix(ext)
            .tempfile_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Removes the file now. Removal failures are logged, not returned.
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(
                event = "artifact.remove_failed",
                path = %path.display(),
                error = %e,
                "artifact.remove_failed"
            );
        }
    }
}
