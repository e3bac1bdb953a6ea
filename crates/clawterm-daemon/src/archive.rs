//! Read access to a directory of dated text files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A flat directory of files sharing one extension.
///
/// Names handed to [`read`](Self::read) are reduced to their final path
/// component, so a request can never leave the directory.
#[derive(Debug, Clone)]
pub struct FileArchive {
    dir: PathBuf,
    extension: &'static str,
}

impl FileArchive {
    pub fn new(dir: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            dir: dir.into(),
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names with the archive's extension, newest first.
    ///
    /// Names start with an ISO date, so reverse lexical order is newest first.
    /// A missing directory is an empty archive.
    pub async fn list(&self) -> std::io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if Path::new(&name)
                .extension()
                .is_some_and(|ext| ext == self.extension)
            {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Resolve `name` inside the archive, or `None` if it has no file name.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        Path::new(name).file_name().map(|base| self.dir.join(base))
    }

    /// Contents of `name`, or `None` when it does not exist.
    pub async fn read(&self, name: &str) -> std::io::Result<Option<String>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
