//! URL to local file bookkeeping for link-rewriting consumers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Records which URLs were saved where and which URLs redirected where.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    downloads: HashMap<String, PathBuf>,
    redirections: HashMap<String, String>,
    deleted: Vec<PathBuf>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `url` was saved to `file`.
    ///
    /// A file holds one document, so any other URL previously mapped to the
    /// same file is dropped.
    pub fn register_download(&mut self, url: &str, file: &Path) {
        self.downloads.retain(|other, path| other == url || path != file);
        self.downloads.insert(url.to_string(), file.to_path_buf());
        self.deleted.retain(|path| path != file);
        debug!(url, file = %file.display(), "registered download");
    }

    /// Records that `from` redirected to `to`. When `to` has a local file
    /// `from` maps to it as well.
    pub fn register_redirection(&mut self, from: &str, to: &str) {
        if let Some(file) = self.downloads.get(to).cloned() {
            self.downloads.insert(from.to_string(), file);
        }
        self.redirections.insert(from.to_string(), to.to_string());
        debug!(from, to, "registered redirection");
    }

    /// Records that `file` was removed; URLs mapped to it are forgotten.
    pub fn register_delete(&mut self, file: &Path) {
        self.downloads.retain(|_, path| path != file);
        self.deleted.push(file.to_path_buf());
        debug!(file = %file.display(), "registered delete");
    }

    #[must_use]
    pub fn local_file(&self, url: &str) -> Option<&Path> {
        self.downloads.get(url).map(PathBuf::as_path)
    }

    #[must_use]
    pub fn redirection(&self, url: &str) -> Option<&str> {
        self.redirections.get(url).map(String::as_str)
    }

    #[must_use]
    pub fn was_deleted(&self, file: &Path) -> bool {
        self.deleted.iter().any(|path| path == file)
    }

    /// Every URL with a local file.
    pub fn downloads(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.downloads
            .iter()
            .map(|(url, path)| (url.as_str(), path.as_path()))
    }
}
