//! Persistent commit cache keyed by full hash. Lives under the
//! platform cache home, one directory per repository, and lets later
//! runs skip re-parsing commits that were already ingested.

pub mod backend;

pub use backend::{Backend, CachedCommits, FORMAT_TAG};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::error::{GwhoError, Result};
use crate::git::Commit;

pub struct Cache {
    backend: Backend,
}

impl Cache {
    /// Opens the cache for a repository at its conventional location:
    /// `<cache-home>/gwho/<repo-id>/commits.<fmt>`.
    pub fn open_default(repo_root: &Path) -> Result<Cache> {
        Cache::open(&cache_dir(repo_root)?)
    }

    pub fn open(dir: &Path) -> Result<Cache> {
        Ok(Cache {
            backend: Backend::open(dir)?,
        })
    }

    /// All cached commits whose hash is in `revs`. Errors here are for
    /// the caller to downgrade to a cache miss; nothing already yielded
    /// is kept on failure.
    pub fn get(&self, revs: &HashSet<&str>) -> Result<Vec<Commit>> {
        self.backend.get(revs).collect()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.backend.contains(hash)
    }

    pub fn add<I>(&mut self, commits: I)
    where
        I: IntoIterator<Item = Commit>,
    {
        self.backend.add(commits);
    }

    pub fn clear(&mut self) -> Result<()> {
        self.backend.clear()
    }

    pub fn close(self) -> Result<()> {
        self.backend.close()
    }

    /// Buffer the given commits and flush in one step.
    pub fn add_and_close(mut self, commits: Vec<Commit>) -> Result<()> {
        self.backend.add(commits);
        self.backend.close()
    }
}

/// Cache directory for a repository, derived from the canonicalized
/// root path so every checkout gets its own store.
pub fn cache_dir(repo_root: &Path) -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .ok_or_else(|| GwhoError::cache("no cache directory on this platform", false))?;
    Ok(base.join("gwho").join(repo_id(repo_root)))
}

fn repo_id(repo_root: &Path) -> String {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());

    let mut hasher = DefaultHasher::new();
    canonical.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();

    let name: String = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(20)
        .collect();

    format!("{name}-{digest:012x}")
}
