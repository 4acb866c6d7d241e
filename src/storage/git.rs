//!  Git-backed record backend.
//!
//!  The key space is stored as a flat tree of blobs, one blob per record,
//!  named by its key. Each applied change set becomes one commit on
//!  `refs/heads/main`; a commit either lands (the ref moves) or it doesn't,
//!  which gives `apply` its all-or-nothing behaviour.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ErrorCode, FileMode, ObjectType, Repository};
use parking_lot::RwLock;
use tracing::debug;

use crate::storage::backend::RecordBackend;
use crate::storage::change_set::{Change, ChangeSet};
use crate::storage::commit::{CommitBuilder, CommitInfo, CommitMessage, HistoryIterator};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{validate_key, CommitId, GitSignature};

/// Branch the records live on.
const MAIN_REF: &str = "refs/heads/main";

/// Git repository holding the records of one pool.
///
/// Clone this to keep a handle (e.g. for reading history) while a pool owns
/// the backend - it uses Arc internally.
#[derive(Clone)]
pub struct GitBackend {
    inner: Arc<GitBackendInner>,
}

struct GitBackendInner {
    repo: RwLock<Repository>,
    path: PathBuf,
    name: String,
    signature: RwLock<GitSignature>,
}

impl GitBackend {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .map_err(|_| StoreError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_repo(repo, path))
    }

    /// Initialize a new repository.
    pub fn init(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        // the branch stays unborn until the first commit
        repo.set_head(MAIN_REF)?;
        Ok(Self::from_repo(repo, path))
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn from_repo(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitBackendInner {
                repo: RwLock::new(repo),
                path: path.to_path_buf(),
                name: path.display().to_string(),
                signature: RwLock::new(GitSignature::objpool()),
            }),
        }
    }

    /// Set the signature for commits.
    pub fn with_signature(self, signature: GitSignature) -> Self {
        *self.inner.signature.write() = signature;
        self
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current tip of the records branch, `None` before the first commit.
    pub fn tip(&self) -> StoreResult<Option<CommitId>> {
        let repo = self.inner.repo.read();
        tip_of(&repo)
    }

    /// Most recent commits first.
    pub fn history(&self, limit: Option<usize>) -> StoreResult<Vec<CommitInfo>> {
        let repo = self.inner.repo.read();
        let Some(tip) = tip_of(&repo)? else {
            return Ok(Vec::new());
        };
        let iter = HistoryIterator::new(&repo, tip)?;
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}

fn tip_of(repo: &Repository) -> StoreResult<Option<CommitId>> {
    let reference = match repo.find_reference(MAIN_REF) {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Git(e)),
    };
    let commit = reference.peel_to_commit()?;
    Ok(Some(CommitId::new(commit.id())))
}

impl RecordBackend for GitBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn load(&mut self) -> StoreResult<BTreeMap<String, String>> {
        let repo = self.inner.repo.read();
        let mut records = BTreeMap::new();
        let Some(tip) = tip_of(&repo)? else {
            return Ok(records);
        };

        let commit = repo
            .find_commit(tip.raw())
            .map_err(|_| StoreError::CommitNotFound(tip.to_string()))?;
        let tree = commit.tree()?;

        for entry in tree.iter() {
            let key = entry
                .name()
                .ok_or_else(|| StoreError::Internal("non utf-8 tree entry name".to_string()))?
                .to_string();

            if entry.kind() != Some(ObjectType::Blob) {
                return Err(StoreError::UnexpectedEntryType {
                    key,
                    found: format!("{:?}", entry.kind()),
                });
            }

            let blob = repo.find_blob(entry.id())?;
            let value = std::str::from_utf8(blob.content())
                .map_err(|source| StoreError::InvalidUtf8 {
                    key: key.clone(),
                    source,
                })?
                .to_string();
            records.insert(key, value);
        }

        debug!(backend = %self.inner.name, tip = %tip.short(), count = records.len(), "loaded records");
        Ok(records)
    }

    fn apply(&mut self, changes: &ChangeSet, tx_id: &str) -> StoreResult<()> {
        let repo = self.inner.repo.write();
        let tip = tip_of(&repo)?;

        let base = match tip {
            Some(id) if !changes.is_cleared() => Some(repo.find_commit(id.raw())?.tree()?),
            _ => None,
        };

        let mut builder = repo.treebuilder(base.as_ref())?;
        for (key, change) in changes.iter() {
            match change {
                Change::Put(value) => {
                    validate_key(key)?;
                    let blob_id = repo.blob(value.as_bytes())?;
                    builder.insert(key, blob_id, FileMode::Blob.into())?;
                }
                Change::Remove => {
                    if builder.get(key)?.is_some() {
                        builder.remove(key)?;
                    }
                }
            }
        }
        let tree_id = builder.write()?;

        let message = if changes.is_cleared() && changes.put_count() == 0 {
            CommitMessage::clear()
        } else {
            CommitMessage::transaction(changes, tx_id)
        };

        let commit_id = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(tip)
            .message(message)
            .signature(self.inner.signature.read().clone())
            .update_ref(MAIN_REF)
            .commit()?;

        debug!(backend = %self.inner.name, commit = %commit_id.short(), tx = tx_id, "applied change set");
        Ok(())
    }
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("path", &self.inner.path)
            .finish()
    }
}
