//!  Commit creation and history traversal for the git backend.
//!
//!  every applied change set becomes one commit on `refs/heads/main`, so the
//!  repository history doubles as an audit log of pool transactions.

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Revwalk, Sort};

use crate::storage::change_set::ChangeSet;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{CommitId, GitSignature};

/// information about a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            timestamp,
        }
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<git2::Oid>,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
    update_ref: Option<String>,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::objpool(),
            update_ref: None,
        }
    }

    pub fn tree(mut self, tree_id: git2::Oid) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        if let Some(parent) = parent {
            self.parents.push(parent);
        }
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn update_ref(mut self, refname: impl Into<String>) -> Self {
        self.update_ref = Some(refname.into());
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> StoreResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StoreError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature.to_git2_signature()?;

        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<_, _>>()?;

        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            self.update_ref.as_deref(),
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;

        Ok(CommitId::new(oid))
    }
}

/// iterate over commit history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    pub fn new(repo: &'repo Repository, start: CommitId) -> StoreResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

        Ok(Self { repo, revwalk })
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = StoreResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(Ok(CommitInfo::from_git2(&commit))),
                Err(e) => Some(Err(StoreError::Git(e))),
            },
            Err(e) => Some(Err(StoreError::Git(e))),
        }
    }
}

/// message formatting for applied change sets
pub struct CommitMessage;

impl CommitMessage {
    /// format a message for a committed transaction
    pub fn transaction(changes: &ChangeSet, tx_id: &str) -> String {
        let mut message = format!(
            "[COMMIT] put {} remove {}",
            changes.put_count(),
            changes.remove_count()
        );
        if changes.is_cleared() {
            message.push_str(" (cleared)");
        }
        message.push_str(&format!(" tx:{}", tx_id));
        message
    }

    /// format a message for wiping the store
    pub fn clear() -> String {
        "[CLEAR] all records".to_string()
    }
}
