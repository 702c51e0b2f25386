use git2::{
    Branch, IndexAddOption, IndexMatchedPath, ObjectType, Oid, Repository, Signature, StatusOptions,
    TreeWalkMode, TreeWalkResult, build::CheckoutBuilder,
};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::errors::WorkflowError;
use crate::init::REMEDY_DIR;
use crate::phase::Phase;

// Paths that usually hold credentials when committed.
static SECRET_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(^|/)(\.env(\.[A-Za-z0-9_-]+)?|id_(rsa|dsa|ecdsa|ed25519)|[^/]+\.(pem|p12|pfx|key)|credentials\.json)$",
    )
    .unwrap()
});

const SECRET_PATH_ALLOWLIST: [&str; 3] = [".env.example", ".env.sample", ".env.template"];

fn is_secret_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    SECRET_PATH_REGEX.is_match(path) && !SECRET_PATH_ALLOWLIST.contains(&file_name)
}

fn is_workflow_path(path: &Path) -> bool {
    path.starts_with(REMEDY_DIR)
}

/// A blob in reachable history that fails the hygiene check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFinding {
    pub path: String,
    pub commit: String,
    pub reason: String,
}

/// Structured commit message for a task commit.
pub fn task_commit_message(category: &str, description: &str, phase: Phase, task_id: &str) -> String {
    format!(
        "[workflow] {}: {}\n\nPhase: {}\nTask: {}\n",
        category, description, phase, task_id
    )
}

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn open(project_dir: &Path) -> Result<Self, WorkflowError> {
        let repo = Repository::open(project_dir)?;
        Ok(Self { repo })
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    fn signature(&self) -> Result<Signature<'static>, WorkflowError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("remedy", "remedy@localhost")?),
        }
    }

    /// Modified, deleted and untracked paths outside `.remedy/`.
    pub fn dirty_paths(&self) -> Result<Vec<String>, WorkflowError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        Ok(statuses
            .iter()
            .filter(|entry| !entry.status().is_ignored())
            .filter_map(|entry| entry.path().map(str::to_string))
            .filter(|path| !is_workflow_path(Path::new(path)))
            .collect())
    }

    /// Stage every change outside `.remedy/` and commit it.
    ///
    /// Returns `None` when the staged tree equals HEAD (nothing to commit).
    pub fn commit_task(
        &self,
        category: &str,
        description: &str,
        phase: Phase,
        task_id: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let mut index = self.repo.index()?;
        let mut skip_workflow = |path: &Path, _matched: &[u8]| -> i32 {
            if is_workflow_path(path) { 1 } else { 0 }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(&mut skip_workflow as &mut IndexMatchedPath),
        )?;
        index.update_all(["*"].iter(), Some(&mut skip_workflow as &mut IndexMatchedPath))?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.head_commit();

        match &parent {
            Some(parent) if parent.tree_id() == tree_id => return Ok(None),
            None if index.is_empty() => return Ok(None),
            _ => {}
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let message = task_commit_message(category, description, phase, task_id);
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;

        tracing::info!(sha = %commit_id, task = task_id, "Committed task changes");
        Ok(Some(commit_id.to_string()))
    }

    /// Throw away uncommitted changes outside `.remedy/`, including new files.
    pub fn discard_changes(&self) -> Result<(), WorkflowError> {
        let Some(workdir) = self.repo.workdir().map(Path::to_path_buf) else {
            return Ok(());
        };
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        for entry in statuses.iter().filter(|e| e.status().is_wt_new()) {
            let Some(path) = entry.path() else { continue };
            if is_workflow_path(Path::new(path)) {
                continue;
            }
            let full = workdir.join(path);
            fs::remove_file(&full).map_err(|e| WorkflowError::io(&full, e))?;
        }

        if self.head_commit().is_some() {
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            self.repo.checkout_head(Some(&mut checkout))?;
        }
        Ok(())
    }

    /// Undo `sha` with a new commit on HEAD and make the working tree match.
    ///
    /// Refuses to touch commits that are already on the upstream branch.
    pub fn revert_commit(&self, sha: &str, description: &str) -> Result<String, WorkflowError> {
        let oid = Oid::from_str(sha)?;
        if self.is_pushed(oid)? {
            return Err(WorkflowError::ToolFailure {
                tool: "git".to_string(),
                message: format!(
                    "commit {} is already pushed upstream; revert it manually",
                    short(sha)
                ),
            });
        }

        let target = self.repo.find_commit(oid)?;
        let head = self.head_commit().ok_or_else(|| WorkflowError::ToolFailure {
            tool: "git".to_string(),
            message: "cannot revert on an unborn branch".to_string(),
        })?;

        let mut reverted = self.repo.revert_commit(&target, &head, 0, None)?;
        if reverted.has_conflicts() {
            return Err(WorkflowError::ToolFailure {
                tool: "git".to_string(),
                message: format!("reverting {} produced conflicts", short(sha)),
            });
        }
        let tree_id = reverted.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_id)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;
        let mut index = self.repo.index()?;
        index.read_tree(&tree)?;
        index.write()?;

        let sig = self.signature()?;
        let message = format!(
            "[workflow] revert: {}\n\nThis reverts commit {}.\n",
            description, sha
        );
        let revert_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&head])?;

        tracing::warn!(reverted = %short(sha), revert = %revert_id, "Reverted task commit");
        Ok(revert_id.to_string())
    }

    /// Whether `oid` is reachable from the current branch's upstream.
    pub fn is_pushed(&self, oid: Oid) -> Result<bool, WorkflowError> {
        let Ok(head) = self.repo.head() else {
            return Ok(false);
        };
        if !head.is_branch() {
            return Ok(false);
        }
        let Ok(upstream) = Branch::wrap(head).upstream() else {
            return Ok(false);
        };
        let Some(upstream_oid) = upstream.get().target() else {
            return Ok(false);
        };
        Ok(upstream_oid == oid || self.repo.graph_descendant_of(upstream_oid, oid)?)
    }

    /// Secret-like or oversized blobs anywhere in history reachable from HEAD.
    pub fn history_findings(&self, max_blob_bytes: u64) -> Result<Vec<HistoryFinding>, WorkflowError> {
        let mut walk = self.repo.revwalk()?;
        if walk.push_head().is_err() {
            return Ok(Vec::new());
        }
        let odb = self.repo.odb()?;
        let mut seen: HashSet<(Oid, String)> = HashSet::new();
        let mut findings = Vec::new();

        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let commit_sha = commit.id().to_string();
            commit.tree()?.walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return TreeWalkResult::Ok;
                }
                let path = format!("{}{}", root, entry.name().unwrap_or_default());
                if !seen.insert((entry.id(), path.clone())) {
                    return TreeWalkResult::Ok;
                }
                let reason = if is_secret_path(&path) {
                    Some("secret-like path".to_string())
                } else {
                    match odb.read_header(entry.id()) {
                        Ok((size, _)) if size as u64 > max_blob_bytes => {
                            Some(format!("{} bytes exceeds {}", size, max_blob_bytes))
                        }
                        _ => None,
                    }
                };
                if let Some(reason) = reason {
                    findings.push(HistoryFinding {
                        path,
                        commit: commit_sha.clone(),
                        reason,
                    });
                }
                TreeWalkResult::Ok
            })?;
        }

        Ok(findings)
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::open(dir.path()).unwrap();
        (tracker, dir)
    }

    fn commit_file(dir: &std::path::Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        let file_path = dir.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&file_path, content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    fn head_message(dir: &std::path::Path) -> String {
        let repo = Repository::open(dir).unwrap();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        commit.message().unwrap().to_string()
    }

    #[test]
    fn test_head_sha_unborn_then_populated() {
        let (tracker, dir) = setup_repo();
        assert!(tracker.head_sha().is_none());
        commit_file(dir.path(), "a.txt", "hello", "init");
        let sha = tracker.head_sha();
        assert!(sha.is_some());
        assert_eq!(sha.unwrap().len(), 40);
    }

    #[test]
    fn test_commit_task_uses_structured_message() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "readme.txt", "hello", "init");
        fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();

        let sha = tracker
            .commit_task("structure", "Create layout", Phase::Structure, "structure-layout")
            .unwrap()
            .unwrap();

        assert_eq!(Some(sha), tracker.head_sha());
        let message = head_message(dir.path());
        assert!(message.starts_with("[workflow] structure: Create layout"));
        assert!(message.contains("Phase: Structure"));
        assert!(message.contains("Task: structure-layout"));
        assert!(tracker.dirty_paths().unwrap().is_empty());
    }

    #[test]
    fn test_commit_task_without_changes_returns_none() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "readme.txt", "hello", "init");
        let before = tracker.head_sha();
        let result = tracker
            .commit_task("test", "Measure", Phase::Testing, "testing-measure")
            .unwrap();
        assert!(result.is_none());
        assert_eq!(tracker.head_sha(), before);
    }

    #[test]
    fn test_commit_task_stages_deletions() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "old.txt", "bye", "init");
        fs::remove_file(dir.path().join("old.txt")).unwrap();

        tracker
            .commit_task("chore", "Remove old file", Phase::Structure, "cleanup")
            .unwrap()
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("old.txt").is_none());
    }

    #[test]
    fn test_workflow_directory_is_never_staged() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "readme.txt", "hello", "init");
        fs::create_dir_all(dir.path().join(".remedy/checkpoints")).unwrap();
        fs::write(dir.path().join(".remedy/state.json"), "{}").unwrap();
        fs::write(dir.path().join(".remedy/checkpoints/testing.json"), "{}").unwrap();

        assert!(tracker.dirty_paths().unwrap().is_empty());
        let result = tracker
            .commit_task("test", "Nothing", Phase::Testing, "noop")
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_dirty_paths_lists_user_changes() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one", "init");
        fs::write(dir.path().join("a.txt"), "two").unwrap();
        fs::write(dir.path().join("b.txt"), "new").unwrap();

        let mut dirty = tracker.dirty_paths().unwrap();
        dirty.sort();
        assert_eq!(dirty, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_discard_changes_restores_head_and_keeps_workflow_files() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one", "init");
        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        fs::create_dir_all(dir.path().join("new")).unwrap();
        fs::write(dir.path().join("new/b.txt"), "new").unwrap();
        fs::create_dir_all(dir.path().join(".remedy")).unwrap();
        fs::write(dir.path().join(".remedy/state.json"), "{}").unwrap();

        tracker.discard_changes().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one");
        assert!(!dir.path().join("new/b.txt").exists());
        assert!(dir.path().join(".remedy/state.json").exists());
        assert!(tracker.dirty_paths().unwrap().is_empty());
    }

    #[test]
    fn test_revert_restores_working_tree() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "main.rs", "fn main() {}\n", "init");
        fs::write(dir.path().join("main.rs"), "fn main() { broken\n").unwrap();
        fs::write(dir.path().join("extra.rs"), "pub fn x() {}\n").unwrap();
        let sha = tracker
            .commit_task("refactor", "Break things", Phase::Quality, "quality-break")
            .unwrap()
            .unwrap();

        let revert = tracker.revert_commit(&sha, "Break things").unwrap();

        assert_eq!(Some(revert), tracker.head_sha());
        assert_eq!(
            fs::read_to_string(dir.path().join("main.rs")).unwrap(),
            "fn main() {}\n"
        );
        assert!(!dir.path().join("extra.rs").exists());
        assert!(tracker.dirty_paths().unwrap().is_empty());
        assert!(head_message(dir.path()).starts_with("[workflow] revert: Break things"));

        // History is preserved: the reverted commit is still an ancestor.
        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_id(0).unwrap().to_string(), sha);
    }

    #[test]
    fn test_pushed_commit_is_never_reverted() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one", "init");
        commit_file(dir.path(), "a.txt", "two", "second");
        let sha = tracker.head_sha().unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        repo.remote("origin", "https://example.invalid/repo.git").unwrap();
        let branch_name = repo.head().unwrap().shorthand().unwrap().to_string();
        let oid = Oid::from_str(&sha).unwrap();
        repo.reference(
            &format!("refs/remotes/origin/{branch_name}"),
            oid,
            true,
            "test upstream",
        )
        .unwrap();
        let mut branch = repo
            .find_branch(&branch_name, git2::BranchType::Local)
            .unwrap();
        branch
            .set_upstream(Some(&format!("origin/{branch_name}")))
            .unwrap();

        assert!(tracker.is_pushed(oid).unwrap());
        let err = tracker.revert_commit(&sha, "second").unwrap_err();
        assert!(matches!(err, WorkflowError::ToolFailure { .. }));
        assert_eq!(tracker.head_sha(), Some(sha));
    }

    #[test]
    fn test_local_commit_is_not_pushed() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), "a.txt", "one", "init");
        let oid = Oid::from_str(&tracker.head_sha().unwrap()).unwrap();
        assert!(!tracker.is_pushed(oid).unwrap());
    }

    #[test]
    fn test_history_findings_include_deleted_secrets_and_large_blobs() {
        let (tracker, dir) = setup_repo();
        commit_file(dir.path(), ".env", "TOKEN=abc", "oops");
        fs::remove_file(dir.path().join(".env")).unwrap();
        commit_file(dir.path(), "assets/big.bin", &"x".repeat(64), "big");
        commit_file(dir.path(), ".env.example", "TOKEN=", "example");

        let findings = tracker.history_findings(32).unwrap();

        let paths: Vec<&str> = findings.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&".env"));
        assert!(paths.contains(&"assets/big.bin"));
        assert!(!paths.contains(&".env.example"));
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_history_findings_empty_for_unborn_repo() {
        let (tracker, _dir) = setup_repo();
        assert!(tracker.history_findings(1024).unwrap().is_empty());
    }

    #[test]
    fn test_secret_path_patterns() {
        assert!(is_secret_path(".env"));
        assert!(is_secret_path("config/.env.production"));
        assert!(is_secret_path("home/.ssh/id_rsa"));
        assert!(is_secret_path("certs/server.pem"));
        assert!(!is_secret_path("src/environment.rs"));
        assert!(!is_secret_path(".env.example"));
    }
}
