use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use gix::bstr::ByteSlice;
use tracing::{debug, info, warn};

use crate::config::HistorySection;
use crate::error::{AtlasError, ExtractError};
use crate::types::{CoChange, FileChurn};

/// Co-change counts mined from commit history.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct History {
    pub co_changes: Vec<CoChange>,
    pub churn: Vec<FileChurn>,
    pub commits_scanned: u32,
}

fn git_err(e: impl std::fmt::Display) -> AtlasError {
    AtlasError::Extract(ExtractError::Git(e.to_string()))
}

/// Walk history from HEAD and count, for every pair of `known` files, the
/// commits that touched both. Returns `None` when `root` is not inside a git
/// work tree or the repository has no commits.
///
/// `root` may be a subdirectory of the work tree. `known` and the returned
/// paths are relative to `root`; changes outside it are ignored.
pub fn mine_co_change(
    root: &Path,
    config: &HistorySection,
    known: &HashSet<String>,
) -> crate::error::Result<Option<History>> {
    let repo = match gix::discover(root) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "No git repository, skipping history");
            return Ok(None);
        }
    };
    let Some(prefix) = root_prefix(&repo, root) else {
        debug!(root = %root.display(), "Root is not inside the work tree, skipping history");
        return Ok(None);
    };
    let head = match repo.head_commit() {
        Ok(head) => head,
        Err(e) => {
            debug!(error = %e, "Repository has no HEAD commit, skipping history");
            return Ok(None);
        }
    };

    let max_commits = if config.max_commits == 0 {
        u32::MAX
    } else {
        config.max_commits
    };

    let mut pairs: BTreeMap<(String, String), u32> = BTreeMap::new();
    let mut churn: BTreeMap<String, u32> = BTreeMap::new();
    let mut commits_scanned = 0_u32;

    let walk = head.ancestors().all().map_err(git_err)?;
    for info in walk {
        if commits_scanned >= max_commits {
            break;
        }
        let info = match info {
            Ok(i) => i,
            Err(e) => {
                warn!("Error walking commit: {e}");
                continue;
            }
        };
        commits_scanned += 1;

        let commit = repo.find_commit(info.id).map_err(git_err)?;
        let changed = changed_paths(&repo, &commit)?;
        if changed.len() > config.max_files_per_commit {
            debug!(commit = %info.id, files = changed.len(), "Skipping bulk commit");
            continue;
        }

        let touched: Vec<String> = changed
            .into_iter()
            .filter_map(|p| relative_to_root(&prefix, p))
            .filter(|p| known.contains(p))
            .collect();
        for path in &touched {
            *churn.entry(path.clone()).or_default() += 1;
        }
        for (i, a) in touched.iter().enumerate() {
            for b in &touched[i + 1..] {
                *pairs.entry((a.clone(), b.clone())).or_default() += 1;
            }
        }
    }

    info!(
        commits = commits_scanned,
        pairs = pairs.len(),
        "Co-change mining complete"
    );

    Ok(Some(History {
        co_changes: pairs
            .into_iter()
            .map(|((file_a, file_b), count)| CoChange {
                file_a,
                file_b,
                count,
            })
            .collect(),
        churn: churn
            .into_iter()
            .map(|(path, commits)| FileChurn { path, commits })
            .collect(),
        commits_scanned,
    }))
}

/// `root` relative to the work tree, `/`-separated. Empty when `root` is the
/// work tree itself.
fn root_prefix(repo: &gix::Repository, root: &Path) -> Option<String> {
    let workdir = repo.workdir()?.canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    let rel = root.strip_prefix(&workdir).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn relative_to_root(prefix: &str, path: String) -> Option<String> {
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)?
        .strip_prefix('/')
        .map(str::to_string)
}

/// Paths a commit changed relative to its first parent, sorted and deduplicated.
fn changed_paths(
    repo: &gix::Repository,
    commit: &gix::Commit<'_>,
) -> crate::error::Result<BTreeSet<String>> {
    let tree = commit.tree().map_err(git_err)?;
    let parent_tree = commit
        .parent_ids()
        .next()
        .and_then(|parent_id| parent_id.object().ok()?.try_into_commit().ok()?.tree().ok());

    let base = match parent_tree {
        Some(ref parent) => parent,
        None => &repo.empty_tree(),
    };

    let mut paths = BTreeSet::new();
    let mut platform = base.changes().map_err(git_err)?;
    platform
        .for_each_to_obtain_tree(&tree, |change| {
            use gix::object::tree::diff::Change;
            let (location, entry_mode) = match change {
                Change::Addition {
                    location,
                    entry_mode,
                    ..
                }
                | Change::Deletion {
                    location,
                    entry_mode,
                    ..
                }
                | Change::Modification {
                    location,
                    entry_mode,
                    ..
                }
                | Change::Rewrite {
                    location,
                    entry_mode,
                    ..
                } => (location, entry_mode),
            };
            if !entry_mode.is_tree() {
                paths.insert(location.to_path_lossy().to_string_lossy().replace('\\', "/"));
            }
            Ok::<_, std::convert::Infallible>(std::ops::ControlFlow::Continue(()))
        })
        .map_err(|e| git_err(format!("diff error: {e}")))?;
    Ok(paths)
}
