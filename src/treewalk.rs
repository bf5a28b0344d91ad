//! Subtree operations for COPY, MOVE and DELETE.
//!
//! The engine owns the recursion: backends only ever see single-node
//! operations. A subtree is first flattened to a list (parents before
//! children), then the walkers iterate it forward (copy) or in reverse
//! (delete), skipping entries whose fate was already sealed by an
//! earlier failure, and collecting per-URI error statuses for the
//! Multi-Status report.
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::StatusCode;
use log::debug;

use crate::DavResult;
use crate::backend::DavBackend;
use crate::davpath::DavPath;

/// Per-URI failures collected during a tree walk, in walk order.
#[derive(Debug, Default)]
pub(crate) struct TreeErrors(pub Vec<(DavPath, StatusCode)>);

impl TreeErrors {
    pub fn new() -> TreeErrors {
        TreeErrors::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, uri: DavPath, status: StatusCode) {
        self.0.push((uri, status));
    }

    // an already-failed entry at or below `uri`?
    fn has_descendant_of(&self, uri: &DavPath) -> bool {
        self.0.iter().any(|(e, _)| uri.is_ancestor_of(e))
    }

    // an already-failed entry at or above `uri`?
    fn seals(&self, uri: &DavPath) -> bool {
        self.0.iter().any(|(e, _)| e == uri || e.is_ancestor_of(uri))
    }

    pub fn merge(&mut self, other: TreeErrors) {
        self.0.extend(other.0);
    }
}

/// Pre-order flattening of the subtree at `uri`: the resource itself,
/// then recursively each child. Objects are leaves.
pub(crate) fn flatten<'a>(
    backend: &'a dyn DavBackend,
    uri: &'a DavPath,
) -> BoxFuture<'a, DavResult<Vec<DavPath>>> {
    async move {
        let mut list = vec![uri.clone()];
        if uri.is_collection() {
            for child in backend.children(uri).await? {
                list.extend(flatten(backend, &child).await?);
            }
        }
        Ok(list)
    }
    .boxed()
}

/// Delete a subtree, children before parents.
///
/// An entry is skipped when a descendant of it already failed (it
/// cannot be empty, and reporting it would only repeat the cause), or
/// when it lies at or below an `exclude` entry (used by MOVE so that a
/// source whose copy failed survives).
pub(crate) async fn delete_tree(
    backend: &dyn DavBackend,
    root: &DavPath,
    exclude: &TreeErrors,
) -> DavResult<TreeErrors> {
    let list = flatten(backend, root).await?;
    let mut errs = TreeErrors::new();

    for uri in list.iter().rev() {
        if errs.has_descendant_of(uri) || exclude.seals(uri) {
            continue;
        }
        let res = if uri.is_collection() {
            backend.delete_collection(uri).await
        } else {
            backend.delete_one(uri).await
        };
        if let Err(e) = res {
            debug!("delete_tree: {} failed: {:?}", uri, e);
            errs.push(uri.clone(), e.statuscode());
        }
    }
    Ok(errs)
}

/// Copy a subtree, parents before children. Members below a failed
/// ancestor are skipped without adding errors of their own.
pub(crate) async fn copy_tree(
    backend: &dyn DavBackend,
    src: &DavPath,
    dst: &DavPath,
) -> DavResult<TreeErrors> {
    let list = flatten(backend, src).await?;
    let mut errs = TreeErrors::new();

    for uri in &list {
        if errs.seals(uri) {
            continue;
        }
        let target = uri.rebase(src, dst);
        let res = if uri.is_collection() {
            backend.copy_collection(uri, &target).await
        } else {
            backend.copy_one(uri, &target).await
        };
        if let Err(e) = res {
            debug!("copy_tree: {} -> {} failed: {:?}", uri, target, e);
            errs.push(uri.clone(), e.statuscode());
        }
    }
    Ok(errs)
}

/// Move a subtree: copy it, then delete the source, excluding
/// everything whose copy failed.
pub(crate) async fn move_tree(
    backend: &dyn DavBackend,
    src: &DavPath,
    dst: &DavPath,
) -> DavResult<TreeErrors> {
    let mut errs = copy_tree(backend, src, dst).await?;
    let delete_errs = delete_tree(backend, src, &errs).await?;
    errs.merge(delete_errs);
    Ok(errs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membackend::MemBackend;

    fn path(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    async fn fixture() -> Box<MemBackend> {
        let be = MemBackend::new();
        be.add_collection("/d/").await;
        be.add_collection("/d/sub/").await;
        be.add_object("/d/a.txt", b"aaa").await;
        be.add_object("/d/sub/b.txt", b"bbb").await;
        be
    }

    #[tokio::test]
    async fn flatten_is_preorder() {
        let be = fixture().await;
        let list = flatten(&*be, &path("/d/")).await.unwrap();
        let strs: Vec<String> = list.iter().map(|p| p.as_url_string()).collect();
        assert_eq!(strs[0], "/d/");
        // parents always precede their members.
        let pos = |s: &str| strs.iter().position(|x| x == s).unwrap();
        assert!(pos("/d/") < pos("/d/a.txt"));
        assert!(pos("/d/sub/") < pos("/d/sub/b.txt"));
        assert_eq!(strs.len(), 4);
    }

    #[tokio::test]
    async fn delete_whole_tree() {
        let be = fixture().await;
        let errs = delete_tree(&*be, &path("/d/"), &TreeErrors::new())
            .await
            .unwrap();
        assert!(errs.is_empty());
        use crate::backend::DavBackend;
        assert!(!be.exists(&path("/d/")).await.unwrap());
    }

    #[tokio::test]
    async fn copy_then_source_intact() {
        let be = fixture().await;
        let errs = copy_tree(&*be, &path("/d/"), &path("/e/")).await.unwrap();
        assert!(errs.is_empty());
        use crate::backend::DavBackend;
        assert!(be.exists(&path("/e/sub/b.txt")).await.unwrap());
        assert!(be.exists(&path("/d/a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn move_transfers_subtree() {
        let be = fixture().await;
        let errs = move_tree(&*be, &path("/d/"), &path("/e/")).await.unwrap();
        assert!(errs.is_empty());
        use crate::backend::DavBackend;
        assert!(!be.exists(&path("/d/")).await.unwrap());
        assert!(be.exists(&path("/e/a.txt")).await.unwrap());
    }
}
