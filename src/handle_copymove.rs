//! COPY and MOVE.
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::DavResult;
use crate::backend::BackendError;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multierror::tree_response;
use crate::treewalk::{TreeErrors, copy_tree, delete_tree, move_tree};
use crate::util::{DavMethod, accepts_gzip};

impl DavInner {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let overwrite = req
            .headers()
            .typed_get::<Overwrite>()
            .map_or(true, |o| o.0);
        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => Depth::Infinity,
            Some(Depth::Zero) => Depth::Zero,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
        };

        let dest = req
            .headers()
            .typed_get::<Destination>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let mut dest = DavPath::from_str_and_prefix(&dest.0, &self.prefix)?;

        let mut path = self.path(req);
        if !self.backend.exists(&path).await? {
            return Err(BackendError::NotFound.into());
        }
        let src_is_coll = self.backend.is_collection(&path).await?;
        path.add_slash_if(src_is_coll);
        dest.add_slash_if(src_is_coll);

        if src_is_coll && method == DavMethod::Move && depth == Depth::Zero {
            // a collection moves whole or not at all.
            return Err(StatusCode::BAD_REQUEST.into());
        }

        // copying a tree into itself never ends well.
        if path == dest || path.is_ancestor_of(&dest) {
            return Err(StatusCode::FORBIDDEN.into());
        }

        // the destination's parent must be mapped.
        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let dest_exists = self.backend.exists(&dest).await.unwrap_or(false);
        if !overwrite && dest_exists {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        // conditional headers, evaluated against the source.
        let tokens =
            if_match_get_tokens(req, &*self.backend, self.locks.as_ref(), &path, true, None)
                .await
                .map_err(DavError::Status)?;

        // a conflicting lock cancels the entire operation, so this is
        // a plain status, not a 207.
        if let Some(locks) = &self.locks {
            if method == DavMethod::Move {
                if let Err(lock) = locks.check(&path, &tokens) {
                    debug!("move: source {} locked by {}", path, lock.token);
                    return Err(StatusCode::LOCKED.into());
                }
            }
            if let Err(lock) = locks.check(&dest, &tokens) {
                debug!("copymove: destination {} locked by {}", dest, lock.token);
                return Err(StatusCode::LOCKED.into());
            }
        }

        // clear the destination first, except for the depth-0 copy
        // onto a collection, which keeps existing members.
        let dest_is_coll = dest_exists && self.backend.is_collection(&dest).await.unwrap_or(false);
        if overwrite && dest_exists && !(depth == Depth::Zero && dest_is_coll) {
            debug!("copymove: deleting destination {}", dest);
            let mut del_dest = dest.clone();
            del_dest.add_slash_if(dest_is_coll);
            let errs = delete_tree(&*self.backend, &del_dest, &TreeErrors::new()).await?;
            if !errs.is_empty() {
                return tree_response(
                    &del_dest,
                    &errs,
                    StatusCode::NO_CONTENT,
                    accepts_gzip(req),
                );
            }
            if let Some(locks) = &self.locks {
                locks.delete_below(&del_dest);
            }
        }

        let errs = if depth == Depth::Zero {
            // single-resource action, no recursion.
            let mut errs = TreeErrors::new();
            let res = if src_is_coll {
                self.backend.copy_collection(&path, &dest).await
            } else {
                self.backend.copy_one(&path, &dest).await
            };
            match res {
                Err(e) => errs.0.push((path.clone(), e.statuscode())),
                Ok(()) if method == DavMethod::Move => {
                    if let Err(e) = self.backend.delete_one(&path).await {
                        errs.0.push((path.clone(), e.statuscode()));
                    }
                }
                Ok(()) => {}
            }
            errs
        } else if method == DavMethod::Copy {
            copy_tree(&*self.backend, &path, &dest).await?
        } else {
            move_tree(&*self.backend, &path, &dest).await?
        };

        if method == DavMethod::Move && errs.is_empty() {
            // the source is gone; its locks go with it.
            if let Some(locks) = &self.locks {
                locks.delete_below(&path);
            }
        }

        let success = if dest_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        tree_response(&path, &errs, success, accepts_gzip(req))
    }
}
