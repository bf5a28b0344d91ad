//! DELETE, as a tree operation with per-member error reporting.
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::DavResult;
use crate::backend::BackendError;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::multierror::tree_response;
use crate::treewalk::{TreeErrors, delete_tree};
use crate::util::accepts_gzip;

impl DavInner {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // RFC 4918 9.6.1: DELETE on collections is always deep.
        match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => {}
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        }

        let mut path = self.path(req);

        // fragments have no place in a resource address.
        if path.as_bytes().contains(&b'#') {
            return Err(BackendError::NotFound.into());
        }

        if !self.backend.exists(&path).await? {
            return Err(BackendError::NotFound.into());
        }
        path.add_slash_if(self.backend.is_collection(&path).await?);

        let tokens =
            if_match_get_tokens(req, &*self.backend, self.locks.as_ref(), &path, true, None)
                .await
                .map_err(DavError::Status)?;

        // a conflicting lock cancels the whole operation with a plain
        // status, not a 207.
        if let Some(locks) = &self.locks {
            if let Err(lock) = locks.check(&path, &tokens) {
                debug!("delete: {} locked by {}", path, lock.token);
                return Err(StatusCode::LOCKED.into());
            }
        }

        let errs = delete_tree(&*self.backend, &path, &TreeErrors::new()).await?;
        if errs.is_empty() {
            // gone for good, locks included.
            if let Some(locks) = &self.locks {
                locks.delete_below(&path);
            }
        }
        tree_response(&path, &errs, StatusCode::NO_CONTENT, accepts_gzip(req))
    }
}
