//! MKCOL.
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::davheaders::ContentLocation;
use crate::errors::DavError;

impl DavInner {
    // The dispatcher already rejected a request body with 415.
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut path = self.path(req);
        let exists = self.backend.exists(&path).await.unwrap_or(false);

        let tokens = if_match_get_tokens(
            req,
            &*self.backend,
            self.locks.as_ref(),
            &path,
            exists,
            None,
        )
        .await
        .map_err(DavError::Status)?;
        if let Some(locks) = &self.locks {
            if locks.check(&path, &tokens).is_err() {
                return Err(StatusCode::LOCKED.into());
            }
        }

        // RFC 4918 9.3.1: 405 when mapped, 409 when the parent is not
        // there. The backend error kinds carry exactly that.
        self.backend.mkcol(&path).await?;

        let mut res = Response::new(Body::empty());
        path.add_slash();
        res.headers_mut()
            .typed_insert(ContentLocation(path.as_url_string_with_prefix()));
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
