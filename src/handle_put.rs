//! PUT: stream the request body into the backend.
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::DavResult;
use crate::backend::DataStream;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::errors::DavError;

impl DavInner {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        body: DataStream,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        if path.is_collection() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let exists = self.backend.exists(&path).await.unwrap_or(false);

        // check the conditional headers and the lock table. A locked
        // resource needs its token in If: before we accept content.
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
            if let Err(lock) = locks.check(&path, &tokens) {
                debug!("put: {} locked by {}", path, lock.token);
                return Err(StatusCode::LOCKED.into());
            }
        }

        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Expect: 100-continue is honoured by the HTTP layer the
        // moment we start polling the body.
        let body: DataStream = if self.buffer_requests {
            // compatibility path: read the whole body first.
            let mut body = body;
            let mut buf = Vec::new();
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk.map_err(DavError::IoError)?);
            }
            futures_util::stream::once(async move {
                Ok::<_, std::io::Error>(bytes::Bytes::from(buf))
            })
            .boxed()
        } else {
            body
        };

        self.backend.put(&path, body, content_type).await?;

        // 201 whether we created or replaced; backends that want to
        // distinguish can do so behind their own front-end.
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        let location = path.as_url_string_with_prefix();
        res.headers_mut().insert("location", location.parse().unwrap());
        if let Ok(etag) = self.backend.get_live_prop(&path, "DAV:", "getetag").await {
            if let Ok(etag) = crate::davheaders::ETag::new(false, etag) {
                res.headers_mut().typed_insert(etag);
            }
        }
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
