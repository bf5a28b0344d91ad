//! The main entry point of the library, `DavHandler`.
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Buf;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::DavResult;
use crate::backend::{DataStream, DavBackend};
use crate::body::{Body, into_data_stream};
use crate::davheaders::ContentLocation;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::lockmgr::LockManager;
use crate::util::{DavMethod, DavMethodSet, dav_method, notfound};

// cap on bodies we interpret (XML requests). PUT streams and is not
// subject to it.
const MAX_XML_BODY: usize = 65536;

/// Configuration for a [`DavHandler`], built in builder style.
#[derive(Default)]
pub struct DavConfig {
    prefix: Option<String>,
    backend: Option<Box<dyn DavBackend>>,
    locks: Option<LockManager>,
    principal: Option<String>,
    allow: Option<DavMethodSet>,
    response_streaming: bool,
    request_streaming: bool,
}

impl DavConfig {
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Turn the configuration into a handler.
    pub fn build_handler(self) -> DavHandler {
        DavHandler {
            config: Arc::new(self),
        }
    }

    /// Prefix to be stripped off the request path before it reaches
    /// the backend.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The resource backend to serve.
    pub fn backend(mut self, backend: Box<dyn DavBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Install a lock table. This is what turns on LOCK/UNLOCK and
    /// the class 2 advertisement.
    pub fn locksystem(mut self, locks: LockManager) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Name recorded as the creator of new locks.
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Restrict the set of served methods (default: all).
    pub fn allow_methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Stream GET bodies chunk by chunk instead of buffering them.
    /// Streamed bodies are never gzip-compressed.
    pub fn response_streaming(mut self, on: bool) -> Self {
        self.response_streaming = on;
        self
    }

    /// Pass PUT bodies through to the backend as they arrive instead
    /// of buffering the request first.
    pub fn request_streaming(mut self, on: bool) -> Self {
        self.request_streaming = on;
        self
    }
}

/// The WebDAV handler. Cheap to clone; build one with
/// [`DavConfig::build_handler`] and call [`DavHandler::handle`] for
/// every request.
#[derive(Clone)]
pub struct DavHandler {
    config: Arc<DavConfig>,
}

// Per-request view of the configuration.
pub(crate) struct DavInner {
    pub prefix: String,
    pub backend: Box<dyn DavBackend>,
    pub locks: Option<LockManager>,
    pub principal: Option<String>,
    pub allow: Option<DavMethodSet>,
    pub stream_responses: bool,
    pub buffer_requests: bool,
}

impl From<&DavConfig> for DavInner {
    fn from(cfg: &DavConfig) -> Self {
        DavInner {
            prefix: cfg.prefix.clone().unwrap_or_default(),
            backend: cfg.backend.clone().expect("a backend is configured"),
            locks: cfg.locks.clone(),
            principal: cfg.principal.clone(),
            allow: cfg.allow,
            stream_responses: cfg.response_streaming,
            buffer_requests: !cfg.request_streaming,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Handle a WebDAV request.
    pub async fn handle<ReqBody>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: http_body::Body + Send + 'static,
        ReqBody::Data: Buf + Send,
        ReqBody::Error: std::error::Error + Send + Sync + 'static,
    {
        if self.config.backend.is_none() {
            return notfound();
        }
        let inner = DavInner::from(&*self.config);
        inner.handle(req).await
    }
}

impl DavInner {
    // helper: request path. The dispatcher validated it already.
    pub(crate) fn path(&self, req: &Request<()>) -> DavPath {
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix).unwrap()
    }

    // helper: does the parent collection of a path exist?
    pub(crate) async fn has_parent(&self, path: &DavPath) -> bool {
        let parent = path.parent();
        match self.backend.is_collection(&parent).await {
            Ok(is_coll) => is_coll,
            Err(_) => false,
        }
    }

    // The resource must exist; if it is a collection addressed without
    // the trailing slash, fix the path up and tell the client.
    pub(crate) async fn fixpath(
        &self,
        res: &mut Response<Body>,
        path: &mut DavPath,
    ) -> DavResult<()> {
        if !self.backend.exists(path).await? {
            return Err(crate::backend::BackendError::NotFound.into());
        }
        if self.backend.is_collection(path).await? && !path.is_collection() {
            path.add_slash();
            res.headers_mut()
                .typed_insert(ContentLocation(path.as_url_string_with_prefix()));
        }
        Ok(())
    }

    // read a request body we intend to parse.
    async fn read_request(&self, body: DataStream, max_size: usize) -> DavResult<Vec<u8>> {
        let mut data = Vec::new();
        let mut body = body;
        while let Some(res) = body.next().await {
            let chunk = res.map_err(DavError::IoError)?;
            if data.len() + chunk.len() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn handle<ReqBody>(self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: http_body::Body + Send + 'static,
        ReqBody::Data: Buf + Send,
        ReqBody::Error: std::error::Error + Send + Sync + 'static,
    {
        let (parts, body) = req.into_parts();
        let req = Request::from_parts(parts, ());
        let body: DataStream = into_data_stream(body).boxed();

        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        match self.handle2(&req, body).await {
            Ok(mut resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp.headers_mut()
                    .typed_insert(headers::Date::from(SystemTime::now()));
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder();
                if is_ms && err.statuscode() == StatusCode::NOT_FOUND {
                    // Windows caches 404s, case-insensitively, for up
                    // to a minute. Try hard to talk it out of that.
                    resp = resp
                        .header("cache-control", "no-store, no-cache, must-revalidate")
                        .header("pragma", "no-cache")
                        .header("expires", "0")
                        .header("vary", "*");
                }
                resp = resp
                    .header("content-length", "0")
                    .status(err.statuscode());
                if err.must_close() {
                    resp = resp.header("connection", "close");
                }
                let mut resp = resp.body(Body::empty()).unwrap();
                resp.headers_mut()
                    .typed_insert(headers::Date::from(SystemTime::now()));
                resp
            }
        }
    }

    async fn handle2(&self, req: &Request<()>, body: DataStream) -> DavResult<Response<Body>> {
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        if let Some(allow) = &self.allow {
            if !allow.contains(method) {
                debug!("method {} not allowed on {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        // these two exist only to be refused.
        if method == DavMethod::Post || method == DavMethod::Trace {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        // the request path must make sense before anything else runs.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        debug!("== START REQUEST {:?} {}", method, path);

        // PUT streams its body; the XML methods get a bounded buffer;
        // everybody else must not send one.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, MAX_XML_BODY).await?),
        };
        match method {
            DavMethod::Put
            | DavMethod::PropFind
            | DavMethod::PropPatch
            | DavMethod::Lock
            | DavMethod::Report => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        match method {
            DavMethod::Options => self.handle_options(req).await,
            DavMethod::PropFind => self.handle_propfind(req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(req, &body_data).await,
            DavMethod::Report => self.handle_report(req, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(req).await,
            DavMethod::Delete => self.handle_delete(req).await,
            DavMethod::Lock => self.handle_lock(req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(req).await,
            DavMethod::Put => self.handle_put(req, body_strm.unwrap()).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(req, method).await,
            DavMethod::Post | DavMethod::Trace => unreachable!(),
        }
    }
}
