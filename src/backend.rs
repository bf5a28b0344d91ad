//! The resource backend contract consumed by the engine.
//!
//! A backend maps URIs to objects (things with a body) and collections
//! (things with children), stores dead properties, and reports the
//! handful of live property values that only it can know. Everything
//! else — locking, conditional requests, tree recursion, Multi-Status
//! synthesis — happens in the engine on top of this trait.
use std::fmt::Debug;
use std::io;

use bytes::Bytes;
use dyn_clone::DynClone;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use http::StatusCode;

use crate::davpath::DavPath;

/// Errors a backend (or the engine acting on its answers) can produce.
///
/// Each kind maps to exactly one HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    NotFound,
    Forbidden,
    /// Missing intermediate collection, or an otherwise conflicting state.
    Conflict,
    /// The target already exists (MKCOL on a mapped URI).
    Exists,
    PreconditionFailed,
    Locked,
    FailedDependency,
    UnsupportedMediaType,
    InsufficientStorage,
    BadRequest,
    RangeNotSatisfiable,
    /// The requester must not learn that this property exists. Raised
    /// during property retrieval it removes the property from the
    /// response instead of producing an error status.
    Secret,
    GeneralFailure,
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            BackendError::NotFound => StatusCode::NOT_FOUND,
            BackendError::Forbidden => StatusCode::FORBIDDEN,
            BackendError::Conflict => StatusCode::CONFLICT,
            BackendError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            BackendError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            BackendError::Locked => StatusCode::LOCKED,
            BackendError::FailedDependency => StatusCode::FAILED_DEPENDENCY,
            BackendError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            BackendError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            BackendError::BadRequest => StatusCode::BAD_REQUEST,
            BackendError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            BackendError::Secret => StatusCode::NOT_FOUND,
            BackendError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::error::Error for BackendError {}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<BackendError> for io::Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound => io::Error::new(io::ErrorKind::NotFound, "NotFound"),
            BackendError::Forbidden => {
                io::Error::new(io::ErrorKind::PermissionDenied, "Forbidden")
            }
            BackendError::Exists => io::Error::new(io::ErrorKind::AlreadyExists, "Exists"),
            e => io::Error::other(format!("{:?}", e)),
        }
    }
}

/// The future type every trait method returns.
pub type BackendFuture<'a, T> = BoxFuture<'a, BackendResult<T>>;

/// Body data, produced and consumed as a stream of chunks.
pub type DataStream = BoxStream<'static, io::Result<Bytes>>;

/// A byte range for `get_data`, both ends optional as in the `Range`
/// header ("start-", "-suffix", "start-end").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DavRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// A property name: `(namespace-URI, local name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub namespace: String,
    pub name: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == "DAV:"
    }
}

/// The trait a resource store implements to be served by [`DavHandler`].
///
/// All methods are contracts, not suggestions: the engine depends on the
/// documented failure kinds to pick response codes. Collection URIs end
/// in `/`, object URIs do not; paths arrive normalized and decoded.
///
/// Recursion is the engine's job. `copy_one` and `copy_collection` act
/// on a single resource (a collection copy creates the empty collection
/// and carries its dead properties, nothing more), and the delete
/// operations likewise remove exactly one node.
///
/// [`DavHandler`]: crate::DavHandler
pub trait DavBackend: Debug + DynClone + Send + Sync + 'static {
    /// Does a resource exist at this URI?
    fn exists<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, bool>;

    /// Is the resource a collection?
    fn is_collection<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, bool>;

    /// Direct children of a collection, as full paths with the
    /// collection-slash convention applied. Empty for objects.
    fn children<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, Vec<DavPath>>;

    /// Body bytes of an object, optionally a byte range of them.
    ///
    /// Fails `NotFound` for unmapped URIs and `RangeNotSatisfiable` for
    /// ranges outside the body.
    fn get_data<'a>(
        &'a self,
        uri: &'a DavPath,
        range: Option<DavRange>,
    ) -> BackendFuture<'a, DataStream>;

    /// Create or replace an object from a stream of body chunks.
    ///
    /// Fails `Conflict` when the parent collection is missing and
    /// `Forbidden` when the URI names a collection.
    fn put<'a>(
        &'a self,
        uri: &'a DavPath,
        data: DataStream,
        content_type: Option<String>,
    ) -> BackendFuture<'a, ()>;

    /// Create a collection. Fails `Exists` when the URI is mapped and
    /// `Conflict` when the parent is missing.
    fn mkcol<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()>;

    /// Remove a single object, and its dead properties with it.
    fn delete_one<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()>;

    /// Remove a single, already-emptied collection.
    fn delete_collection<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()>;

    /// Copy one object, dead properties included.
    fn copy_one<'a>(&'a self, src: &'a DavPath, dst: &'a DavPath) -> BackendFuture<'a, ()>;

    /// Depth-0 copy of a collection: create `dst` and carry the dead
    /// properties over. The engine walks the members itself.
    fn copy_collection<'a>(&'a self, src: &'a DavPath, dst: &'a DavPath) -> BackendFuture<'a, ()>;

    /// Value of a live property this backend owns (`creationdate`,
    /// `getlastmodified`, `getetag`, `getcontentlength`,
    /// `getcontenttype`, `displayname`, ...), already in wire format.
    ///
    /// `Secret` hides the property from property reports. `NotFound`
    /// means "not defined for this resource".
    fn get_live_prop<'a>(
        &'a self,
        uri: &'a DavPath,
        ns: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, String>;

    /// Stored dead property value, an opaque XML fragment.
    fn get_dead_prop<'a>(&'a self, uri: &'a DavPath, prop: &'a PropName)
    -> BackendFuture<'a, String>;

    /// Store a dead property. `DAV:` is reserved and must be rejected
    /// with `Forbidden`.
    fn set_dead_prop<'a>(
        &'a self,
        uri: &'a DavPath,
        prop: &'a PropName,
        xml: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Remove a dead property. Removing a property that is not there
    /// is not an error.
    fn del_dead_prop<'a>(&'a self, uri: &'a DavPath, prop: &'a PropName) -> BackendFuture<'a, ()>;

    /// Names of all dead properties on a resource.
    fn list_all_propnames<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, Vec<PropName>>;

    /// Base URI (scheme and authority) used when absolute hrefs are
    /// needed, e.g. in `lockroot`. May be empty, in which case hrefs
    /// stay path-only.
    fn base_uri(&self) -> String {
        String::new()
    }
}

dyn_clone::clone_trait_object!(DavBackend);
