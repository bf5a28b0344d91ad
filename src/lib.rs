//! A WebDAV protocol engine (RFC 4918, class 1 and 2).
//!
//! This crate implements the server side of WebDAV as a library: the
//! method dispatcher, the XML request/response codec, conditional
//! request evaluation, a lock table, the property engine and the tree
//! walkers behind COPY/MOVE/DELETE. It does **not** speak TCP; you run
//! it behind any HTTP/1.1 front-end that can hand over an
//! `http::Request` and send back an `http::Response`.
//!
//! Resources come from a [`DavBackend`] implementation. The crate
//! ships one, [`MemBackend`], an in-memory tree that is handy for
//! tests and zero-setup servers; real deployments implement the trait
//! over their own storage.
//!
//! ```
//! use dav_engine::{DavHandler, LockManager, MemBackend};
//!
//! let handler = DavHandler::builder()
//!     .backend(MemBackend::new())
//!     .locksystem(LockManager::new())
//!     .build_handler();
//! // pass `http::Request`s to `handler.handle(req).await`.
//! ```
//!
//! [`DavBackend`]: crate::backend::DavBackend
//! [`MemBackend`]: crate::membackend::MemBackend

pub mod backend;
pub mod body;
pub mod davpath;
pub mod lockmgr;
pub mod membackend;

mod conditional;
mod davhandler;
pub mod davheaders;
mod errors;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod multierror;
mod treewalk;
mod util;
mod xmltree_ext;

pub use crate::backend::{BackendError, DavBackend};
pub use crate::body::Body;
pub use crate::davhandler::{DavConfig, DavHandler};
pub use crate::davpath::DavPath;
pub use crate::lockmgr::{DavLock, LockManager, LockScope};
pub use crate::membackend::MemBackend;
pub use crate::util::{DavMethod, DavMethodSet, iso8601_date, rfc1123_date};

pub(crate) use crate::errors::DavError;

pub(crate) type DavResult<T> = Result<T, DavError>;
