use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use http::{Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::errors::DavError;

// Bodies at or below the common MTU are not worth compressing.
pub(crate) const GZIP_THRESHOLD: usize = 1400;

/// HTTP methods handled by the engine.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u32)]
pub enum DavMethod {
    Head = 0x0001,
    Get = 0x0002,
    Put = 0x0004,
    Options = 0x0008,
    PropFind = 0x0010,
    PropPatch = 0x0020,
    MkCol = 0x0040,
    Copy = 0x0080,
    Move = 0x0100,
    Delete = 0x0200,
    Lock = 0x0400,
    Unlock = 0x0800,
    Report = 0x1000,
    Post = 0x2000,
    Trace = 0x4000,
}

// translate an http method into our own enum that has the webdav
// methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        http::Method::POST => DavMethod::Post,
        http::Method::TRACE => DavMethod::Trace,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            "REPORT" => DavMethod::Report,
            _ => return Err(DavError::UnknownDavMethod),
        },
    };
    Ok(m)
}

/// A set of [`DavMethod`]s, used to restrict the served surface.
#[derive(Clone, Copy, Debug)]
pub struct DavMethodSet(u32);

impl DavMethodSet {
    /// All methods.
    pub fn all() -> DavMethodSet {
        DavMethodSet(0xffffffff)
    }

    /// No methods.
    pub fn none() -> DavMethodSet {
        DavMethodSet(0)
    }

    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m as u32;
        self
    }

    pub fn remove(&mut self, m: DavMethod) -> &Self {
        self.0 &= !(m as u32);
        self
    }

    pub fn contains(&self, m: DavMethod) -> bool {
        self.0 & (m as u32) > 0
    }
}

/// RFC 1123 date string, as used in `Date`, `Last-Modified` and the
/// `getlastmodified` property. `Fri, 10 Nov 2000 16:21:09 GMT`.
pub fn rfc1123_date(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// ISO 8601 date string, as used in the `creationdate` property.
/// `2000-11-10T16:21:09Z`.
pub fn iso8601_date(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// SystemTime has sub-second precision, HTTP dates do not.
pub(crate) fn round_time(t: impl Into<SystemTime>) -> SystemTime {
    let t = t.into();
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + std::time::Duration::from_secs(d.as_secs()),
        Err(_) => t,
    }
}

// A buffer that implements "Write".
#[derive(Clone, Default)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Gzip a buffered body when the client accepts it and the payload is
/// above the threshold. Returns the bytes to send and whether they were
/// compressed. Lengths afterwards are byte counts of the encoded form.
pub(crate) fn maybe_gzip(data: Bytes, accept_gzip: bool) -> (Bytes, bool) {
    if !accept_gzip || data.len() <= GZIP_THRESHOLD {
        return (data, false);
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    if encoder.write_all(&data).is_err() {
        return (data, false);
    }
    match encoder.finish() {
        Ok(out) => (Bytes::from(out), true),
        Err(_) => (data, false),
    }
}

pub(crate) fn accepts_gzip(req: &http::Request<()>) -> bool {
    req.headers()
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|e| e.trim() == "gzip"))
        .unwrap_or(false)
}

/// Install a buffered XML document as the response body, applying gzip
/// when allowed and setting the content headers.
pub(crate) fn set_xml_body(
    res: &mut Response<Body>,
    status: StatusCode,
    xml: Bytes,
    accept_gzip: bool,
) {
    let (data, gzipped) = maybe_gzip(xml, accept_gzip);
    let headers = res.headers_mut();
    headers.insert(
        "content-type",
        "application/xml; charset=utf-8".parse().unwrap(),
    );
    headers.insert("content-length", data.len().into());
    if gzipped {
        headers.insert("content-encoding", "gzip".parse().unwrap());
    }
    *res.status_mut() = status;
    *res.body_mut() = Body::from(data);
}

pub(crate) fn notfound() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("content-length", "0")
        .body(Body::empty())
        .unwrap()
}
