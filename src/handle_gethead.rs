//! GET and HEAD, for objects and for the HTML index of a collection.
use std::ops::Bound;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::debug;

use crate::DavResult;
use crate::backend::{BackendError, DavRange};
use crate::body::Body;
use crate::conditional::http_if_match;
use crate::davheaders::ETag;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::davhandler::DavInner;
use crate::util::{accepts_gzip, maybe_gzip};

fn parse_httpdate(s: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.into())
}

impl DavInner {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let head = req.method() == http::Method::HEAD;
        let path = self.path(req);

        if !self.backend.exists(&path).await? {
            return Err(BackendError::NotFound.into());
        }
        if self.backend.is_collection(&path).await? {
            return self.handle_dirlist(req, path, head).await;
        }

        // live properties drive the entity headers.
        let etag_value = self
            .backend
            .get_live_prop(&path, "DAV:", "getetag")
            .await
            .ok();
        let lastmod = self
            .backend
            .get_live_prop(&path, "DAV:", "getlastmodified")
            .await
            .ok();
        let ctype = self
            .backend
            .get_live_prop(&path, "DAV:", "getcontenttype")
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        let len: u64 = self
            .backend
            .get_live_prop(&path, "DAV:", "getcontentlength")
            .await
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let etag = etag_value.and_then(|t| ETag::new(false, t).ok());
        let modified = lastmod.as_deref().and_then(parse_httpdate);

        // read path: no lock check, only the conditional headers.
        if let Some(sc) = http_if_match(req, true, etag.as_ref(), modified) {
            if sc == StatusCode::NOT_MODIFIED {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = sc;
                if let Some(etag) = &etag {
                    res.headers_mut().typed_insert(etag.clone());
                }
                return Ok(res);
            }
            return Err(sc.into());
        }

        // a single byte range is honoured, anything fancier is served
        // whole.
        let mut status = StatusCode::OK;
        let mut range = None;
        let mut count = len;
        let mut content_range = None;
        if let Some(r) = req.headers().typed_get::<headers::Range>() {
            let ranges: Vec<_> = r.satisfiable_ranges(len).collect();
            if ranges.is_empty() {
                return Err(StatusCode::RANGE_NOT_SATISFIABLE.into());
            }
            if ranges.len() == 1 {
                let (start, end) = resolve_bounds(ranges[0], len)
                    .ok_or(DavError::Status(StatusCode::RANGE_NOT_SATISFIABLE))?;
                status = StatusCode::PARTIAL_CONTENT;
                count = end - start + 1;
                content_range = Some(format!("bytes {}-{}/{}", start, end, len));
                range = Some(DavRange {
                    start: Some(start),
                    end: Some(end),
                });
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        let headers = res.headers_mut();
        if let Some(lastmod) = &lastmod {
            if let Ok(v) = lastmod.parse() {
                headers.insert("last-modified", v);
            }
        }
        if let Some(etag) = &etag {
            headers.typed_insert(etag.clone());
        }
        // the stored content type came from a client once; do not let
        // a weird one poison the response.
        if let Ok(ctype) = ctype.parse() {
            headers.insert("content-type", ctype);
        }
        headers.typed_insert(headers::AcceptRanges::bytes());
        if let Some(cr) = content_range {
            headers.insert("content-range", cr.parse().unwrap());
        }

        if head {
            headers.typed_insert(headers::ContentLength(count));
            return Ok(res);
        }

        let mut data = self.backend.get_data(&path, range).await?;

        if self.stream_responses {
            // iterate straight through; the backend chunks the body.
            res.headers_mut().typed_insert(headers::ContentLength(count));
            *res.body_mut() = Body::from(data);
            return Ok(res);
        }

        // buffered path, the one that can compress.
        let mut buf = Vec::with_capacity(count as usize);
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let accept_gzip = status == StatusCode::OK && accepts_gzip(req);
        let (body, gzipped) = maybe_gzip(Bytes::from(buf), accept_gzip);
        debug!("get: sending {} bytes, gzip {}", body.len(), gzipped);
        res.headers_mut()
            .typed_insert(headers::ContentLength(body.len() as u64));
        if gzipped {
            res.headers_mut()
                .insert("content-encoding", "gzip".parse().unwrap());
        }
        *res.body_mut() = Body::from(body);
        Ok(res)
    }

    // GET on a collection renders a simple index.
    async fn handle_dirlist(
        &self,
        req: &Request<()>,
        path: DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // a collection without the trailing slash gets a redirect;
        // whoever asks for an index is usually a browser.
        if !path.is_collection() {
            let mut path = path;
            path.add_slash();
            res.headers_mut().insert(
                "location",
                path.as_url_string_with_prefix().parse().unwrap(),
            );
            res.headers_mut().typed_insert(headers::ContentLength(0));
            *res.status_mut() = StatusCode::FOUND;
            return Ok(res);
        }

        res.headers_mut()
            .insert("content-type", "text/html; charset=utf-8".parse().unwrap());
        *res.status_mut() = StatusCode::OK;
        if head {
            return Ok(res);
        }

        struct Dirent {
            href: String,
            name: String,
            modified: String,
            size: String,
            is_dir: bool,
        }

        let mut dirents = Vec::new();
        for child in self.backend.children(&path).await? {
            let is_dir = child.is_collection();
            let modified = self
                .backend
                .get_live_prop(&child, "DAV:", "getlastmodified")
                .await
                .unwrap_or_default();
            let size = if is_dir {
                "[DIR]".to_string()
            } else {
                self.backend
                    .get_live_prop(&child, "DAV:", "getcontentlength")
                    .await
                    .unwrap_or_default()
            };
            let mut name = String::from_utf8_lossy(child.file_name()).to_string();
            if is_dir {
                name.push('/');
            }
            dirents.push(Dirent {
                href: child.as_url_string_with_prefix(),
                name,
                modified,
                size,
                is_dir,
            });
        }

        dirents.sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));

        let upath = htmlescape::encode_minimal(&path.as_url_string());
        let mut w = String::new();
        w.push_str("<html><head>");
        w.push_str(&format!("<title>Index of {}</title>", upath));
        w.push_str("</head><body>");
        w.push_str(&format!("<h1>Index of {}</h1>", upath));
        w.push_str("<table>");
        w.push_str("<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>");
        w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td>[DIR]</td></tr>");
        for d in &dirents {
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                d.href,
                htmlescape::encode_minimal(&d.name),
                d.modified,
                d.size
            ));
        }
        w.push_str("</table></body></html>");

        let (body, gzipped) = maybe_gzip(Bytes::from(w), accepts_gzip(req));
        res.headers_mut()
            .typed_insert(headers::ContentLength(body.len() as u64));
        if gzipped {
            res.headers_mut()
                .insert("content-encoding", "gzip".parse().unwrap());
        }
        *res.body_mut() = Body::from(body);
        Ok(res)
    }
}

fn resolve_bounds(bounds: (Bound<u64>, Bound<u64>), len: u64) -> Option<(u64, u64)> {
    let start = match bounds.0 {
        Bound::Included(s) => s,
        Bound::Excluded(s) => s + 1,
        Bound::Unbounded => 0,
    };
    let end = match bounds.1 {
        Bound::Included(e) => e,
        Bound::Excluded(e) => e.checked_sub(1)?,
        Bound::Unbounded => len.checked_sub(1)?,
    };
    if start > end || end >= len {
        return None;
    }
    Some((start, end))
}
