//! Conditional request evaluation: the HTTP `If-Match` family
//! (RFC 7232) and the WebDAV `If:` header (RFC 4918 10.4).
use headers::HeaderMapExt;
use http::{Method, StatusCode};

use log::trace;

use crate::backend::DavBackend;
use crate::davheaders::{ETag, ETagList, If, IfItem, IfMatch, IfNoneMatch};
use crate::davpath::DavPath;
use crate::lockmgr::LockManager;
use crate::util::round_time;

type Request = http::Request<()>;

/// Current strong ETag of a resource, if the backend reports one.
pub(crate) async fn current_etag(backend: &dyn DavBackend, path: &DavPath) -> Option<ETag> {
    match backend.get_live_prop(path, "DAV:", "getetag").await {
        Ok(tag) => ETag::new(false, tag).ok(),
        Err(_) => None,
    }
}

pub(crate) fn etaglist_match(tags: &ETagList, exists: bool, tag: Option<&ETag>) -> bool {
    match tags {
        ETagList::Star => exists,
        ETagList::Tags(t) => match tag {
            Some(tag) => t.iter().any(|x| x == tag),
            None => false,
        },
    }
}

// Evaluate the RFC 7232 conditional headers against the resource state.
// `modified` is only consulted for the date-based forms.
pub(crate) fn http_if_match(
    req: &Request,
    exists: bool,
    etag: Option<&ETag>,
    modified: Option<std::time::SystemTime>,
) -> Option<StatusCode> {
    if let Some(r) = req.headers().typed_get::<IfMatch>() {
        if !etaglist_match(&r.0, exists, etag) {
            trace!("precondition fail: If-Match {:?}", r);
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfUnmodifiedSince>() {
        match modified {
            None => return Some(StatusCode::PRECONDITION_FAILED),
            Some(m) => {
                if round_time(m) > round_time(r) {
                    trace!("precondition fail: If-Unmodified-Since");
                    return Some(StatusCode::PRECONDITION_FAILED);
                }
            }
        }
    }

    if let Some(r) = req.headers().typed_get::<IfNoneMatch>() {
        if etaglist_match(&r.0, exists, etag) {
            trace!("precondition fail: If-None-Match {:?}", r);
            if req.method() == Method::GET || req.method() == Method::HEAD {
                return Some(StatusCode::NOT_MODIFIED);
            }
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(r) = req.headers().typed_get::<headers::IfModifiedSince>() {
        if req.method() == Method::GET || req.method() == Method::HEAD {
            if let Some(m) = modified {
                if round_time(m) <= round_time(r) {
                    return Some(StatusCode::NOT_MODIFIED);
                }
            }
        }
    }
    None
}

// Evaluate the WebDAV `If:` header.
//
// Returns whether the precondition held (true when the header is
// absent) and every state token submitted in it, which the caller
// forwards to the lock checks.
pub(crate) async fn dav_if_match(
    req: &Request,
    backend: &dyn DavBackend,
    locks: Option<&LockManager>,
    path: &DavPath,
) -> (bool, Vec<String>) {
    let hdr = match req.headers().typed_get::<If>() {
        Some(hdr) => hdr,
        None => return (true, Vec::new()),
    };

    let mut tokens: Vec<String> = Vec::new();
    let mut any_list_ok = false;

    for iflist in &hdr.0 {
        // remember all state tokens, even from lists we never evaluate.
        for cond in &iflist.conditions {
            if let IfItem::StateToken(t) = &cond.item {
                if let Some(tok) = crate::davheaders::token_finder(t) {
                    tokens.push(tok.to_string());
                }
            }
        }

        if any_list_ok {
            continue;
        }

        // resolve the tagged resource; a tag outside our tree makes
        // every condition in the list evaluate to false.
        let mut anchor: Option<DavPath> = None;
        let (p, valid) = match &iflist.resource_tag {
            Some(url) => match DavPath::from_str_and_prefix(url.path(), path.prefix()) {
                Ok(p) => (&*anchor.insert(p), true),
                Err(_) => (path, false),
            },
            None => (path, true),
        };

        let mut list_ok = true;
        for cond in &iflist.conditions {
            let cond_ok = match &cond.item {
                IfItem::StateToken(s) => {
                    // tokens in the DAV: namespace always evaluate to
                    // false (RFC 4918 10.4.8).
                    if !valid || s.starts_with("DAV:") {
                        false
                    } else {
                        // true iff a valid lock covering the resource
                        // carries this token.
                        match (locks, crate::davheaders::token_finder(s)) {
                            (Some(locks), Some(tok)) => {
                                locks.discover(p).iter().any(|l| l.token == tok)
                            }
                            _ => false,
                        }
                    }
                }
                IfItem::ETag(tag) => {
                    if !valid {
                        false
                    } else {
                        match current_etag(backend, p).await {
                            Some(cur) => &cur == tag,
                            None => false,
                        }
                    }
                }
            };
            if cond_ok == cond.not {
                list_ok = false;
                break;
            }
        }
        if list_ok {
            any_list_ok = true;
        }
    }

    if !any_list_ok {
        trace!("precondition fail: If {:?}", hdr.0);
    }
    (any_list_ok, tokens)
}

// Combined gate used by the mutating methods: evaluate the HTTP
// conditionals and the If: header, and hand back the submitted state
// tokens for the lock check that follows.
pub(crate) async fn if_match_get_tokens(
    req: &Request,
    backend: &dyn DavBackend,
    locks: Option<&LockManager>,
    path: &DavPath,
    exists: bool,
    modified: Option<std::time::SystemTime>,
) -> Result<Vec<String>, StatusCode> {
    let etag = if exists {
        current_etag(backend, path).await
    } else {
        None
    };
    if let Some(code) = http_if_match(req, exists, etag.as_ref(), modified) {
        return Err(code);
    }
    match dav_if_match(req, backend, locks, path).await {
        (true, v) => Ok(v),
        (false, _) => Err(StatusCode::PRECONDITION_FAILED),
    }
}
