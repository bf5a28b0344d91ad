//! LOCK and UNLOCK, plus the lock-related property elements.
use std::io::Cursor;
use std::time::Duration;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::{debug, trace};
use xmltree::Element;

use crate::DavResult;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::davheaders::{self, DavTimeout, Depth, If, IfItem, LockToken, Timeout};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::lockmgr::{DavLock, LockManager, LockScope};
use crate::util::{MemBuffer, accepts_gzip, set_xml_body};
use crate::xmltree_ext::{ElementExt, emitter};

impl DavInner {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // no locksystem, no LOCK.
        let locks = match &self.locks {
            Some(locks) => locks,
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };

        let mut res = Response::new(Body::empty());
        let mut path = self.path(req);
        let exists = self.backend.exists(&path).await.unwrap_or(false);
        if exists {
            self.fixpath(&mut res, &mut path).await?;
        }

        // without a body this is a refresh.
        if xmldata.is_empty() {
            return self.handle_lock_refresh(req, res, &path, locks).await;
        }

        let deep = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => true,
            Some(Depth::Zero) => false,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
        };

        // conditional headers apply before we touch the lock table.
        if_match_get_tokens(req, &*self.backend, self.locks.as_ref(), &path, exists, None)
            .await
            .map_err(DavError::Status)?;

        // parse <D:lockinfo>.
        let tree = Element::parse2(Cursor::new(xmldata))?;
        if tree.name != "lockinfo" {
            return Err(DavError::XmlParseError);
        }

        let mut scope: Option<LockScope> = None;
        let mut owner: Option<Element> = None;
        let mut locktype_write = false;

        for elem in tree.into_child_elements() {
            match elem.name.as_str() {
                "lockscope" => {
                    scope = match elem.child_elements().first().map(|e| e.name.as_str()) {
                        Some("exclusive") => Some(LockScope::Exclusive),
                        Some("shared") => Some(LockScope::Shared),
                        _ => return Err(DavError::XmlParseError),
                    };
                }
                "locktype" => {
                    match elem.child_elements().first().map(|e| e.name.as_str()) {
                        Some("write") => locktype_write = true,
                        _ => return Err(DavError::XmlParseError),
                    }
                }
                "owner" => {
                    let mut o = elem;
                    o.prefix = Some("D".to_string());
                    owner = Some(o);
                }
                _ => return Err(DavError::XmlParseError),
            }
        }

        let scope = match (scope, locktype_write) {
            (Some(scope), true) => scope,
            _ => return Err(DavError::XmlParseError),
        };

        let timeout = get_timeout(req);
        let lock = match locks.create(
            &path,
            scope,
            deep,
            owner,
            timeout,
            self.principal.clone(),
        ) {
            Ok(lock) => lock,
            Err(conflict) => {
                debug!("lock on {} refused, conflicts with {}", path, conflict.token);
                return Err(StatusCode::LOCKED.into());
            }
        };

        res.headers_mut().typed_insert(LockToken(format!(
            "<opaquelocktoken:{}>",
            lock.token
        )));
        let body = lock_prop_body(&lock, &self.href_base())?;
        set_xml_body(&mut res, StatusCode::OK, body, accepts_gzip(req));
        Ok(res)
    }

    async fn handle_lock_refresh(
        &self,
        req: &Request<()>,
        mut res: Response<Body>,
        path: &DavPath,
        locks: &LockManager,
    ) -> DavResult<Response<Body>> {
        // find a token we know among the If: conditions.
        let hdr = req.headers().typed_get::<If>();
        let submitted = hdr
            .iter()
            .flat_map(|h| h.0.iter())
            .flat_map(|l| l.conditions.iter())
            .filter_map(|c| match &c.item {
                IfItem::StateToken(t) => davheaders::token_finder(t).map(str::to_string),
                _ => None,
            });

        for token in submitted {
            if locks.find(&token).is_some() {
                trace!("refresh lock {} on {}", token, path);
                let lock = locks
                    .refresh(&token, get_timeout(req))
                    .map_err(|_| DavError::Status(StatusCode::PRECONDITION_FAILED))?;
                let body = lock_prop_body(&lock, &self.href_base())?;
                set_xml_body(&mut res, StatusCode::OK, body, accepts_gzip(req));
                return Ok(res);
            }
        }

        // nothing to refresh; the lock table has no such token.
        Err(StatusCode::PRECONDITION_FAILED.into())
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let locks = match &self.locks {
            Some(locks) => locks,
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };

        let hdr = req
            .headers()
            .typed_get::<LockToken>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let token = match davheaders::token_finder(&hdr.0) {
            Some(token) if token.contains('-') => token.to_string(),
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };

        locks.release(&token);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        res.headers_mut().insert("content-length", 0.into());
        Ok(res)
    }

    // base for absolute-ish hrefs: backend base URI plus mount prefix.
    pub(crate) fn href_base(&self) -> String {
        format!("{}{}", self.backend.base_uri(), self.prefix)
    }
}

// Timeout: header to a lock timeout. Absent or `Infinite` means no
// expiry.
fn get_timeout(req: &Request<()>) -> Option<Duration> {
    match req.headers().typed_get::<Timeout>() {
        Some(Timeout(v)) => match v.first() {
            Some(DavTimeout::Seconds(n)) => Some(Duration::from_secs(*n as u64)),
            Some(DavTimeout::Infinite) | None => None,
        },
        None => None,
    }
}

fn timeout_string(lock: &DavLock) -> String {
    match lock.timeout {
        None => "Infinite".to_string(),
        Some(d) => format!("Second-{}", d.as_secs()),
    }
}

fn build_activelock(lock: &DavLock, href_base: &str) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:locktype");
    elem.push(Element::new2("D:write"));
    actlock.push(elem);

    let mut elem = Element::new2("D:lockscope");
    elem.push(match lock.scope {
        LockScope::Exclusive => Element::new2("D:exclusive"),
        LockScope::Shared => Element::new2("D:shared"),
    });
    actlock.push(elem);

    actlock.push(
        Element::new2("D:depth").text(if lock.deep { "Infinity" } else { "0" }),
    );

    if let Some(owner) = &lock.owner {
        actlock.push(owner.clone());
    }

    actlock.push(Element::new2("D:timeout").text(timeout_string(lock)));

    let mut tokenelem = Element::new2("D:locktoken");
    tokenelem.push(
        Element::new2("D:href").text(format!("opaquelocktoken:{}", lock.token)),
    );
    actlock.push(tokenelem);

    let mut lockroot = Element::new2("D:lockroot");
    lockroot.push(Element::new2("D:href").text(format!("{}{}", href_base, lock.uri)));
    actlock.push(lockroot);

    actlock
}

// the LOCK response body: the granted lock under
// <D:prop><D:lockdiscovery>.
fn lock_prop_body(lock: &DavLock, href_base: &str) -> DavResult<bytes::Bytes> {
    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push(build_activelock(lock, href_base));
    let mut prop = Element::new2("D:prop");
    prop.namespace = Some("DAV:".to_string());
    prop.push(ldis);

    let mut xw = emitter(MemBuffer::new())?;
    prop.write_ev(&mut xw)?;
    Ok(xw.into_inner().take())
}

/// `<D:lockdiscovery>` for a resource: every valid lock covering it.
pub(crate) fn list_lockdiscovery(
    locks: Option<&LockManager>,
    path: &DavPath,
    href_base: &str,
) -> Element {
    let mut elem = Element::new2("D:lockdiscovery");
    let locks = match locks {
        Some(locks) => locks,
        None => return elem,
    };
    for lock in locks.discover(path) {
        elem.push(build_activelock(&lock, href_base));
    }
    elem
}

/// Static `<D:supportedlock>`: exclusive and shared write locks, when
/// a lock table is configured at all.
pub(crate) fn list_supportedlock(locks: Option<&LockManager>) -> Element {
    let mut elem = Element::new2("D:supportedlock");
    if locks.is_none() {
        return elem;
    }

    for scope in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut lockscope = Element::new2("D:lockscope");
        lockscope.push(Element::new2(scope));
        entry.push(lockscope);
        let mut locktype = Element::new2("D:locktype");
        locktype.push(Element::new2("D:write"));
        entry.push(locktype);
        elem.push(entry);
    }
    elem
}
