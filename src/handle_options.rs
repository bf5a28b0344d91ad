//! OPTIONS.
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::davhandler::DavInner;
use crate::util::{DavMethod, dav_method};

impl DavInner {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        // class 2 only when there is a lock table to back it up.
        let dav = if self.locks.is_some() { "1,2" } else { "1" };
        h.insert("dav", dav.parse().unwrap());
        h.insert("ms-author-via", "DAV".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        self.add_allow_header(req, &mut res).await;
        *res.status_mut() = StatusCode::OK;
        Ok(res)
    }

    // Build the Allow: header. Also used for 405 responses, where the
    // refused method itself is left out.
    pub(crate) async fn add_allow_header(&self, req: &Request<()>, res: &mut Response<Body>) {
        let method = dav_method(req.method()).unwrap_or(DavMethod::Options);
        let islock = |m| m == DavMethod::Lock || m == DavMethod::Unlock;
        let path = self.path(req);
        let is_star = path.is_star() && method == DavMethod::Options;
        let exists = !is_star && self.backend.exists(&path).await.unwrap_or(false);
        let is_file =
            exists && !self.backend.is_collection(&path).await.unwrap_or(false);

        let mut v: Vec<&str> = Vec::new();
        let mm = |v: &mut Vec<&str>, name: &'static str, m: DavMethod| {
            if (m == DavMethod::Options || (m != method || islock(m) != islock(method)))
                && (!islock(m) || self.locks.is_some())
                && self.allow.map_or(true, |x| x.contains(m))
            {
                v.push(name);
            }
        };

        if !exists && !is_star {
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "MKCOL", DavMethod::MkCol);
            mm(&mut v, "PUT", DavMethod::Put);
            mm(&mut v, "LOCK", DavMethod::Lock);
        } else {
            if is_file || is_star {
                mm(&mut v, "HEAD", DavMethod::Head);
                mm(&mut v, "GET", DavMethod::Get);
                mm(&mut v, "PUT", DavMethod::Put);
            }
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "PROPFIND", DavMethod::PropFind);
            mm(&mut v, "PROPPATCH", DavMethod::PropPatch);
            mm(&mut v, "REPORT", DavMethod::Report);
            mm(&mut v, "COPY", DavMethod::Copy);
            if path.as_url_string() != "/" {
                mm(&mut v, "MOVE", DavMethod::Move);
                mm(&mut v, "DELETE", DavMethod::Delete);
            }
            mm(&mut v, "LOCK", DavMethod::Lock);
            mm(&mut v, "UNLOCK", DavMethod::Unlock);
        }

        if let Ok(allow) = v.join(",").parse() {
            res.headers_mut().insert("allow", allow);
        }
    }
}
