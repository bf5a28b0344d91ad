//! Multi-Status responses for whole-resource outcomes, as produced by
//! the DELETE/COPY/MOVE tree walks.
use http::{Response, StatusCode};
use xml::writer::XmlEvent as XmlWEvent;

use crate::DavResult;
use crate::body::Body;
use crate::davpath::DavPath;
use crate::treewalk::TreeErrors;
use crate::util::{MemBuffer, set_xml_body};
use crate::xmltree_ext;

fn status_line(sc: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        sc.as_u16(),
        sc.canonical_reason().unwrap_or("")
    )
}

/// Build the response for a finished tree operation.
///
/// No errors: `success` (204 or 201). One error, and it is the request
/// root: that status alone, no body. Otherwise a 207 whose body lists
/// one `<D:response>` per failed URI; if descendant failures kept the
/// request root alive, it is reported as 424 Failed Dependency.
pub(crate) fn tree_response(
    req_path: &DavPath,
    errs: &TreeErrors,
    success: StatusCode,
    accept_gzip: bool,
) -> DavResult<Response<Body>> {
    let mut res = Response::new(Body::empty());

    if errs.is_empty() {
        *res.status_mut() = success;
        res.headers_mut().insert("content-length", 0.into());
        return Ok(res);
    }

    if errs.0.len() == 1 && &errs.0[0].0 == req_path {
        *res.status_mut() = errs.0[0].1;
        res.headers_mut().insert("content-length", 0.into());
        return Ok(res);
    }

    let mut xw = xmltree_ext::emitter(MemBuffer::new())?;
    xw.write(XmlWEvent::start_element("D:multistatus").ns("D", "DAV:"))?;

    let mut wrote_root = false;
    for (path, status) in &errs.0 {
        write_response(&mut xw, path, *status)?;
        wrote_root = wrote_root || path == req_path;
    }
    // the root could not be finished because of the failures above.
    if !wrote_root {
        write_response(&mut xw, req_path, StatusCode::FAILED_DEPENDENCY)?;
    }
    xw.write(XmlWEvent::end_element())?;

    let body = xw.into_inner().take();
    set_xml_body(&mut res, StatusCode::MULTI_STATUS, body, accept_gzip);
    Ok(res)
}

fn write_response<W: std::io::Write>(
    xw: &mut xml::writer::EventWriter<W>,
    path: &DavPath,
    status: StatusCode,
) -> DavResult<()> {
    xw.write(XmlWEvent::start_element("D:response"))?;
    xw.write(XmlWEvent::start_element("D:href"))?;
    xw.write(XmlWEvent::characters(&path.as_url_string_with_prefix()))?;
    xw.write(XmlWEvent::end_element())?;
    xw.write(XmlWEvent::start_element("D:status"))?;
    xw.write(XmlWEvent::characters(&status_line(status)))?;
    xw.write(XmlWEvent::end_element())?;
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}
