//! PROPFIND, PROPPATCH and REPORT.
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use log::trace;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xmltree::Element;

use crate::DavResult;
use crate::backend::{BackendError, PropName};
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davhandler::DavInner;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::handle_lock::{list_lockdiscovery, list_supportedlock};
use crate::treewalk::flatten;
use crate::util::{MemBuffer, accepts_gzip, set_xml_body};
use crate::xmltree_ext::{ElementExt, emitter, inner_xml, parse_fragment};

const NS_DAV_URI: &str = "DAV:";

// the namespace Microsoft clients expect on typed date properties.
const NS_MS_DATE: &str = "urn:uuid:c2f41010-65b3-11d1-a29f-00aa00c14882/";
const MS_DAV_AGENT: &str = "Microsoft Data Access Internet Publishing Provider DAV 1.1";

// live properties in the DAV: namespace.
const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlanguage",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "source",
    "supportedlock",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum PropfindKind {
    Allprop,
    Propname,
    Prop,
}

// outcome of building one property element.
enum PropValue {
    Status(StatusCode, Element),
    // DAV_Secret: leave the property out entirely.
    Hidden,
}

struct PropWriter {
    emitter: EventWriter<MemBuffer>,
    kind: PropfindKind,
    requested: Vec<PropName>,
    ns_map: HashMap<String, String>,
    is_ms: bool,
}

impl DavInner {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // no lock checks here: PROPFIND reads.
        let mut res = Response::new(Body::empty());
        res.headers_mut()
            .typed_insert(headers::CacheControl::new().with_no_cache());
        res.headers_mut().typed_insert(headers::Pragma::no_cache());

        let depth = req
            .headers()
            .typed_get::<Depth>()
            .unwrap_or(Depth::Infinity);

        let mut path = self.path(req);
        self.fixpath(&mut res, &mut path).await?;

        let (kind, requested) = parse_propfind(xmldata)?;
        trace!("propfind: {:?} depth {:?} on {}", kind, depth, path);

        let uris = match depth {
            Depth::Zero => vec![path.clone()],
            Depth::One => {
                let mut v = vec![path.clone()];
                if path.is_collection() {
                    v.extend(self.backend.children(&path).await?);
                }
                v
            }
            Depth::Infinity => flatten(&*self.backend, &path).await?,
        };

        let mut pw = PropWriter::new(kind, requested, is_ms_dav_agent(req))?;
        for uri in &uris {
            self.write_resource_props(&mut pw, uri).await?;
        }
        let body = pw.finish()?;

        set_xml_body(&mut res, StatusCode::MULTI_STATUS, body, accepts_gzip(req));
        Ok(res)
    }

    pub(crate) async fn handle_report(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // REPORT reads like PROPFIND, but recursion is opt-in.
        let mut res = Response::new(Body::empty());
        let depth = req.headers().typed_get::<Depth>().unwrap_or(Depth::Zero);

        let mut path = self.path(req);
        self.fixpath(&mut res, &mut path).await?;

        let (kind, requested) = parse_report(xmldata)?;

        let uris = match depth {
            Depth::Zero => vec![path.clone()],
            Depth::One => {
                let mut v = vec![path.clone()];
                if path.is_collection() {
                    v.extend(self.backend.children(&path).await?);
                }
                v
            }
            Depth::Infinity => flatten(&*self.backend, &path).await?,
        };

        let mut pw = PropWriter::new(kind, requested, is_ms_dav_agent(req))?;
        for uri in &uris {
            self.write_resource_props(&mut pw, uri).await?;
        }
        let body = pw.finish()?;

        set_xml_body(&mut res, StatusCode::MULTI_STATUS, body, accepts_gzip(req));
        Ok(res)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let mut path = self.path(req);
        self.fixpath(&mut res, &mut path).await?;

        // conditional headers and the lock gate.
        let tokens = if_match_get_tokens(req, &*self.backend, self.locks.as_ref(), &path, true, None)
            .await
            .map_err(DavError::Status)?;
        if let Some(locks) = &self.locks {
            if locks.check(&path, &tokens).is_err() {
                return Err(StatusCode::LOCKED.into());
            }
        }

        trace!(
            "proppatch input: {}",
            String::from_utf8_lossy(xmldata)
        );
        let ops = parse_proppatch(xmldata)?;

        // Phase 1: static validation. Writes into the DAV: namespace
        // are never allowed; if anything is invalid, nothing runs and
        // every other operation reports 424.
        let mut results: Vec<(StatusCode, PropName)> = Vec::new();
        let any_invalid = ops.iter().any(|op| op.prop.is_dav());
        if any_invalid {
            for op in &ops {
                let sc = if op.prop.is_dav() {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::FAILED_DEPENDENCY
                };
                results.push((sc, op.prop.clone()));
            }
        } else {
            // Phase 2: execute in document order, fail fast. A failure
            // mid-sequence leaves earlier effects in place; the
            // remaining operations report 424.
            let mut failed = false;
            for op in &ops {
                if failed {
                    results.push((StatusCode::FAILED_DEPENDENCY, op.prop.clone()));
                    continue;
                }
                let r = match &op.value {
                    Some(xml) => self.backend.set_dead_prop(&path, &op.prop, xml).await,
                    None => match self.backend.del_dead_prop(&path, &op.prop).await {
                        // removing what is not there is fine.
                        Err(BackendError::NotFound) => Ok(()),
                        r => r,
                    },
                };
                match r {
                    Ok(()) => results.push((StatusCode::OK, op.prop.clone())),
                    Err(e) => {
                        failed = true;
                        results.push((e.statuscode(), op.prop.clone()));
                    }
                }
            }
        }

        let mut pw = PropWriter::new(PropfindKind::Prop, Vec::new(), false)?;
        pw.write_patch_response(&path, &results)?;
        let body = pw.finish()?;

        set_xml_body(&mut res, StatusCode::MULTI_STATUS, body, accepts_gzip(req));
        Ok(res)
    }

    // one <D:response> with the property statuses of a single resource.
    async fn write_resource_props(&self, pw: &mut PropWriter, uri: &DavPath) -> DavResult<()> {
        // which properties to look at.
        let props: Vec<PropName> = match pw.kind {
            PropfindKind::Prop => pw.requested.clone(),
            PropfindKind::Allprop | PropfindKind::Propname => {
                let mut v: Vec<PropName> = LIVE_PROPS
                    .iter()
                    .map(|n| PropName::new(NS_DAV_URI, *n))
                    .collect();
                if let Ok(dead) = self.backend.list_all_propnames(uri).await {
                    v.extend(dead);
                }
                v
            }
        };

        let docontent = pw.kind != PropfindKind::Propname;
        let mut buckets: BTreeMap<u16, Vec<Element>> = BTreeMap::new();

        for prop in &props {
            match self.build_prop(pw, uri, prop, docontent).await? {
                PropValue::Status(sc, elem) => {
                    // allprop and propname only report what exists.
                    if sc == StatusCode::OK || pw.kind == PropfindKind::Prop {
                        buckets.entry(sc.as_u16()).or_default().push(elem);
                    }
                }
                PropValue::Hidden => {}
            }
        }

        pw.write_propstat_response(uri, buckets)
    }

    // resolve one property: live first, then the dead store.
    async fn build_prop(
        &self,
        pw: &mut PropWriter,
        uri: &DavPath,
        prop: &PropName,
        docontent: bool,
    ) -> DavResult<PropValue> {
        if prop.is_dav() && LIVE_PROPS.contains(&prop.name.as_str()) {
            return self.build_live_prop(pw, uri, prop, docontent).await;
        }

        // dead property.
        let elem = pw.named_element(prop);
        if !docontent {
            // propname only wants to know it exists.
            return match self.backend.get_dead_prop(uri, prop).await {
                Ok(_) => Ok(PropValue::Status(StatusCode::OK, elem)),
                Err(BackendError::Secret) => Ok(PropValue::Hidden),
                Err(_) => Ok(PropValue::Status(StatusCode::NOT_FOUND, elem)),
            };
        }
        match self.backend.get_dead_prop(uri, prop).await {
            Ok(fragment) => {
                let mut elem = elem;
                elem.children = parse_fragment(&fragment);
                Ok(PropValue::Status(StatusCode::OK, elem))
            }
            Err(BackendError::Secret) => Ok(PropValue::Hidden),
            Err(BackendError::NotFound) => Ok(PropValue::Status(StatusCode::NOT_FOUND, elem)),
            Err(_) => Ok(PropValue::Status(StatusCode::FORBIDDEN, elem)),
        }
    }

    async fn build_live_prop(
        &self,
        pw: &mut PropWriter,
        uri: &DavPath,
        prop: &PropName,
        docontent: bool,
    ) -> DavResult<PropValue> {
        let mut elem = pw.named_element(prop);
        match prop.name.as_str() {
            "resourcetype" => {
                if docontent {
                    let is_coll = self.backend.is_collection(uri).await.unwrap_or(false);
                    if is_coll {
                        elem.push(Element::new2("D:collection"));
                    }
                }
                Ok(PropValue::Status(StatusCode::OK, elem))
            }
            "lockdiscovery" => Ok(PropValue::Status(
                StatusCode::OK,
                list_lockdiscovery(self.locks.as_ref(), uri, &self.href_base()),
            )),
            "supportedlock" => Ok(PropValue::Status(
                StatusCode::OK,
                list_supportedlock(self.locks.as_ref()),
            )),
            name => {
                match self.backend.get_live_prop(uri, NS_DAV_URI, name).await {
                    Ok(value) => {
                        if docontent && !value.is_empty() {
                            elem = elem.text(value);
                        }
                        if pw.is_ms {
                            // date typing for the Microsoft data access
                            // provider.
                            match name {
                                "getlastmodified" => {
                                    elem = elem
                                        .attr("xmlns:b", NS_MS_DATE)
                                        .attr("b:dt", "dateTime.rfc1123");
                                }
                                "creationdate" => {
                                    elem = elem
                                        .attr("xmlns:b", NS_MS_DATE)
                                        .attr("b:dt", "dateTime.tz");
                                }
                                _ => {}
                            }
                        }
                        Ok(PropValue::Status(StatusCode::OK, elem))
                    }
                    Err(BackendError::Secret) => Ok(PropValue::Hidden),
                    Err(BackendError::NotFound) => {
                        Ok(PropValue::Status(StatusCode::NOT_FOUND, elem))
                    }
                    Err(_) => Ok(PropValue::Status(StatusCode::FORBIDDEN, elem)),
                }
            }
        }
    }
}

impl PropWriter {
    fn new(kind: PropfindKind, requested: Vec<PropName>, is_ms: bool) -> DavResult<PropWriter> {
        let mut emitter = emitter(MemBuffer::new())?;
        emitter.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
        Ok(PropWriter {
            emitter,
            kind,
            requested,
            ns_map: HashMap::new(),
            is_ms,
        })
    }

    // an empty element carrying the right prefix and declaration for
    // the property's namespace.
    fn named_element(&mut self, prop: &PropName) -> Element {
        let mut elem = Element::new(&prop.name);
        if prop.namespace == NS_DAV_URI {
            // D: is declared on the multistatus root.
            elem.prefix = Some("D".to_string());
        } else if !prop.namespace.is_empty() {
            let n = self.ns_map.len();
            let pfx = self
                .ns_map
                .entry(prop.namespace.clone())
                .or_insert_with(|| format!("ns{}", n));
            elem.prefix = Some(pfx.clone());
            elem.namespace = Some(prop.namespace.clone());
        }
        elem
    }

    fn write_propstat_response(
        &mut self,
        uri: &DavPath,
        buckets: BTreeMap<u16, Vec<Element>>,
    ) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element("D:response"))?;
        Element::new2("D:href")
            .text(uri.as_url_string_with_prefix())
            .write_ev(&mut self.emitter)?;
        for (status, elems) in buckets {
            let sc = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            for elem in elems {
                elem.write_ev(&mut self.emitter)?;
            }
            self.emitter.write(XmlWEvent::end_element())?;
            Element::new2("D:status")
                .text(format!(
                    "HTTP/1.1 {} {}",
                    sc.as_u16(),
                    sc.canonical_reason().unwrap_or("")
                ))
                .write_ev(&mut self.emitter)?;
            self.emitter.write(XmlWEvent::end_element())?;
        }
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn write_patch_response(
        &mut self,
        uri: &DavPath,
        results: &[(StatusCode, PropName)],
    ) -> DavResult<()> {
        let mut buckets: BTreeMap<u16, Vec<Element>> = BTreeMap::new();
        for (sc, prop) in results {
            let elem = self.named_element(prop);
            buckets.entry(sc.as_u16()).or_default().push(elem);
        }
        self.write_propstat_response(uri, buckets)
    }

    fn finish(mut self) -> DavResult<bytes::Bytes> {
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(self.emitter.into_inner().take())
    }
}

fn is_ms_dav_agent(req: &Request<()>) -> bool {
    req.headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua == MS_DAV_AGENT)
        .unwrap_or(false)
}

fn is_dav_elem(elem: &Element, name: &str) -> bool {
    elem.name == name && elem.namespace.as_deref() == Some(NS_DAV_URI)
}

// An empty body means allprop.
fn parse_propfind(xmldata: &[u8]) -> DavResult<(PropfindKind, Vec<PropName>)> {
    if xmldata.is_empty() {
        return Ok((PropfindKind::Allprop, Vec::new()));
    }
    let root = Element::parse2(Cursor::new(xmldata))?;
    if !is_dav_elem(&root, "propfind") {
        return Err(DavError::XmlParseError);
    }
    for child in root.into_child_elements() {
        if child.namespace.as_deref() != Some(NS_DAV_URI) {
            continue;
        }
        match child.name.as_str() {
            "allprop" => return Ok((PropfindKind::Allprop, Vec::new())),
            "propname" => return Ok((PropfindKind::Propname, Vec::new())),
            "prop" => {
                let props = child
                    .into_child_elements()
                    .into_iter()
                    .map(|e| PropName::new(e.namespace.unwrap_or_default(), e.name))
                    .collect();
                return Ok((PropfindKind::Prop, props));
            }
            _ => {}
        }
    }
    Err(DavError::XmlParseError)
}

// A REPORT body is interpreted for its <D:prop> selection; everything
// else about the report element is up to the backend's vocabulary.
fn parse_report(xmldata: &[u8]) -> DavResult<(PropfindKind, Vec<PropName>)> {
    if xmldata.is_empty() {
        return Ok((PropfindKind::Allprop, Vec::new()));
    }
    let root = Element::parse2(Cursor::new(xmldata))?;
    fn find_prop(elem: &Element) -> Option<Vec<PropName>> {
        if is_dav_elem(elem, "prop") {
            return Some(
                elem.child_elements()
                    .into_iter()
                    .map(|e| PropName::new(e.namespace.clone().unwrap_or_default(), e.name.clone()))
                    .collect(),
            );
        }
        elem.child_elements().into_iter().find_map(find_prop)
    }
    match find_prop(&root) {
        Some(props) => Ok((PropfindKind::Prop, props)),
        None => Ok((PropfindKind::Allprop, Vec::new())),
    }
}

struct PatchOp {
    prop: PropName,
    // Some(xml) to set, None to remove.
    value: Option<String>,
}

// <D:propertyupdate> with ordered <D:set>/<D:remove> children.
fn parse_proppatch(xmldata: &[u8]) -> DavResult<Vec<PatchOp>> {
    let root = Element::parse2(Cursor::new(xmldata))?;
    if !is_dav_elem(&root, "propertyupdate") {
        return Err(DavError::XmlParseError);
    }
    let mut ops = Vec::new();
    for action in root.child_elements() {
        let is_set = match (action.namespace.as_deref(), action.name.as_str()) {
            (Some(NS_DAV_URI), "set") => true,
            (Some(NS_DAV_URI), "remove") => false,
            _ => continue,
        };
        for prop in action.child_elements() {
            if !is_dav_elem(prop, "prop") {
                continue;
            }
            for p in prop.child_elements() {
                ops.push(PatchOp {
                    prop: PropName::new(
                        p.namespace.clone().unwrap_or_default(),
                        p.name.clone(),
                    ),
                    value: if is_set { Some(inner_xml(p)) } else { None },
                });
            }
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propfind_bodies() {
        let (kind, _) = parse_propfind(b"").unwrap();
        assert_eq!(kind, PropfindKind::Allprop);

        let body = br#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        let (kind, _) = parse_propfind(body).unwrap();
        assert_eq!(kind, PropfindKind::Propname);

        let body = br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:prop><D:getetag/><Z:author/></D:prop>
            </D:propfind>"#;
        let (kind, props) = parse_propfind(body).unwrap();
        assert_eq!(kind, PropfindKind::Prop);
        assert_eq!(props.len(), 2);
        assert_eq!(props[0], PropName::new("DAV:", "getetag"));
        assert_eq!(props[1], PropName::new("urn:z", "author"));

        assert!(parse_propfind(b"<D:propfind xmlns:D=\"DAV:\"/>").is_err());
        assert!(parse_propfind(b"not xml").is_err());
    }

    #[test]
    fn proppatch_document_order() {
        let body = br#"<?xml version="1.0"?>
            <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:set><D:prop><Z:a>one</Z:a></D:prop></D:set>
              <D:remove><D:prop><Z:b/></D:prop></D:remove>
              <D:set><D:prop><Z:c><Z:nested/></Z:c></D:prop></D:set>
            </D:propertyupdate>"#;
        let ops = parse_proppatch(body).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].prop.name, "a");
        assert_eq!(ops[0].value.as_deref(), Some("one"));
        assert_eq!(ops[1].prop.name, "b");
        assert!(ops[1].value.is_none());
        assert_eq!(ops[2].prop.name, "c");
        assert!(ops[2].value.as_deref().unwrap().contains("nested"));
    }
}
