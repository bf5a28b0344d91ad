//! Simple in-memory resource backend.
//!
//! This implementation has state, so create one instance with
//! `MemBackend::new`, keep it in your server struct, and clone it per
//! handler. A `MemBackend` value is just a handle, cloning is cheap.
//!
//! It is the reference implementation of the [`DavBackend`] contract
//! and what the integration tests run against: objects, collections,
//! dead properties that travel with COPY/MOVE, apache-style etags.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt, stream};
use log::debug;

use crate::backend::{
    BackendError, BackendFuture, BackendResult, DataStream, DavBackend, DavRange, PropName,
};
use crate::davpath::DavPath;
use crate::util::{iso8601_date, rfc1123_date};

// segment size for streamed bodies.
const CHUNK_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
struct MemObject {
    data: Bytes,
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
struct MemNode {
    // None for collections.
    object: Option<MemObject>,
    props: HashMap<PropName, String>,
    crtime: SystemTime,
    mtime: SystemTime,
}

impl MemNode {
    fn new(object: Option<MemObject>) -> MemNode {
        let now = SystemTime::now();
        MemNode {
            object,
            props: HashMap::new(),
            crtime: now,
            mtime: now,
        }
    }

    fn is_collection(&self) -> bool {
        self.object.is_none()
    }

    fn len(&self) -> u64 {
        self.object.as_ref().map(|o| o.data.len() as u64).unwrap_or(0)
    }

    fn etag(&self) -> String {
        let t = self
            .mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        format!("{:x}-{:x}", self.len(), t)
    }
}

/// Ephemeral in-memory backend.
#[derive(Debug, Clone)]
pub struct MemBackend {
    tree: Arc<Mutex<BTreeMap<Vec<u8>, MemNode>>>,
    mimecheck: bool,
}

// storage key: decoded path, no trailing slash; the root is "/".
fn key(path: &DavPath) -> Vec<u8> {
    let mut k = path.as_bytes().to_vec();
    if k.len() > 1 && k.ends_with(b"/") {
        k.pop();
    }
    k
}

fn parent_key(k: &[u8]) -> Vec<u8> {
    match k.iter().rposition(|&c| c == b'/') {
        Some(0) | None => b"/".to_vec(),
        Some(pos) => k[..pos].to_vec(),
    }
}

impl MemBackend {
    /// Create a new, empty backend containing only the root collection.
    pub fn new() -> Box<MemBackend> {
        Box::new(MemBackend::with_mimecheck(true))
    }

    /// Like [`MemBackend::new`], with content-type sniffing toggled.
    pub fn with_mimecheck(mimecheck: bool) -> MemBackend {
        let mut tree = BTreeMap::new();
        tree.insert(b"/".to_vec(), MemNode::new(None));
        MemBackend {
            tree: Arc::new(Mutex::new(tree)),
            mimecheck,
        }
    }

    /// Seed a collection, creating it directly (no protocol checks).
    pub async fn add_collection(&self, path: &str) {
        let path = DavPath::new(path).expect("valid seed path");
        let tree = &mut *self.tree.lock().unwrap();
        tree.insert(key(&path), MemNode::new(None));
    }

    /// Seed an object, creating it directly (no protocol checks).
    pub async fn add_object(&self, path: &str, data: &[u8]) {
        let path = DavPath::new(path).expect("valid seed path");
        let tree = &mut *self.tree.lock().unwrap();
        tree.insert(
            key(&path),
            MemNode::new(Some(MemObject {
                data: Bytes::from(data.to_vec()),
                content_type: None,
            })),
        );
    }

    fn sniff(&self, path: &DavPath) -> Option<String> {
        if self.mimecheck {
            Some(path.get_mime_type_str().to_string())
        } else {
            None
        }
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        MemBackend::with_mimecheck(true)
    }
}

fn slice_range(data: &Bytes, range: Option<DavRange>) -> BackendResult<Bytes> {
    let len = data.len() as u64;
    let range = match range {
        None => return Ok(data.clone()),
        Some(r) => r,
    };
    let (start, end) = match (range.start, range.end) {
        (Some(s), Some(e)) if s <= e => (s, (e + 1).min(len)),
        (Some(s), None) => (s, len),
        (None, Some(suffix)) => (len.saturating_sub(suffix), len),
        _ => return Err(BackendError::RangeNotSatisfiable),
    };
    if start >= len {
        return Err(BackendError::RangeNotSatisfiable);
    }
    Ok(data.slice(start as usize..end as usize))
}

fn chunked(data: Bytes) -> DataStream {
    let chunks: Vec<_> = (0..data.len().max(1))
        .step_by(CHUNK_SIZE)
        .map(|off| Ok(data.slice(off..(off + CHUNK_SIZE).min(data.len()))))
        .collect();
    stream::iter(chunks).boxed()
}

impl DavBackend for MemBackend {
    fn exists<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, bool> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            Ok(tree.contains_key(&key(uri)))
        }
        .boxed()
    }

    fn is_collection<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, bool> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            let node = tree.get(&key(uri)).ok_or(BackendError::NotFound)?;
            Ok(node.is_collection())
        }
        .boxed()
    }

    fn children<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, Vec<DavPath>> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            let k = key(uri);
            let node = tree.get(&k).ok_or(BackendError::NotFound)?;
            if !node.is_collection() {
                return Ok(Vec::new());
            }
            let mut prefix = k.clone();
            if prefix != b"/" {
                prefix.push(b'/');
            }
            let mut out = Vec::new();
            for (ck, cnode) in tree.range(prefix.clone()..) {
                if !ck.starts_with(&prefix) {
                    break;
                }
                let name = &ck[prefix.len()..];
                if name.is_empty() || name.contains(&b'/') {
                    continue;
                }
                let mut child = uri.clone();
                child.add_slash();
                child.push_segment(name);
                child.add_slash_if(cnode.is_collection());
                out.push(child);
            }
            Ok(out)
        }
        .boxed()
    }

    fn get_data<'a>(
        &'a self,
        uri: &'a DavPath,
        range: Option<DavRange>,
    ) -> BackendFuture<'a, DataStream> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            let node = tree.get(&key(uri)).ok_or(BackendError::NotFound)?;
            let object = node.object.as_ref().ok_or(BackendError::Forbidden)?;
            let data = slice_range(&object.data, range)?;
            Ok(chunked(data))
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        uri: &'a DavPath,
        mut data: DataStream,
        content_type: Option<String>,
    ) -> BackendFuture<'a, ()> {
        async move {
            let mut buf = Vec::new();
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(|_| BackendError::GeneralFailure)?;
                buf.extend_from_slice(&chunk);
            }

            let tree = &mut *self.tree.lock().unwrap();
            let k = key(uri);
            match tree.get(&parent_key(&k)) {
                Some(p) if p.is_collection() => {}
                _ => return Err(BackendError::Conflict),
            }
            let content_type = content_type.or_else(|| self.sniff(uri));
            match tree.get_mut(&k) {
                Some(node) if node.is_collection() => Err(BackendError::Forbidden),
                Some(node) => {
                    node.object = Some(MemObject {
                        data: Bytes::from(buf),
                        content_type,
                    });
                    node.mtime = SystemTime::now();
                    Ok(())
                }
                None => {
                    debug!("put: creating {}", uri);
                    tree.insert(
                        k,
                        MemNode::new(Some(MemObject {
                            data: Bytes::from(buf),
                            content_type,
                        })),
                    );
                    Ok(())
                }
            }
        }
        .boxed()
    }

    fn mkcol<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()> {
        async move {
            let tree = &mut *self.tree.lock().unwrap();
            let k = key(uri);
            if tree.contains_key(&k) {
                return Err(BackendError::Exists);
            }
            match tree.get(&parent_key(&k)) {
                Some(p) if p.is_collection() => {}
                _ => return Err(BackendError::Conflict),
            }
            tree.insert(k, MemNode::new(None));
            Ok(())
        }
        .boxed()
    }

    fn delete_one<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()> {
        async move {
            let tree = &mut *self.tree.lock().unwrap();
            let k = key(uri);
            match tree.get(&k) {
                None => Err(BackendError::NotFound),
                Some(node) if node.is_collection() => Err(BackendError::Forbidden),
                Some(_) => {
                    tree.remove(&k);
                    Ok(())
                }
            }
        }
        .boxed()
    }

    fn delete_collection<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, ()> {
        async move {
            let tree = &mut *self.tree.lock().unwrap();
            let k = key(uri);
            match tree.get(&k) {
                None => return Err(BackendError::NotFound),
                Some(node) if !node.is_collection() => return Err(BackendError::Forbidden),
                Some(_) => {}
            }
            let mut prefix = k.clone();
            prefix.push(b'/');
            let occupied = tree
                .range(prefix.clone()..)
                .next()
                .map(|(ck, _)| ck.starts_with(&prefix))
                .unwrap_or(false);
            if occupied {
                return Err(BackendError::Forbidden);
            }
            tree.remove(&k);
            Ok(())
        }
        .boxed()
    }

    fn copy_one<'a>(&'a self, src: &'a DavPath, dst: &'a DavPath) -> BackendFuture<'a, ()> {
        async move {
            let tree = &mut *self.tree.lock().unwrap();
            let sk = key(src);
            let dk = key(dst);
            let node = tree.get(&sk).ok_or(BackendError::NotFound)?;
            if node.is_collection() {
                return Err(BackendError::Forbidden);
            }
            match tree.get(&parent_key(&dk)) {
                Some(p) if p.is_collection() => {}
                _ => return Err(BackendError::Conflict),
            }
            let mut copy = node.clone();
            copy.crtime = SystemTime::now();
            copy.mtime = copy.crtime;
            tree.insert(dk, copy);
            Ok(())
        }
        .boxed()
    }

    fn copy_collection<'a>(&'a self, src: &'a DavPath, dst: &'a DavPath) -> BackendFuture<'a, ()> {
        async move {
            let tree = &mut *self.tree.lock().unwrap();
            let sk = key(src);
            let dk = key(dst);
            let node = tree.get(&sk).ok_or(BackendError::NotFound)?;
            if !node.is_collection() {
                return Err(BackendError::Forbidden);
            }
            match tree.get(&parent_key(&dk)) {
                Some(p) if p.is_collection() => {}
                _ => return Err(BackendError::Conflict),
            }
            let props = node.props.clone();
            // existing members of the destination stay untouched.
            let entry = tree.entry(dk).or_insert_with(|| MemNode::new(None));
            if !entry.is_collection() {
                return Err(BackendError::Conflict);
            }
            entry.props = props;
            Ok(())
        }
        .boxed()
    }

    fn get_live_prop<'a>(
        &'a self,
        uri: &'a DavPath,
        ns: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, String> {
        async move {
            if ns != "DAV:" {
                return Err(BackendError::NotFound);
            }
            let tree = &*self.tree.lock().unwrap();
            let node = tree.get(&key(uri)).ok_or(BackendError::NotFound)?;
            match name {
                "creationdate" => Ok(iso8601_date(node.crtime)),
                "getlastmodified" => Ok(rfc1123_date(node.mtime)),
                "getetag" => Ok(node.etag()),
                "getcontentlength" => Ok(node.len().to_string()),
                "getcontenttype" => {
                    if node.is_collection() {
                        return Ok("httpd/unix-directory".to_string());
                    }
                    let stored = node.object.as_ref().and_then(|o| o.content_type.clone());
                    Ok(stored
                        .or_else(|| self.sniff(uri))
                        .unwrap_or_else(|| "application/octet-stream".to_string()))
                }
                // nobody gets to see the display name by default.
                "displayname" => Err(BackendError::Secret),
                _ => Err(BackendError::NotFound),
            }
        }
        .boxed()
    }

    fn get_dead_prop<'a>(
        &'a self,
        uri: &'a DavPath,
        prop: &'a PropName,
    ) -> BackendFuture<'a, String> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            let node = tree.get(&key(uri)).ok_or(BackendError::NotFound)?;
            node.props.get(prop).cloned().ok_or(BackendError::NotFound)
        }
        .boxed()
    }

    fn set_dead_prop<'a>(
        &'a self,
        uri: &'a DavPath,
        prop: &'a PropName,
        xml: &'a str,
    ) -> BackendFuture<'a, ()> {
        async move {
            if prop.is_dav() {
                return Err(BackendError::Forbidden);
            }
            let tree = &mut *self.tree.lock().unwrap();
            let node = tree.get_mut(&key(uri)).ok_or(BackendError::NotFound)?;
            node.props.insert(prop.clone(), xml.to_string());
            Ok(())
        }
        .boxed()
    }

    fn del_dead_prop<'a>(&'a self, uri: &'a DavPath, prop: &'a PropName) -> BackendFuture<'a, ()> {
        async move {
            if prop.is_dav() {
                return Err(BackendError::Forbidden);
            }
            let tree = &mut *self.tree.lock().unwrap();
            let node = tree.get_mut(&key(uri)).ok_or(BackendError::NotFound)?;
            node.props.remove(prop);
            Ok(())
        }
        .boxed()
    }

    fn list_all_propnames<'a>(&'a self, uri: &'a DavPath) -> BackendFuture<'a, Vec<PropName>> {
        async move {
            let tree = &*self.tree.lock().unwrap();
            let node = tree.get(&key(uri)).ok_or(BackendError::NotFound)?;
            let mut names: Vec<PropName> = node.props.keys().cloned().collect();
            names.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
            Ok(names)
        }
        .boxed()
    }
}
