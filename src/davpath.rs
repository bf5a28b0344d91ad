//! The path part of a request URL, normalized and percent-decoded,
//! with an optional hidden mount prefix.
use std::error::Error;

use percent_encoding as pct;

use crate::errors::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// URL path with hidden prefix. A trailing slash marks a collection.
#[derive(Clone)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: usize,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.path()))
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.fullpath))
    }
}

/// Error returned by the `DavPath` constructors.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of the configured prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn valid_segment(src: &[u8]) -> Result<(), ParseError> {
    let mut p = pct::percent_decode(src);
    if p.any(|x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    if rp.iter().any(|&x| !(32..127).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // query part gets cut off, fragments are refused.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(ParseError::InvalidPath);
    }

    let isdir = rawpath.ends_with(b"/");
    let mut segs: Vec<&[u8]> = Vec::new();
    for segment in rawpath.split(|&c| c == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                if segs.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => {
                valid_segment(s)?;
                segs.push(s);
            }
        }
    }

    let mut path = Vec::with_capacity(rawpath.len());
    for seg in &segs {
        path.push(b'/');
        path.extend(pct::percent_decode(seg));
    }
    if isdir || segs.is_empty() {
        path.push(b'/');
    }
    Ok(path)
}

// encode a decoded path back to its canonical URL form.
fn encode_path(src: &[u8]) -> String {
    pct::percent_encode(src, PATH_ENCODE_SET).to_string()
}

/// Comparison ignores any trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        strip_slash(&self.fullpath) == strip_slash(&rhs.fullpath)
    }
}

impl Eq for DavPath {}

fn strip_slash(p: &[u8]) -> &[u8] {
    if p.len() > 1 && p.ends_with(b"/") {
        &p[..p.len() - 1]
    } else {
        p
    }
}

// like strip_slash, but maps the root to the empty string so that
// prefix arithmetic works segment-wise.
fn anchored(p: &[u8]) -> &[u8] {
    let s = strip_slash(p);
    if s == b"/" { b"" } else { s }
}

impl DavPath {
    /// From a URL-encoded path.
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        Ok(DavPath {
            fullpath: normalize_path(src.as_bytes())?,
            pfxlen: 0,
        })
    }

    /// From a URL-encoded path and a non-encoded prefix to strip.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let mut path = DavPath::new(src)?;
        path.set_prefix(prefix)?;
        Ok(path)
    }

    /// From a request URI.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                fullpath: b"*".to_vec(),
                pfxlen: 0,
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let prefix = prefix.as_bytes();
        if !self.fullpath.starts_with(prefix) {
            return Err(ParseError::PrefixMismatch);
        }
        let mut pfxlen = prefix.len();
        if prefix.ends_with(b"/") {
            pfxlen -= 1;
            if self.fullpath[pfxlen] != b'/' {
                return Err(ParseError::PrefixMismatch);
            }
        } else if self.fullpath.len() == pfxlen {
            self.fullpath.push(b'/');
        }
        self.pfxlen = pfxlen;
        Ok(())
    }

    /// The decoded path without the prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.path()
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        std::str::from_utf8(&self.fullpath[..self.pfxlen]).unwrap_or("")
    }

    /// Canonical URL-encoded form, without the prefix.
    pub fn as_url_string(&self) -> String {
        encode_path(self.path())
    }

    /// Canonical URL-encoded form, prefix included. This is what goes
    /// into response hrefs.
    pub fn as_url_string_with_prefix(&self) -> String {
        encode_path(&self.fullpath)
    }

    /// Does the path denote a collection, i.e. does it end in `/`?
    pub fn is_collection(&self) -> bool {
        self.path().ends_with(b"/")
    }

    // is this a "star" request (only used with OPTIONS)
    pub(crate) fn is_star(&self) -> bool {
        self.path() == b"*"
    }

    /// Add a trailing slash if there is none.
    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    /// Conditionally add a trailing slash.
    pub fn add_slash_if(&mut self, b: bool) {
        if b {
            self.add_slash();
        }
    }

    /// Append one (decoded) segment.
    pub fn push_segment(&mut self, seg: &[u8]) {
        if !self.fullpath.ends_with(b"/") {
            self.fullpath.push(b'/');
        }
        self.fullpath.extend_from_slice(seg);
    }

    /// Parent collection of this path.
    pub fn parent(&self) -> DavPath {
        let path = strip_slash(self.path());
        let end = path.iter().rposition(|&c| c == b'/').unwrap_or(0);
        let mut fullpath = self.fullpath[..self.pfxlen].to_vec();
        fullpath.extend_from_slice(&path[..end]);
        fullpath.push(b'/');
        DavPath {
            fullpath,
            pfxlen: self.pfxlen,
        }
    }

    /// Is `self` a strict ancestor collection of `other`?
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        let a = anchored(self.path());
        let b = anchored(other.path());
        b.len() > a.len() && b.starts_with(a) && b[a.len()] == b'/'
    }

    /// Translate this path from below `src_root` to below `dst_root`.
    /// Used to compute COPY/MOVE destinations for subtree members.
    pub fn rebase(&self, src_root: &DavPath, dst_root: &DavPath) -> DavPath {
        let rel = &anchored(self.path())[anchored(src_root.path()).len()..];
        let mut fullpath = dst_root.fullpath[..dst_root.pfxlen].to_vec();
        fullpath.extend_from_slice(anchored(dst_root.path()));
        fullpath.extend_from_slice(rel);
        if fullpath.len() == dst_root.pfxlen {
            fullpath.push(b'/');
        }
        if self.is_collection() && !fullpath.ends_with(b"/") {
            fullpath.push(b'/');
        }
        DavPath {
            fullpath,
            pfxlen: dst_root.pfxlen,
        }
    }

    /// The last path segment. Empty for the root.
    pub fn file_name(&self) -> &[u8] {
        strip_slash(self.path())
            .split(|&c| c == b'/')
            .next_back()
            .unwrap_or(b"")
    }

    pub(crate) fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name();
        if let Some(idx) = name.iter().rposition(|&c| c == b'.') {
            if let Ok(ext) = std::str::from_utf8(&name[idx + 1..]) {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }

    fn path(&self) -> &[u8] {
        &self.fullpath[self.pfxlen..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[test]
    fn normalize() {
        assert_eq!(p("/a//b/./c").as_url_string(), "/a/b/c");
        assert_eq!(p("/a/b/../c/").as_url_string(), "/a/c/");
        assert_eq!(p("/a%20b").as_url_string(), "/a%20b");
        assert!(DavPath::new("/../x").is_err());
        assert!(DavPath::new("a/b").is_err());
        assert!(DavPath::new("/a#frag").is_err());
    }

    #[test]
    fn collection_slash() {
        assert!(p("/d/").is_collection());
        assert!(!p("/d").is_collection());
        assert_eq!(p("/d"), p("/d/"));
    }

    #[test]
    fn parent_and_segments() {
        assert_eq!(p("/a/b/c").parent().as_url_string(), "/a/b/");
        assert_eq!(p("/a/").parent().as_url_string(), "/");
        let mut x = p("/a/");
        x.push_segment(b"file.txt");
        assert_eq!(x.as_url_string(), "/a/file.txt");
    }

    #[test]
    fn ancestry_and_rebase() {
        assert!(p("/d/").is_ancestor_of(&p("/d/a.txt")));
        assert!(p("/").is_ancestor_of(&p("/d")));
        assert!(!p("/d/").is_ancestor_of(&p("/dx/a")));
        let moved = p("/d/sub/x.txt").rebase(&p("/d/"), &p("/e/"));
        assert_eq!(moved.as_url_string(), "/e/sub/x.txt");
        let root = p("/d/").rebase(&p("/d/"), &p("/e/"));
        assert_eq!(root.as_url_string(), "/e/");
    }

    #[test]
    fn prefix() {
        let path = DavPath::from_str_and_prefix("/dav/a/b", "/dav").unwrap();
        assert_eq!(path.as_url_string(), "/a/b");
        assert_eq!(path.as_url_string_with_prefix(), "/dav/a/b");
        assert!(DavPath::from_str_and_prefix("/other/a", "/dav").is_err());
    }

    #[test]
    fn mime_type() {
        assert_eq!(p("/x/y.txt").get_mime_type_str(), "text/plain");
        assert_eq!(p("/x/y").get_mime_type_str(), "application/octet-stream");
    }
}
