//! Typed versions of the WebDAV request headers, on the
//! `headers::Header` trait so they plug into `HeaderMapExt`.
use std::fmt::Display;
use std::str::FromStr;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

static DEPTH: HeaderName = HeaderName::from_static("depth");
static TIMEOUT: HeaderName = HeaderName::from_static("timeout");
static OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
static DESTINATION: HeaderName = HeaderName::from_static("destination");
static ETAG: HeaderName = HeaderName::from_static("etag");
static IF_MATCH: HeaderName = HeaderName::from_static("if-match");
static IF_NONE_MATCH: HeaderName = HeaderName::from_static("if-none-match");
static IF: HeaderName = HeaderName::from_static("if");

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

// helper.
fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// helper.
fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

macro_rules! string_header {
    ($tname:ident, $hname:ident, $sname:expr) => {
        static $hname: HeaderName = HeaderName::from_static($sname);

        #[derive(Debug, Clone, PartialEq)]
        pub struct $tname(pub String);

        impl Header for $tname {
            fn name() -> &'static HeaderName {
                &$hname
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                one(values)?
                    .to_str()
                    .map(|x| $tname(x.to_owned()))
                    .map_err(map_invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                if let Ok(value) = HeaderValue::from_str(&self.0) {
                    values.extend(std::iter::once(value));
                }
            }
        }
    };
}

string_header!(ContentLocation, CONTENT_LOCATION, "content-location");
string_header!(LockToken, LOCK_TOKEN, "lock-token");

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            b"infinity" | b"Infinity" => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "Infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// One element of the Timeout: header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header, `Second-NNN` and `Infinite` entries in preference
/// order.
#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for word in one(values)?.to_str().map_err(map_invalid)?.split(',') {
            let word = word.trim();
            let w = match word {
                "Infinite" => DavTimeout::Infinite,
                _ => match word.strip_prefix("Second-") {
                    Some(num) => match num.parse::<u32>() {
                        Ok(n) => DavTimeout::Seconds(n),
                        Err(_) => return Err(invalid()),
                    },
                    None => return Err(invalid()),
                },
            };
            v.push(w);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|s| match s {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&value) {
            values.extend(std::iter::once(value));
        }
    }
}

/// Destination: header, reduced to the URL path.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?;
        if s.starts_with('/') {
            return Ok(Destination(s.to_string()));
        }
        let url = url::Url::parse(s).map_err(map_invalid)?;
        if !url.scheme().starts_with("http") {
            return Err(invalid());
        }
        Ok(Destination(url.path().to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}

/// Overwrite: header, `T` or `F`.
#[derive(Debug, Clone, PartialEq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.as_bytes() {
            b"F" => Ok(Overwrite(false)),
            b"T" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// An entity tag, quoted wire form retained.
#[derive(Debug, Clone)]
pub struct ETag {
    tag: String,
    weak: bool,
}

impl ETag {
    /// Build an ETag from an opaque backend value (no quotes).
    pub fn new(weak: bool, t: impl Into<String>) -> Result<ETag, headers::Error> {
        let t = t.into();
        if t.contains('"') {
            return Err(invalid());
        }
        let w = if weak { "W/" } else { "" };
        Ok(ETag {
            tag: format!("{}\"{}\"", w, t),
            weak,
        })
    }
}

impl FromStr for ETag {
    type Err = headers::Error;

    fn from_str(t: &str) -> Result<Self, Self::Err> {
        let (weak, s) = match t.strip_prefix("W/") {
            Some(t) => (true, t),
            None => (false, t),
        };
        if s.len() >= 2
            && s.starts_with('"')
            && s.ends_with('"')
            && !s[1..s.len() - 1].contains('"')
        {
            Ok(ETag {
                tag: t.to_owned(),
                weak,
            })
        } else {
            Err(invalid())
        }
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag)
    }
}

/// Strong comparison: weak tags never match.
impl PartialEq for ETag {
    fn eq(&self, other: &Self) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }
}

impl Header for ETag {
    fn name() -> &'static HeaderName {
        &ETAG
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?;
        ETag::from_str(s)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.tag) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The value of If-Match / If-None-Match: `*` or a list of tags.
#[derive(Debug, Clone, PartialEq)]
pub enum ETagList {
    Tags(Vec<ETag>),
    Star,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfMatch(pub ETagList);

#[derive(Debug, Clone, PartialEq)]
pub struct IfNoneMatch(pub ETagList);

// Decode a list of etags. Misformed etags are skipped: they can never
// match anything we generated.
fn decode_etaglist<'i, I>(values: &mut I) -> Result<ETagList, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let mut v = Vec::new();
    let mut count = 0usize;
    for value in values {
        let s = value.to_str().map_err(map_invalid)?;
        if s.trim() == "*" {
            return Ok(ETagList::Star);
        }
        for t in s.split(',') {
            if let Ok(t) = ETag::from_str(t.trim()) {
                v.push(t);
            }
        }
        count += 1;
    }
    if count != 0 {
        Ok(ETagList::Tags(v))
    } else {
        Err(invalid())
    }
}

fn encode_etaglist<E>(m: &ETagList, values: &mut E)
where
    E: Extend<HeaderValue>,
{
    let value = match m {
        ETagList::Star => "*".to_string(),
        ETagList::Tags(t) => t
            .iter()
            .map(|t| t.tag.as_str())
            .collect::<Vec<&str>>()
            .join(", "),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        values.extend(std::iter::once(value));
    }
}

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfNoneMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_etaglist(&self.0, values)
    }
}

/// The If: header (RFC 4918 10.4): a sequence of tagged lists whose
/// results are ORed.
#[derive(Debug, Clone, PartialEq)]
pub struct If(pub Vec<IfList>);

/// One tagged list: an optional resource tag and conditions that are
/// ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct IfList {
    pub resource_tag: Option<url::Url>,
    pub conditions: Vec<IfCondition>,
}

impl IfList {
    fn new() -> IfList {
        IfList {
            resource_tag: None,
            conditions: Vec::new(),
        }
    }
}

/// A single `[Not] <state-token>` or `[Not] [etag]` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IfItem {
    StateToken(String),
    ETag(ETag),
}

// lexer tokens for the If: header.
#[derive(Debug, PartialEq)]
enum IfToken {
    ListOpen,
    ListClose,
    Not,
    Coded(String),
    ETag(ETag),
    End,
}

fn scan_delimited(buf: &[u8], close: u8) -> Result<(&str, &[u8]), headers::Error> {
    let end = buf
        .iter()
        .position(|&c| c == close)
        .ok_or_else(invalid)?;
    let inner = std::str::from_utf8(&buf[1..end]).map_err(map_invalid)?;
    Ok((inner, &buf[end + 1..]))
}

fn next_token(buf: &[u8]) -> Result<(IfToken, &[u8]), headers::Error> {
    let mut i = 0;
    while i < buf.len() && (buf[i] as char).is_ascii_whitespace() {
        i += 1;
    }
    let buf = &buf[i..];
    match buf.first() {
        None => Ok((IfToken::End, buf)),
        Some(b'(') => Ok((IfToken::ListOpen, &buf[1..])),
        Some(b')') => Ok((IfToken::ListClose, &buf[1..])),
        Some(b'N') if buf.starts_with(b"Not") => Ok((IfToken::Not, &buf[3..])),
        Some(b'<') => {
            let (s, rest) = scan_delimited(buf, b'>')?;
            Ok((IfToken::Coded(s.to_string()), rest))
        }
        Some(b'[') => {
            let (s, rest) = scan_delimited(buf, b']')?;
            Ok((IfToken::ETag(ETag::from_str(s)?), rest))
        }
        Some(_) => Err(invalid()),
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists: Vec<IfList> = Vec::new();
        let mut cur = IfList::new();
        let mut input = one(values)?.as_bytes();
        // the most recent resource tag; it covers every list up to the
        // next tag.
        let mut tag: Option<url::Url> = None;
        let mut in_list = false;
        let mut not = false;

        loop {
            let (tok, rest) = next_token(input)?;
            input = rest;
            if in_list {
                match tok {
                    IfToken::Not if !not => not = true,
                    IfToken::Coded(stok) => {
                        // a state token must look like an URI.
                        if !stok.contains(':') {
                            return Err(invalid());
                        }
                        cur.conditions.push(IfCondition {
                            not: std::mem::take(&mut not),
                            item: IfItem::StateToken(stok),
                        });
                    }
                    IfToken::ETag(etag) => {
                        cur.conditions.push(IfCondition {
                            not: std::mem::take(&mut not),
                            item: IfItem::ETag(etag),
                        });
                    }
                    IfToken::ListClose if !not && !cur.conditions.is_empty() => {
                        cur.resource_tag = tag.clone();
                        lists.push(std::mem::replace(&mut cur, IfList::new()));
                        in_list = false;
                    }
                    _ => return Err(invalid()),
                }
            } else {
                match tok {
                    IfToken::ListOpen => in_list = true,
                    IfToken::Coded(url) => {
                        tag = Some(url::Url::parse(&url).map_err(map_invalid)?);
                    }
                    IfToken::End if !lists.is_empty() => break,
                    _ => return Err(invalid()),
                }
            }
        }
        Ok(If(lists))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        // only ever decoded.
        values.extend(std::iter::once(HeaderValue::from_static("")));
    }
}

/// Extract the token part from a `<opaquelocktoken:...>` coded URL or a
/// bare `opaquelocktoken:...` string. ETags yield `None`.
pub(crate) fn token_finder(item: &str) -> Option<&str> {
    if item.is_empty() || item.starts_with('[') {
        return None;
    }
    let item = item
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(item);
    item.split_once(':').map(|(_, tok)| tok)
}
