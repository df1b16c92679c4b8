//! Typed WebDAV headers (C1), following the `headers::Header` trait the way
//! the rest of the HTTP stack expects.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_URL: Regex = Regex::new(r"https?://[^/]*([^#?]+).*$").unwrap();
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref ETAG: HeaderName = HeaderName::from_static("etag");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref CONTENT_LOCATION: HeaderName = HeaderName::from_static("content-location");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref X_LITMUS: HeaderName = HeaderName::from_static("x-litmus");
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where I: Iterator<Item = &'i HeaderValue> {
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() { Err(invalid()) } else { Ok(v) }
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

macro_rules! string_header {
    ($tname:ident, $hname:ident) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $tname(pub String);

        impl Header for $tname {
            fn name() -> &'static HeaderName {
                &$hname
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where I: Iterator<Item = &'i HeaderValue> {
                one(values)?.to_str().map(|x| $tname(x.to_owned())).map_err(map_invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where E: Extend<HeaderValue> {
                let value = HeaderValue::from_str(&self.0).unwrap();
                values.extend(std::iter::once(value))
            }
        }
    };
}

string_header!(ContentLocation, CONTENT_LOCATION);
string_header!(LockToken, LOCK_TOKEN);
string_header!(XLitmus, X_LITMUS);

/// `Depth:` header. Absent maps to `Infinity` at the call site, not here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
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
    where I: Iterator<Item = &'i HeaderValue> {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            b"infinity" | b"Infinity" => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where E: Extend<HeaderValue> {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "Infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// One entry of a `Timeout:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        let value = one(values)?;
        let mut v = Vec::new();
        let words = value.to_str().map_err(map_invalid)?.split(',').map(|s| s.trim());
        for word in words {
            let w = match word {
                "Infinite" => DavTimeout::Infinite,
                _ if word.starts_with("Second-") => match word[7..].parse::<u32>() {
                    Err(_) => return Err(invalid()),
                    Ok(n) => DavTimeout::Seconds(n),
                },
                _ => return Err(invalid()),
            };
            v.push(w);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where E: Extend<HeaderValue> {
        let value = self
            .0
            .iter()
            .map(|s| match s {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        values.extend(std::iter::once(HeaderValue::from_str(&value).unwrap()));
    }
}

/// `Destination:` header, normalized down to the path part.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        let s = one(values)?.to_str().map_err(map_invalid)?;
        if s.starts_with('/') {
            return Ok(Destination(s.to_string()));
        }
        if let Some(caps) = RE_URL.captures(s) {
            if let Some(path) = caps.get(1) {
                return Ok(Destination(path.as_str().to_string()));
            }
        }
        Err(invalid())
    }

    fn encode<E>(&self, values: &mut E)
    where E: Extend<HeaderValue> {
        values.extend(std::iter::once(HeaderValue::from_str(&self.0).unwrap()));
    }
}

/// `Overwrite:` header, `T` (default) or `F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        match one(values)?.as_bytes() {
            b"F" => Ok(Overwrite(false)),
            b"T" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where E: Extend<HeaderValue> {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// A parsed `ETag` (RFC 7232 §2.3), with the quotes normalized out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag {
    tag: String,
    weak: bool,
}

impl ETag {
    pub fn strong(t: impl Into<String>) -> ETag {
        ETag { tag: t.into(), weak: false }
    }
}

impl FromStr for ETag {
    type Err = headers::Error;

    fn from_str(t: &str) -> Result<Self, Self::Err> {
        let (weak, s) = if let Some(t) = t.strip_prefix("W/") { (true, t) } else { (false, t) };
        if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
            Ok(ETag { tag: s[1..s.len() - 1].to_string(), weak })
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<&HeaderValue> for ETag {
    type Error = headers::Error;

    fn try_from(value: &HeaderValue) -> Result<Self, Self::Error> {
        ETag::from_str(value.to_str().map_err(map_invalid)?)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.tag)
        } else {
            write!(f, "\"{}\"", self.tag)
        }
    }
}

impl Header for ETag {
    fn name() -> &'static HeaderName {
        &ETAG
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        ETag::try_from(one(values)?)
    }

    fn encode<E>(&self, values: &mut E)
    where E: Extend<HeaderValue> {
        values.extend(std::iter::once(HeaderValue::from_str(&self.to_string()).unwrap()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ETagList {
    Tags(Vec<ETag>),
    Star,
}

impl ETagList {
    /// Does this list match the given etag, per RFC 7232's strong/weak
    /// comparison rules for `If-Match`/`If-None-Match` (here: strong only,
    /// since the store never emits weak etags).
    pub fn matches(&self, etag: &ETag) -> bool {
        match self {
            ETagList::Star => true,
            ETagList::Tags(tags) => tags.iter().any(|t| t == etag),
        }
    }
}

fn decode_etaglist<'i, I>(values: &mut I) -> Result<ETagList, headers::Error>
where I: Iterator<Item = &'i HeaderValue> {
    let value = one(values)?.to_str().map_err(map_invalid)?;
    if value.trim() == "*" {
        return Ok(ETagList::Star);
    }
    let mut tags = Vec::new();
    for part in value.split(',') {
        tags.push(ETag::from_str(part.trim())?);
    }
    Ok(ETagList::Tags(tags))
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfMatch(pub ETagList);

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &http::header::IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        Ok(IfMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, _values: &mut E)
    where E: Extend<HeaderValue> {
        unimplemented!("server never emits If-Match")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNoneMatch(pub ETagList);

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &http::header::IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        Ok(IfNoneMatch(decode_etaglist(values)?))
    }

    fn encode<E>(&self, _values: &mut E)
    where E: Extend<HeaderValue> {
        unimplemented!("server never emits If-None-Match")
    }
}

/// The DAV `If:` header, minimal subset (SPEC_FULL.md §4.1): either
/// `(<token>)` or `<resource> (<token>)`. Returns the token, ignoring the
/// resource tag (this gateway only ever targets the request URI).
#[derive(Debug, Clone, PartialEq)]
pub struct If(pub Vec<String>);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where I: Iterator<Item = &'i HeaderValue> {
        let value = one(values)?.to_str().map_err(map_invalid)?;
        Ok(If(parse_if_tokens(value)))
    }

    fn encode<E>(&self, _values: &mut E)
    where E: Extend<HeaderValue> {
        unimplemented!("server never emits If")
    }
}

/// Extract every `opaquelocktoken:...` URI found inside any `(...)` list in
/// an `If:` header value. Full tagged-list "Not" / etag grammar is not
/// implemented, matching the spec's documented minimal subset.
fn parse_if_tokens(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(')') else { break };
        let inner = &after[..close];
        for word in inner.split_whitespace() {
            let w = word.trim_start_matches('<').trim_end_matches('>');
            if !w.is_empty() {
                tokens.push(w.to_string());
            }
        }
        rest = &after[close + 1..];
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_header_extracts_bare_token() {
        let tokens = parse_if_tokens("(<opaquelocktoken:1234>)");
        assert_eq!(tokens, vec!["opaquelocktoken:1234"]);
    }

    #[test]
    fn if_header_extracts_tagged_token() {
        let tokens = parse_if_tokens("</docs/a.txt> (<opaquelocktoken:1234>)");
        assert_eq!(tokens, vec!["opaquelocktoken:1234"]);
    }

    #[test]
    fn timeout_picks_up_multiple_entries() {
        let hv = HeaderValue::from_static("Second-60, Second-3600");
        let mut iter = std::iter::once(&hv);
        let t = Timeout::decode(&mut iter).unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(60), DavTimeout::Seconds(3600)]);
    }

    #[test]
    fn etag_star_matches_anything() {
        let list = ETagList::Star;
        assert!(list.matches(&ETag::strong("abc")));
    }
}
