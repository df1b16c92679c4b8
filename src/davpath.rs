//! Resource URI handling (C1): normalization, percent-encoding, segment
//! manipulation. Internal paths are stored percent-decoded; encoding only
//! happens on emission (`as_url_string`).

use std::error::Error;
use std::ffi::OsStr;
#[cfg(target_os = "windows")]
use std::ffi::OsString;
#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use percent_encoding as pct;

// Encode all non-unreserved characters, except '/'. RFC 3986 pchar rules.
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Normalized resource path, with optional hidden mount-point prefix.
#[derive(Clone)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: Option<usize>,
}

/// Borrowed view of a [`DavPath`], without the prefix.
pub struct DavPathRef {
    fullpath: [u8],
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_pathbuf().display())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string())
    }
}

#[derive(Debug)]
pub enum ParseError {
    InvalidPath,
    PrefixMismatch,
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
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

fn encode_path(src: &[u8]) -> Vec<u8> {
    pct::percent_encode(src, PATH_ENCODE_SET).to_string().into_bytes()
}

// Normalize a raw request path: must be printable ASCII, absolute, no
// fragment, '.'/'. .' segments collapsed, percent-decoded, NUL/'/' rejected
// inside a decoded segment.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    if rp.iter().any(|&x| x < 32 || x > 126) {
        return Err(ParseError::InvalidPath);
    }

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

    let isdir = matches!(rawpath.last(), Some(b'/'));
    let segments = rawpath.split(|c| *c == b'/');
    let mut v: Vec<&[u8]> = Vec::new();
    for segment in segments {
        match segment {
            b"." | b"" => {},
            b".." => {
                if v.len() < 2 {
                    return Err(ParseError::ForbiddenPath);
                }
                v.pop();
                v.pop();
            },
            s => {
                valid_segment(s)?;
                v.push(b"/");
                v.push(s);
            },
        }
    }
    if isdir || v.is_empty() {
        v.push(b"/");
    }
    Ok(v.iter().flat_map(|s| pct::percent_decode(s)).collect())
}

/// Comparison ignores a trailing slash, so `/foo == /foo/`.
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        let mut a = self.fullpath.as_slice();
        if a.len() > 1 && a.ends_with(b"/") {
            a = &a[..a.len() - 1];
        }
        let mut b = rhs.fullpath.as_slice();
        if b.len() > 1 && b.ends_with(b"/") {
            b = &b[..b.len() - 1];
        }
        a == b
    }
}

impl DavPath {
    /// From a percent-encoded path string (e.g. `req.uri().path()`).
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        Ok(DavPath { fullpath: path, pfxlen: None })
    }

    pub fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let path = &mut self.fullpath;
        let prefix = prefix.as_bytes();
        if !path.starts_with(prefix) {
            return Err(ParseError::PrefixMismatch);
        }
        let mut pfxlen = prefix.len();
        if prefix.ends_with(b"/") {
            pfxlen -= 1;
            if path[pfxlen] != b'/' {
                return Err(ParseError::PrefixMismatch);
            }
        } else if path.len() == pfxlen {
            path.push(b'/');
        }
        self.pfxlen = Some(pfxlen);
        Ok(())
    }

    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let mut davpath = DavPath { fullpath: path, pfxlen: None };
        davpath.set_prefix(prefix)?;
        Ok(davpath)
    }

    /// Build from `req.uri()`, stripping `prefix` (the gateway's mount
    /// point) from the front.
    pub fn from_uri(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath { fullpath: b"*".to_vec(), pfxlen: None }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    pub(crate) fn add_slash_if(&mut self, b: bool) {
        if b && !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    pub(crate) fn push_segment(&mut self, b: &[u8]) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
        self.fullpath.extend_from_slice(b);
    }

    fn get_prefix(&self) -> &[u8] {
        &self.fullpath[..self.pfxlen.unwrap_or(0)]
    }

    pub fn prefix(&self) -> &str {
        std::str::from_utf8(self.get_prefix()).unwrap()
    }

    /// Return the parent collection's path.
    pub fn parent(&self) -> DavPath {
        let mut segs = self
            .fullpath
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        segs.pop();
        if !segs.is_empty() {
            segs.push(b"");
        }
        segs.insert(0, b"");
        DavPath { pfxlen: self.pfxlen, fullpath: segs.join(&b'/').to_vec() }
    }

    /// As a URL-encoded string, with the prefix restored.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = encode_path(self.get_path());
        if !self.get_prefix().is_empty() {
            let mut u = encode_path(self.get_prefix());
            u.extend_from_slice(&p);
            p = u;
        }
        String::from_utf8(p).unwrap()
    }
}

impl std::ops::Deref for DavPath {
    type Target = DavPathRef;

    fn deref(&self) -> &DavPathRef {
        let pfxlen = self.pfxlen.unwrap_or(0);
        DavPathRef::new(&self.fullpath[pfxlen..])
    }
}

impl DavPathRef {
    // Safety: same trick std::path::Path::new() uses — &[u8] and
    // &DavPathRef have the same layout since DavPathRef is a newtype over
    // an unsized [u8].
    fn new(path: &[u8]) -> &DavPathRef {
        unsafe { &*(path as *const [u8] as *const DavPathRef) }
    }

    /// Raw decoded bytes, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.get_path()
    }

    pub fn as_pathbuf(&self) -> PathBuf {
        let mut b = self.get_path();
        if b.len() > 1 && b.ends_with(b"/") {
            b = &b[..b.len() - 1];
        }
        #[cfg(not(target_os = "windows"))]
        let os_string = OsStr::from_bytes(b).to_owned();
        #[cfg(target_os = "windows")]
        let os_string = OsString::from(String::from_utf8(b.to_vec()).unwrap());
        PathBuf::from(os_string)
    }

    /// Percent-encoded string, used as a storage key and for log output.
    pub fn as_url_string(&self) -> String {
        let p = encode_path(self.get_path());
        String::from_utf8(p).unwrap()
    }

    /// Does the original request path end in `/`.
    pub fn is_collection(&self) -> bool {
        self.get_path().ends_with(b"/")
    }

    fn get_path(&self) -> &[u8] {
        &self.fullpath
    }

    pub(crate) fn is_star(&self) -> bool {
        self.get_path() == b"*"
    }

    pub fn as_rel_ospath(&self) -> &Path {
        let spath = self.get_path();
        let mut path = if !spath.is_empty() { &spath[1..] } else { spath };
        if path.ends_with(b"/") {
            path = &path[..path.len() - 1];
        }
        #[cfg(not(target_os = "windows"))]
        let os_string = OsStr::from_bytes(path);
        #[cfg(target_os = "windows")]
        let os_string: &OsStr = std::str::from_utf8(path).unwrap().as_ref();
        Path::new(os_string)
    }

    /// Last path segment, the storage-key "name". Empty for the root.
    pub fn file_name_bytes(&self) -> &[u8] {
        let segs = self
            .get_path()
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        segs.last().copied().unwrap_or(b"")
    }

    pub fn file_name(&self) -> Option<&str> {
        let name = self.file_name_bytes();
        if name.is_empty() { None } else { std::str::from_utf8(name).ok() }
    }

    pub fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name_bytes();
        let d = name.rsplitn(2, |&c| c == b'.').collect::<Vec<&[u8]>>();
        if d.len() > 1 {
            if let Ok(ext) = std::str::from_utf8(d[0]) {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dotdot_and_slashes() {
        let p = DavPath::new("/a/b/../c//d/").unwrap();
        assert_eq!(p.as_url_string(), "/a/c/d/");
        assert!(p.is_collection());
    }

    #[test]
    fn rejects_escaping_dotdot() {
        assert!(DavPath::new("/../etc/passwd").is_err());
    }

    #[test]
    fn encode_decode_round_trip_is_idempotent() {
        let p = DavPath::new("/docs/r%C3%A9sum%C3%A9.txt").unwrap();
        let encoded = p.as_url_string();
        let p2 = DavPath::new(&encoded).unwrap();
        assert_eq!(p2.as_url_string(), encoded);
    }

    #[test]
    fn file_name_is_last_segment() {
        let p = DavPath::new("/docs/sub/file.txt").unwrap();
        assert_eq!(p.file_name(), Some("file.txt"));
    }

    #[test]
    fn parent_of_collection_drops_last_segment() {
        let p = DavPath::new("/docs/sub/").unwrap();
        assert_eq!(p.parent().as_url_string(), "/docs/");
    }

    #[test]
    fn trailing_slash_insensitive_equality() {
        assert_eq!(DavPath::new("/docs").unwrap(), DavPath::new("/docs/").unwrap());
    }
}
