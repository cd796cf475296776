//! Resource locators.
//!
//! A locator addresses any resource the core can resolve, using the syntax
//! `scheme://[authority][/path][?key=value&...]`. Locators are normalized on
//! parse (lowercase scheme, no empty / `.` / `..` path segments, sorted query)
//! so that structural equality and equality of the printed form coincide.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};

/// Scheme of real filesystem files.
pub const FILE_SCHEME: &str = "file";

const PATH_RESERVED: &[char] = &['%', '/', '?', '#'];
const QUERY_RESERVED: &[char] = &['%', '&', '=', '#'];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceLocator {
    scheme: String,
    authority: Option<String>,
    segments: Vec<String>,
    query: BTreeMap<String, String>,
}

impl ResourceLocator {
    /// Parses a locator string.
    ///
    /// Query pairs are split on `&`, then on the first `=`. A pair without `=`
    /// fails the whole parse. When a key repeats, the last value wins.
    pub fn parse(input: &str) -> VfsResult<Self> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| VfsError::malformed(input, "missing \"://\" separator"))?;

        if !is_valid_scheme(scheme) {
            return Err(VfsError::malformed(input, format!("invalid scheme {:?}", scheme)));
        }

        let (before_query, raw_query) = match rest.split_once('?') {
            Some((before, query)) => (before, Some(query)),
            None => (rest, None),
        };

        let (raw_authority, raw_path) = match before_query.find('/') {
            Some(index) => (&before_query[..index], &before_query[index..]),
            None => (before_query, ""),
        };

        let authority = if raw_authority.is_empty() {
            None
        } else {
            Some(decode(input, raw_authority)?)
        };

        let mut segments = Vec::new();
        for raw in raw_path.split('/') {
            push_segment(&mut segments, decode(input, raw)?);
        }

        let mut query = BTreeMap::new();
        if let Some(raw_query) = raw_query.filter(|q| !q.is_empty()) {
            for pair in raw_query.split('&') {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    VfsError::malformed(input, format!("query pair {:?} has no '='", pair))
                })?;
                let key = decode(input, key)?;
                if key.is_empty() {
                    return Err(VfsError::malformed(input, "empty query key"));
                }
                query.insert(key, decode(input, value)?);
            }
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority,
            segments,
            query,
        })
    }

    /// Builds a `file://` locator for a local path. Relative paths are
    /// resolved against the current directory.
    pub fn from_path(path: &Path) -> Self {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };

        let mut segments = Vec::new();
        for component in absolute.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_string_lossy().to_string()),
                Component::ParentDir => {
                    segments.pop();
                }
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            }
        }

        Self {
            scheme: FILE_SCHEME.to_string(),
            authority: None,
            segments,
            query: BTreeMap::new(),
        }
    }

    /// Builds a locator from already-decoded parts.
    pub fn from_parts(scheme: &str, authority: Option<&str>, path: &str) -> VfsResult<Self> {
        if !is_valid_scheme(scheme) {
            return Err(VfsError::malformed(scheme, "invalid scheme"));
        }
        let mut segments = Vec::new();
        for raw in path.split('/') {
            push_segment(&mut segments, raw.to_string());
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.filter(|a| !a.is_empty()).map(str::to_string),
            segments,
            query: BTreeMap::new(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The decoded path, always starting with `/`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last path segment, if any.
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Lowercased extension of the last segment.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Locator of the enclosing folder; the query is dropped.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.without_query();
        parent.segments.pop();
        Some(parent)
    }

    /// Locator of a direct child named `name`; the query is dropped.
    pub fn child(&self, name: &str) -> Self {
        let mut child = self.without_query();
        for part in name.split('/') {
            push_segment(&mut child.segments, part.to_string());
        }
        child
    }

    pub fn without_query(&self) -> Self {
        Self {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            segments: self.segments.clone(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_query_param(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Same scheme and authority, and `prefix`'s segments lead this path.
    pub fn starts_with(&self, prefix: &ResourceLocator) -> bool {
        self.scheme == prefix.scheme
            && self.authority == prefix.authority
            && self.segments.starts_with(&prefix.segments)
    }

    /// Local filesystem path for `file://` locators.
    pub fn to_local_path(&self) -> Option<PathBuf> {
        if self.scheme != FILE_SCHEME {
            return None;
        }
        let mut path = PathBuf::from("/");
        for segment in &self.segments {
            path.push(segment);
        }
        Some(path)
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(authority) = &self.authority {
            f.write_str(&escape(authority, PATH_RESERVED))?;
        }
        if !self.segments.is_empty() {
            for segment in &self.segments {
                write!(f, "/{}", escape(segment, PATH_RESERVED))?;
            }
        } else if self.authority.is_none() {
            f.write_str("/")?;
        }
        let mut separator = '?';
        for (key, value) in &self.query {
            write!(
                f,
                "{}{}={}",
                separator,
                escape(key, QUERY_RESERVED),
                escape(value, QUERY_RESERVED)
            )?;
            separator = '&';
        }
        Ok(())
    }
}

impl FromStr for ResourceLocator {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceLocator {
    type Error = VfsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceLocator> for String {
    fn from(locator: ResourceLocator) -> Self {
        locator.to_string()
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn push_segment(segments: &mut Vec<String>, segment: String) {
    match segment.as_str() {
        "" | "." => {}
        ".." => {
            segments.pop();
        }
        _ => segments.push(segment),
    }
}

fn decode(input: &str, raw: &str) -> VfsResult<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| VfsError::malformed(input, "percent-escape is not valid UTF-8"))
}

fn escape(value: &str, reserved: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if reserved.contains(&c) || c.is_control() || c == ' ' {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{:02X}", byte));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &str) {
        let parsed = ResourceLocator::parse(input).unwrap();
        let reparsed = ResourceLocator::parse(&parsed.to_string()).unwrap();
        assert_eq!(parsed, reparsed, "{} printed as {}", input, parsed);
    }

    #[test]
    fn parses_all_components() {
        let locator = ResourceLocator::parse("find://home/user?pattern=*.txt&depth=2").unwrap();
        assert_eq!(locator.scheme(), "find");
        assert_eq!(locator.authority(), Some("home"));
        assert_eq!(locator.path(), "/user");
        assert_eq!(locator.query_param("pattern"), Some("*.txt"));
        assert_eq!(locator.query_param("depth"), Some("2"));
    }

    #[test]
    fn round_trips_through_display() {
        for input in [
            "file:///",
            "file:///home/user/notes.txt",
            "FILE:///tmp//a/./b/../c",
            "find://home/user?pattern=*.txt",
            "find:///srv?content=hello%20world&pattern=a%26b",
            "zip:///opt/app.jar/com/example/Main.class",
            "mem://scratch/dir%2Fwith%2Fslash/file%3F",
            "bookmark://",
            "ftp://user@host:21/pub/file name.tgz",
            "find:///?root=zip%3A%2F%2F%2Fa.zip",
        ] {
            roundtrip(input);
        }
    }

    #[test]
    fn normalizes_path_segments() {
        let a = ResourceLocator::parse("file:///tmp//a/./b/../c/").unwrap();
        let b = ResourceLocator::parse("file:///tmp/a/c").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "file:///tmp/a/c");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let a = ResourceLocator::parse("FiLe:///x").unwrap();
        assert_eq!(a.scheme(), "file");
        assert_eq!(a, ResourceLocator::parse("file:///x").unwrap());
    }

    #[test]
    fn duplicate_query_keys_keep_last_value() {
        let locator = ResourceLocator::parse("find:///tmp?pattern=*.rs&pattern=*.txt").unwrap();
        assert_eq!(locator.query_param("pattern"), Some("*.txt"));
        assert_eq!(locator.query().len(), 1);
    }

    #[test]
    fn query_order_does_not_affect_equality() {
        let a = ResourceLocator::parse("find:///tmp?a=1&b=2").unwrap();
        let b = ResourceLocator::parse("find:///tmp?b=2&a=1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn query_pair_without_equals_fails_the_parse() {
        for input in [
            "find:///tmp?pattern",
            "find:///tmp?pattern=*.txt&depth",
            "find:///tmp?a=1&&b=2",
        ] {
            match ResourceLocator::parse(input) {
                Err(VfsError::MalformedLocator { .. }) => {}
                other => panic!("expected MalformedLocator for {}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn value_may_contain_equals() {
        let locator = ResourceLocator::parse("find:///tmp?root=mem://x/y?a=b").unwrap();
        assert_eq!(locator.query_param("root"), Some("mem://x/y?a=b"));
        roundtrip("find:///tmp?root=mem://x/y?a=b");
    }

    #[test]
    fn rejects_malformed_strings() {
        for input in ["", "/home/user", "file:/tmp", "://x", "1abc://x", "we ird://x"] {
            assert!(
                matches!(
                    ResourceLocator::parse(input),
                    Err(VfsError::MalformedLocator { .. })
                ),
                "{} should be malformed",
                input
            );
        }
    }

    #[test]
    fn navigation_helpers() {
        let locator = ResourceLocator::parse("file:///home/user/report.PDF?x=1").unwrap();
        assert_eq!(locator.filename(), Some("report.PDF"));
        assert_eq!(locator.extension().as_deref(), Some("pdf"));

        let parent = locator.parent().unwrap();
        assert_eq!(parent.to_string(), "file:///home/user");
        assert_eq!(parent.child("other.txt").path(), "/home/user/other.txt");
        assert!(locator.starts_with(&parent));

        let root = ResourceLocator::parse("file:///").unwrap();
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert_eq!(ResourceLocator::parse(".hidden").ok(), None);
    }

    #[test]
    fn local_path_conversion() {
        let locator = ResourceLocator::from_path(Path::new("/var/tmp/../log/syslog"));
        assert_eq!(locator.to_string(), "file:///var/log/syslog");
        assert_eq!(locator.to_local_path(), Some(PathBuf::from("/var/log/syslog")));

        let remote = ResourceLocator::parse("mem://scratch/a").unwrap();
        assert!(remote.to_local_path().is_none());
    }

    #[test]
    fn serializes_as_string() {
        let locator = ResourceLocator::parse("find://home/user?pattern=*.txt").unwrap();
        let json = serde_json::to_string(&locator).unwrap();
        assert_eq!(json, "\"find://home/user?pattern=*.txt\"");
        let back: ResourceLocator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, locator);
        assert!(serde_json::from_str::<ResourceLocator>("\"nope\"").is_err());
    }
}
