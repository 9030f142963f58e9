//! Route-pattern compiler and match cache.
//!
//! A route key is a compact pattern language over path segments:
//!
//! | Syntax              | Matches                                            |
//! |---------------------|----------------------------------------------------|
//! | `/users`            | the literal segment                                |
//! | `/:id`              | any single segment, captured as `id`               |
//! | `/:id([0-9]+)`      | a segment constrained by an inline regex           |
//! | `/:dir(!secrets)`   | any segment *except* the listed literals           |
//! | `/docs{/extra}`     | with or without the optional group                 |
//! | `/files/*rest`      | zero or more trailing segments, captured as a list |
//! | `regex:^/v\d+/.*$`  | a raw regex over the whole pathname                |
//!
//! Keys compile lazily on first match and are cached for the lifetime of the
//! owning [`Pipeline`](crate::Pipeline). Match results are memoized per
//! `(key, mode, pathname)` so hot paths never re-run the regex engine.
//! A malformed key surfaces as [`Error::Pattern`] on every use — an invalid
//! pattern is a broken configuration, not a silent non-match.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use crate::error::Error;

// ── Params ────────────────────────────────────────────────────────────────────

/// A single captured route parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    /// One path segment (`:id`).
    One(String),
    /// Zero or more path segments (`*rest`).
    Many(Vec<String>),
}

impl ParamValue {
    /// The captured segment, for single-segment params. `None` for wildcards.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(_) => None,
        }
    }

    /// The captured segments. A single-segment param yields a one-element slice.
    pub fn segments(&self) -> &[String] {
        match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v,
        }
    }
}

/// Named parameters extracted by a pattern match.
///
/// Cheap to clone — the map is behind an `Arc` and shared by every handler
/// in a resolved chain.
#[derive(Clone, Debug, Default)]
pub struct Params(Arc<HashMap<String, ParamValue>>);

impl Params {
    pub(crate) fn new(map: HashMap<String, ParamValue>) -> Self {
        Self(Arc::new(map))
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Single-segment param as `&str`. `None` if absent or a wildcard.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(ParamValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Ancestor params overlaid with `other`; `other` wins on collision.
    pub(crate) fn merged(&self, other: &Params) -> Params {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut map = (*self.0).clone();
        for (k, v) in other.0.iter() {
            map.insert(k.clone(), v.clone());
        }
        Self::new(map)
    }
}

// ── Compiled pattern ──────────────────────────────────────────────────────────

/// How a compiled pattern anchors against the pathname.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Anchor {
    /// The whole pathname must match — leaf routes.
    Exact,
    /// Match up to a segment boundary — tree nodes with children, so `/admin`
    /// covers `/admin` and `/admin/users` but never `/administrator`.
    Prefix,
}

/// A route key compiled to a regex plus post-match bookkeeping.
#[derive(Debug)]
pub(crate) struct Pattern {
    regex: Regex,
    /// Param name → forbidden literal values (`:dir(!secrets)`).
    exclusions: Vec<(String, Vec<String>)>,
    /// Name of the trailing wildcard capture, if any.
    wildcard: Option<String>,
}

impl Pattern {
    pub(crate) fn compile(key: &str, anchor: Anchor) -> Result<Self, Error> {
        if let Some(raw) = key.strip_prefix("regex:") {
            let regex = Regex::new(raw).map_err(|e| Error::pattern(key, e.to_string()))?;
            return Ok(Self { regex, exclusions: Vec::new(), wildcard: None });
        }
        if !key.starts_with('/') {
            return Err(Error::pattern(key, "must start with `/` or `regex:`"));
        }
        let mut c = Compiler::new(key);
        c.run()?;
        let mut source = String::with_capacity(c.out.len() + 16);
        source.push('^');
        source.push_str(&c.out);
        match anchor {
            Anchor::Exact => {}
            Anchor::Prefix => source.push_str("(?:/.*)?"),
        }
        source.push('$');
        let regex = Regex::new(&source).map_err(|e| Error::pattern(key, e.to_string()))?;
        Ok(Self { regex, exclusions: c.exclusions, wildcard: c.wildcard })
    }

    /// Matches a decoded pathname. `None` is an honest non-match; compile
    /// failures never reach here.
    pub(crate) fn matches(&self, pathname: &str) -> Option<Params> {
        let caps = self.regex.captures(pathname)?;
        let mut map = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            let Some(m) = caps.name(name) else { continue };
            let value = m.as_str();
            if self.wildcard.as_deref() == Some(name) {
                let segments = if value.is_empty() {
                    Vec::new()
                } else {
                    value.split('/').map(str::to_owned).collect()
                };
                map.insert(name.to_owned(), ParamValue::Many(segments));
            } else {
                map.insert(name.to_owned(), ParamValue::One(value.to_owned()));
            }
        }
        if let Some(name) = &self.wildcard {
            // zero matched segments still yields the (empty) param
            map.entry(name.clone()).or_insert_with(|| ParamValue::Many(Vec::new()));
        }
        for (name, forbidden) in &self.exclusions {
            if let Some(ParamValue::One(v)) = map.get(name) {
                if forbidden.iter().any(|f| f == v) {
                    return None;
                }
            }
        }
        Some(Params::new(map))
    }
}

// ── Key → regex translation ───────────────────────────────────────────────────

struct Compiler<'a> {
    key: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    out: String,
    exclusions: Vec<(String, Vec<String>)>,
    wildcard: Option<String>,
    depth: usize,
}

impl<'a> Compiler<'a> {
    fn new(key: &'a str) -> Self {
        Self {
            key,
            chars: key.chars().peekable(),
            out: String::new(),
            exclusions: Vec::new(),
            wildcard: None,
            depth: 0,
        }
    }

    fn run(&mut self) -> Result<(), Error> {
        while let Some(ch) = self.chars.next() {
            if self.wildcard.is_some() {
                return Err(Error::pattern(self.key, "wildcard must be the final token"));
            }
            match ch {
                '{' => {
                    self.depth += 1;
                    self.out.push_str("(?:");
                }
                '}' => {
                    if self.depth == 0 {
                        return Err(Error::pattern(self.key, "unbalanced `}`"));
                    }
                    self.depth -= 1;
                    self.out.push_str(")?");
                }
                ':' => self.param()?,
                '/' => {
                    if self.chars.peek() == Some(&'*') {
                        self.chars.next();
                        self.tail_wildcard()?;
                    } else {
                        self.out.push('/');
                    }
                }
                other => self.out.push_str(&regex::escape(&other.to_string())),
            }
        }
        if self.depth != 0 {
            return Err(Error::pattern(self.key, "unbalanced `{`"));
        }
        Ok(())
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        name
    }

    fn param(&mut self) -> Result<(), Error> {
        let name = self.ident();
        if name.is_empty() {
            return Err(Error::pattern(self.key, "`:` must be followed by a parameter name"));
        }
        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            let inner = self.balanced_parens()?;
            if let Some(list) = inner.strip_prefix('!') {
                // exclusion list: any segment except the listed literals
                let forbidden = list.split(",!").map(str::to_owned).collect();
                self.exclusions.push((name.clone(), forbidden));
                self.out.push_str(&format!("(?P<{name}>[^/]+)"));
            } else {
                self.out.push_str(&format!("(?P<{name}>{inner})"));
            }
        } else {
            self.out.push_str(&format!("(?P<{name}>[^/]+)"));
        }
        Ok(())
    }

    /// Consumes up to the `)` closing an already-opened group.
    fn balanced_parens(&mut self) -> Result<String, Error> {
        let mut inner = String::new();
        let mut depth = 1usize;
        for c in self.chars.by_ref() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                }
                _ => {}
            }
            inner.push(c);
        }
        Err(Error::pattern(self.key, "unbalanced `(`"))
    }

    /// `/ *name` already consumed up to the `*`. The leading slash folds into
    /// the optional group so `/files/*rest` also matches `/files`.
    fn tail_wildcard(&mut self) -> Result<(), Error> {
        let name = self.ident();
        if name.is_empty() {
            return Err(Error::pattern(self.key, "`*` must be followed by a parameter name"));
        }
        self.out.push_str(&format!("(?:/(?P<{name}>.*))?"));
        self.wildcard = Some(name);
        Ok(())
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Compiled-pattern and match-result caches.
///
/// Shared read-mostly state across concurrent invocations; keys never include
/// anything request-specific beyond the decoded pathname, so entries are safe
/// to reuse. [`MatcherCache::clear`] may be called at any time — in-flight
/// invocations hold `Arc`s to the patterns they are using.
pub(crate) struct MatcherCache {
    compiled: DashMap<(String, Anchor), Arc<Pattern>>,
    results: DashMap<(String, Anchor, String), Option<Params>>,
}

/// Cache occupancy, for diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Distinct compiled `(pattern, mode)` entries.
    pub compiled_patterns: usize,
    /// Memoized `(pattern, mode, pathname)` match results.
    pub memoized_matches: usize,
}

impl MatcherCache {
    pub(crate) fn new() -> Self {
        Self { compiled: DashMap::new(), results: DashMap::new() }
    }

    pub(crate) fn match_path(
        &self,
        key: &str,
        anchor: Anchor,
        pathname: &str,
    ) -> Result<Option<Params>, Error> {
        let result_key = (key.to_owned(), anchor, pathname.to_owned());
        if let Some(hit) = self.results.get(&result_key) {
            return Ok(hit.clone());
        }
        let pattern = match self.compiled.get(&(key.to_owned(), anchor)) {
            Some(p) => Arc::clone(&p),
            None => {
                // Only successful compiles are cached: a broken key must keep
                // erroring on every use, not degrade into a non-match.
                let p = Arc::new(Pattern::compile(key, anchor)?);
                self.compiled.insert((key.to_owned(), anchor), Arc::clone(&p));
                p
            }
        };
        let outcome = pattern.matches(pathname);
        self.results.insert(result_key, outcome.clone());
        Ok(outcome)
    }

    pub(crate) fn clear(&self) {
        self.compiled.clear();
        self.results.clear();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            compiled_patterns: self.compiled.len(),
            memoized_matches: self.results.len(),
        }
    }
}

// ── Pathname decoding ─────────────────────────────────────────────────────────

/// Strict percent-decoding of a request pathname.
///
/// `urlencoding::decode` passes malformed `%` sequences through untouched, so
/// hex pairs are validated first — a bad escape is a caller-visible
/// [`Error::Decode`], never a silent literal match. Invalid UTF-8 after
/// decoding errors the same way.
pub(crate) fn decode_pathname(raw: &str) -> Result<String, Error> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(Error::decode(raw));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    match urlencoding::decode(raw) {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) => Err(Error::decode(raw)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
