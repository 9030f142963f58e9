//! Nested route tree and chain resolution.
//!
//! A [`Routes`] node is the tagged shape the executor consumes uniformly:
//! an ordered list of the node's own middleware plus ordered
//! `(pattern, subtree)` children. One `.handle()` call models a single
//! handler, several model a handler list, `.nest()` hangs a subtree under a
//! path key. Declaration order is preserved — overlapping keys resolve in
//! the order you wrote them.
//!
//! Resolution turns the tree plus a decoded pathname into flat, ordered
//! chains, outermost ancestor first: a node that has children matches as a
//! prefix (its own middleware runs before any matched descendant's), while a
//! childless node must match the pathname exactly — `/foo` alone never
//! matches `/foo/bar`.

use std::sync::Arc;

use crate::error::Error;
use crate::handler::{BoxedMiddleware, Middleware};
use crate::pattern::{Anchor, MatcherCache, Params};

// ── Routes ────────────────────────────────────────────────────────────────────

/// A node in the route tree. Build it once; hand it to
/// [`Pipeline::builder`](crate::Pipeline::builder).
///
/// ```rust
/// # use trellis::{BoxError, Event, Outcome, Request, Routes};
/// # async fn audit(_: Request, _: Event) -> Result<Outcome, BoxError> { Ok(Outcome::Next) }
/// # async fn list_users(_: Request, _: Event) -> Result<Outcome, BoxError> { Ok(Outcome::Next) }
/// # async fn show_item(_: Request, _: Event) -> Result<Outcome, BoxError> { Ok(Outcome::Next) }
/// let routes = Routes::new()
///     .route("/shop/:category/:id", show_item)
///     .nest("/admin", Routes::new()
///         .handle(audit)                  // runs for every /admin/... match
///         .route("/users", list_users));
/// ```
#[derive(Default)]
pub struct Routes {
    own: Vec<BoxedMiddleware>,
    children: Vec<(String, Routes)>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends middleware to this node. On the root, it acts as an ancestor
    /// for every matched route.
    pub fn handle(mut self, mw: impl Middleware) -> Self {
        self.own.push(mw.into_boxed());
        self
    }

    /// Mounts a subtree under a path key.
    pub fn nest(mut self, pattern: impl Into<String>, routes: Routes) -> Self {
        self.children.push((pattern.into(), routes));
        self
    }

    /// Leaf shorthand: `nest(pattern, Routes::new().handle(mw))`.
    pub fn route(self, pattern: impl Into<String>, mw: impl Middleware) -> Self {
        self.nest(pattern, Routes::new().handle(mw))
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// One handler scheduled to run, with everything its metadata needs.
#[derive(Clone)]
pub(crate) struct ResolvedEntry {
    pub(crate) mw: BoxedMiddleware,
    pub(crate) route_key: String,
    pub(crate) params: Params,
    pub(crate) nest_level: Option<usize>,
}

pub(crate) type ResolvedChain = Vec<ResolvedEntry>;

/// Produces the ordered matching chains for a decoded pathname,
/// ancestors-first within each chain, declaration order across chains.
pub(crate) fn resolve(
    root: &Routes,
    pathname: &str,
    cache: &MatcherCache,
) -> Result<Vec<ResolvedChain>, Error> {
    let mut out = Vec::new();
    let ancestors: Vec<ResolvedEntry> = root
        .own
        .iter()
        .map(|mw| ResolvedEntry {
            mw: Arc::clone(mw),
            route_key: String::new(),
            params: Params::default(),
            nest_level: Some(0),
        })
        .collect();
    walk(root, "", 0, pathname, &ancestors, &Params::default(), cache, &mut out)?;
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    node: &Routes,
    prefix: &str,
    level: usize,
    pathname: &str,
    ancestors: &[ResolvedEntry],
    params: &Params,
    cache: &MatcherCache,
    out: &mut Vec<ResolvedChain>,
) -> Result<(), Error> {
    for (pattern, child) in &node.children {
        let full = join_key(prefix, pattern);
        if child.children.is_empty() {
            // leaf: the whole pathname must match
            if let Some(matched) = cache.match_path(&full, Anchor::Exact, pathname)? {
                let merged = params.merged(&matched);
                let mut chain = ancestors.to_vec();
                chain.extend(entries(child, &full, &merged, level));
                if !chain.is_empty() {
                    out.push(chain);
                }
            }
        } else if let Some(matched) = cache.match_path(&full, Anchor::Prefix, pathname)? {
            let merged = params.merged(&matched);
            let mut next = ancestors.to_vec();
            next.extend(entries(child, &full, &merged, level));
            let found_before = out.len();
            walk(child, &full, level + 1, pathname, &next, &merged, cache, out)?;
            // pathname terminating at the node itself: the node's own
            // middleware is the chain, unless a descendant already matched
            if out.len() == found_before
                && !child.own.is_empty()
                && cache.match_path(&full, Anchor::Exact, pathname)?.is_some()
            {
                out.push(next);
            }
        }
    }
    Ok(())
}

fn entries(node: &Routes, key: &str, params: &Params, level: usize) -> Vec<ResolvedEntry> {
    node.own
        .iter()
        .map(|mw| ResolvedEntry {
            mw: Arc::clone(mw),
            route_key: key.to_owned(),
            params: params.clone(),
            nest_level: Some(level),
        })
        .collect()
}

/// Route keys concatenate down the tree. Raw-regex keys are absolute: they
/// always match against the whole pathname, wherever they sit.
fn join_key(prefix: &str, pattern: &str) -> String {
    if pattern.starts_with("regex:") {
        pattern.to_owned()
    } else {
        format!("{prefix}{pattern}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::event::Event;
    use crate::outcome::Outcome;
    use crate::request::Request;

    async fn noop(_: Request, _: Event) -> Result<Outcome, BoxError> {
        Ok(Outcome::Next)
    }

    fn keys(chains: &[ResolvedChain]) -> Vec<Vec<String>> {
        chains
            .iter()
            .map(|c| c.iter().map(|e| e.route_key.clone()).collect())
            .collect()
    }

    #[test]
    fn leaf_requires_exact_match() {
        let routes = Routes::new().route("/foo", noop);
        let cache = MatcherCache::new();
        assert_eq!(resolve(&routes, "/foo", &cache).unwrap().len(), 1);
        assert!(resolve(&routes, "/foo/bar", &cache).unwrap().is_empty());
    }

    #[test]
    fn ancestors_come_first() {
        let routes = Routes::new().nest(
            "/admin",
            Routes::new().handle(noop).route("/users", noop),
        );
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/admin/users", &cache).unwrap();
        assert_eq!(keys(&chains), vec![vec!["/admin".to_owned(), "/admin/users".to_owned()]]);
        let levels: Vec<_> = chains[0].iter().map(|e| e.nest_level).collect();
        assert_eq!(levels, vec![Some(0), Some(1)]);
    }

    #[test]
    fn nested_node_matches_its_own_path() {
        let routes = Routes::new().nest(
            "/admin",
            Routes::new().handle(noop).route("/users", noop),
        );
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/admin", &cache).unwrap();
        assert_eq!(keys(&chains), vec![vec!["/admin".to_owned()]]);
    }

    #[test]
    fn sibling_branches_do_not_fire() {
        let routes = Routes::new()
            .nest("/admin", Routes::new().handle(noop).route("/users", noop))
            .route("/other", noop);
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/admin/users", &cache).unwrap();
        assert_eq!(chains.len(), 1);
        assert!(chains[0].iter().all(|e| e.route_key.starts_with("/admin")));
    }

    #[test]
    fn declaration_order_across_overlapping_keys() {
        let routes = Routes::new().route("/:any", noop).route("/exact", noop);
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/exact", &cache).unwrap();
        assert_eq!(keys(&chains), vec![vec!["/:any".to_owned()], vec!["/exact".to_owned()]]);
    }

    #[test]
    fn params_merge_down_the_tree() {
        let routes = Routes::new().nest(
            "/orgs/:org",
            Routes::new().handle(noop).route("/repos/:repo", noop),
        );
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/orgs/acme/repos/site", &cache).unwrap();
        let leaf = chains[0].last().unwrap();
        assert_eq!(leaf.params.get_str("org"), Some("acme"));
        assert_eq!(leaf.params.get_str("repo"), Some("site"));
        // ancestor already sees its own param
        assert_eq!(chains[0][0].params.get_str("org"), Some("acme"));
    }

    #[test]
    fn handler_list_preserves_registration_order() {
        let routes = Routes::new().nest("/x", Routes::new().handle(noop).handle(noop));
        let cache = MatcherCache::new();
        let chains = resolve(&routes, "/x", &cache).unwrap();
        assert_eq!(chains[0].len(), 2);
    }

    #[test]
    fn broken_pattern_propagates() {
        let routes = Routes::new().route("/:id([", noop);
        let cache = MatcherCache::new();
        assert!(matches!(resolve(&routes, "/1", &cache), Err(Error::Pattern { .. })));
    }
}
