//! Header snapshot diffing.
//!
//! The executor snapshots the request's header set before each handler call
//! and compares after it returns. The diff is an ordinary [`HeaderMap`]:
//! added or changed names carry their new values verbatim; a removed name
//! carries a single **empty value** as the deletion sentinel, so a consumer
//! can distinguish "deleted" from "never set". An explicit snapshot-compare
//! keeps the forwarding behavior auditable in isolation from the executor.

use http::header::{HeaderMap, HeaderValue};

/// Computes `after - before` as an add/update/delete set.
pub fn diff(before: &HeaderMap, after: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in after.keys() {
        let old: Vec<&HeaderValue> = before.get_all(name).iter().collect();
        let new: Vec<&HeaderValue> = after.get_all(name).iter().collect();
        if old != new {
            for value in new {
                out.append(name.clone(), value.clone());
            }
        }
    }
    for name in before.keys() {
        if !after.contains_key(name) {
            out.insert(name.clone(), HeaderValue::from_static(""));
        }
    }
    out
}

/// Applies a diff to a live header map: sentinel entries delete, everything
/// else replaces the name's values.
pub fn apply(target: &mut HeaderMap, diff: &HeaderMap) {
    for name in diff.keys() {
        let values: Vec<&HeaderValue> = diff.get_all(name).iter().collect();
        if values.len() == 1 && values[0].is_empty() {
            target.remove(name);
        } else {
            target.remove(name);
            for value in values {
                target.append(name.clone(), value.clone());
            }
        }
    }
}

/// Folds a per-handler diff into the accumulated diff for the invocation.
/// Unlike [`apply`], deletion sentinels are kept so the final consumer still
/// sees them.
pub fn fold(acc: &mut HeaderMap, diff: &HeaderMap) {
    for name in diff.keys() {
        acc.remove(name);
        for value in diff.get_all(name) {
            acc.append(name.clone(), value.clone());
        }
    }
}
