//! Object and action pattern matching.
//!
//! Object patterns are anchored and support a single trailing `*`:
//!
//! | Pattern          | Matches                                   |
//! |------------------|-------------------------------------------|
//! | `*`              | everything                                |
//! | `/logout`        | `/logout` only                            |
//! | `/users/alice*`  | `/users/alice`, `/users/alice/...`        |
//! | `/announcements/*` | anything under `/announcements/`      |
//!
//! A wildcard after a name segment does not cross into a longer name, so
//! `/users/alice*` does not match `/users/alice2`.

use crate::models::policy::WILDCARD;

/// Whether `object` (a request path) matches `pattern`.
pub fn object_matches(pattern: &str, object: &str) -> bool {
    let Some(prefix) = pattern.strip_suffix('*') else {
        return pattern == object;
    };

    if object == prefix {
        return true;
    }
    if prefix.is_empty() || prefix.ends_with('/') {
        return object.starts_with(prefix);
    }
    object
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Whether `action` (an HTTP method) matches `pattern`.
pub fn action_matches(pattern: &str, action: &str) -> bool {
    pattern == WILDCARD || pattern == action
}
