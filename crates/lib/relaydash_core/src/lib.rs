//! # relaydash_core
//!
//! Identity and access control for Relaydash: token signing and verification,
//! per-user signing keys, the refresh token registry, caller classification,
//! and the policy engine that gates every request.

pub mod access;
pub mod auth;
pub mod migrate;
pub mod models;
pub mod policy;
pub mod store;

pub use access::AccessControl;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
