//! Policy grants, membership edges and subject naming.

use serde::{Deserialize, Serialize};

/// Separator between a synthetic subject's kind and its name.
pub const SUBJECT_SEPARATOR: &str = "::";

/// Subject evaluated for callers that resolved to no identity.
pub const ANONYMOUS_SUBJECT: &str = "role::anonymous";

/// Name of the administrative group.
pub const ADMIN_GROUP: &str = "admin";

/// Wildcard matching every object or every action.
pub const WILDCARD: &str = "*";

/// Subject for the group called `name`.
pub fn group_subject(name: &str) -> String {
    format!("group{SUBJECT_SEPARATOR}{name}")
}

/// Subject for the node with the given id.
pub fn node_subject(id: i64) -> String {
    format!("node{SUBJECT_SEPARATOR}{id}")
}

/// A `(subject, object-pattern, action-pattern)` permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl Grant {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// The bootstrap grant giving the admin group every permission.
    pub fn admin_bootstrap() -> Self {
        Self::new(group_subject(ADMIN_GROUP), WILDCARD, WILDCARD)
    }
}

/// `(member, group-subject)` edge conferring the group's grants on `member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    pub member: String,
    pub group: String,
}

impl Membership {
    pub fn new(member: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            group: group.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_subjects_use_separator() {
        assert_eq!(group_subject("staff"), "group::staff");
        assert_eq!(node_subject(7), "node::7");
        assert!(ANONYMOUS_SUBJECT.contains(SUBJECT_SEPARATOR));
    }

    #[test]
    fn admin_bootstrap_grant_is_universal() {
        let grant = Grant::admin_bootstrap();
        assert_eq!(grant.subject, "group::admin");
        assert_eq!(grant.object, WILDCARD);
        assert_eq!(grant.action, WILDCARD);
    }
}
