//! Admin role lookup.
//!
//! Role issuance lives in the identity provider; the credit core only needs
//! a yes/no capability check keyed by user id. Surfaces that embed this
//! crate implement [`RoleCheck`] against whatever directory they have.

use std::collections::HashSet;

/// Capability lookup for administrator-only operations.
pub trait RoleCheck: Send + Sync {
    /// Whether `user_id` holds the admin role.
    fn is_admin(&self, user_id: &str) -> bool;
}

/// Fixed in-memory admin list.
///
/// Suitable for tests and deployments where the admin set is known at
/// startup (e.g. loaded from configuration).
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    admins: HashSet<String>,
}

impl AdminList {
    /// Build a list from any collection of user ids.
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }
}

impl RoleCheck for AdminList {
    fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_list_membership() {
        let roles = AdminList::new(["admin_1", "admin_2"]);
        assert!(roles.is_admin("admin_1"));
        assert!(roles.is_admin("admin_2"));
        assert!(!roles.is_admin("user_1"));
        assert!(!roles.is_admin(""));
    }

    #[test]
    fn test_empty_list_grants_nothing() {
        let roles = AdminList::default();
        assert!(!roles.is_admin("anyone"));
    }
}
