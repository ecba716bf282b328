//! Auth boundary (inert). Per the Open Question resolved in DESIGN.md,
//! nothing in this repository enforces these checks yet — the Protocol
//! Engine and WebConfig Engine dispatch every request regardless of
//! `AuthContext`. This module only carries the shape the original's
//! `auth.h`/`auth_init.h` exposed, so a future caller has somewhere to plug
//! in without redesigning the dispatch seam.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Guest,
    User,
    Operator,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    None,
    Read,
    Write,
    Admin,
}

/// One ACL rule: a resource pattern (supports the same wildcard rules as
/// parameter names) paired with the role/permission required to pass it.
#[derive(Debug, Clone)]
pub struct AclEntry {
    pub resource_pattern: String,
    pub required_permission: Permission,
    pub minimum_role: Role,
}

/// Identity attached to an inbound request, if the uplink transport ever
/// authenticates one. Nothing in this repository constructs a non-`None`
/// context today.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
    pub permissions: Permission,
}

/// Checks whether `context` satisfies `entry`. Exposed so the seam exists,
/// but no call site in this repository invokes it — dispatch is
/// unconditional, matching the Open Question's resolution.
#[must_use]
pub fn check_acl(entry: &AclEntry, context: &AuthContext) -> bool {
    context.role >= entry.minimum_role && context.permissions >= entry.required_permission
}

impl PartialOrd for Permission {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl Permission {
    fn rank(self) -> u8 {
        match self {
            Permission::None => 0,
            Permission::Read => 1,
            Permission::Write => 2,
            Permission::Admin => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_acl_passes_when_role_and_permission_meet_requirement() {
        let entry = AclEntry {
            resource_pattern: "Device.WiFi.".to_owned(),
            required_permission: Permission::Write,
            minimum_role: Role::Operator,
        };
        let ctx = AuthContext {
            user_id: "u1".to_owned(),
            role: Role::Admin,
            permissions: Permission::Admin,
        };
        assert!(check_acl(&entry, &ctx));
    }

    #[test]
    fn check_acl_fails_when_role_too_low() {
        let entry = AclEntry {
            resource_pattern: "Device.WiFi.".to_owned(),
            required_permission: Permission::Read,
            minimum_role: Role::Admin,
        };
        let ctx = AuthContext {
            user_id: "u1".to_owned(),
            role: Role::Guest,
            permissions: Permission::Admin,
        };
        assert!(!check_acl(&entry, &ctx));
    }
}
