//! Access-control presets for namespace entries.
//!
//! Only two identities matter for the coordination primitives: the entry's
//! creator and everyone else. An [`Acl`] records a permission set for each,
//! which is all the presets the group layer uses ever need.

use serde::Deserialize;
use serde::Serialize;

/// A bitset of entry permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perms(u32);

impl Perms {
    /// No permissions.
    pub const NONE: Perms = Perms(0);
    /// Read entry data and list children.
    pub const READ: Perms = Perms(1);
    /// Overwrite entry data.
    pub const WRITE: Perms = Perms(1 << 1);
    /// Create children under the entry.
    pub const CREATE: Perms = Perms(1 << 2);
    /// Delete the entry.
    pub const DELETE: Perms = Perms(1 << 3);
    /// Change the entry's ACL.
    pub const ADMIN: Perms = Perms(1 << 4);
    /// All of the above.
    pub const ALL: Perms = Perms(0b11111);

    /// Union of two permission sets.
    pub const fn union(self, other: Perms) -> Perms {
        Perms(self.0 | other.0)
    }

    /// True if every permission in `other` is present in `self`.
    pub const fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Access-control policy for a namespace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// Permissions granted to any session, authenticated or not.
    pub everyone: Perms,
    /// Permissions granted to the creating session (or a session
    /// authenticated as the same principal).
    pub creator: Perms,
}

impl Acl {
    /// Anyone may read; the creator has full control.
    pub const EVERYONE_READ_CREATOR_ALL: Acl = Acl {
        everyone: Perms::READ,
        creator: Perms::ALL,
    };

    /// Anyone may read and create children; the creator has full control.
    pub const EVERYONE_CREATE_AND_READ_CREATOR_ALL: Acl = Acl {
        everyone: Perms::READ.union(Perms::CREATE),
        creator: Perms::ALL,
    };

    /// No restrictions. Used for transparently created ancestor entries.
    pub const OPEN: Acl = Acl {
        everyone: Perms::ALL,
        creator: Perms::ALL,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_bitset_contains() {
        assert!(Perms::ALL.contains(Perms::DELETE));
        assert!(Perms::READ.union(Perms::CREATE).contains(Perms::CREATE));
        assert!(!Perms::READ.contains(Perms::WRITE));
        assert!(Perms::NONE.contains(Perms::NONE));
    }

    #[test]
    fn presets_grant_expected_rights() {
        let acl = Acl::EVERYONE_READ_CREATOR_ALL;
        assert!(acl.everyone.contains(Perms::READ));
        assert!(!acl.everyone.contains(Perms::WRITE));
        assert!(acl.creator.contains(Perms::ALL));

        let acl = Acl::EVERYONE_CREATE_AND_READ_CREATOR_ALL;
        assert!(acl.everyone.contains(Perms::CREATE));
        assert!(!acl.everyone.contains(Perms::DELETE));
    }
}
