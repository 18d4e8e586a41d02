/*!
 * # Permissions Module
 *
 * Permissions are single bits of an `i32` mask stored on each role. A role grants a
 * permission when every bit of that permission is set in its mask; `ADMIN` implies all
 * other permissions at check time.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(i32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const ADD_PARTS: Permission = Permission(1);
    pub const EDIT_PARTS: Permission = Permission(2);
    pub const DELETE_PARTS: Permission = Permission(4);
    pub const GENERATE_QR: Permission = Permission(8);
    pub const VIEW_AUDIT_LOG: Permission = Permission(16);
    pub const MANAGE_STAGES: Permission = Permission(32);
    pub const MANAGE_ROUTES: Permission = Permission(64);
    pub const VIEW_REPORTS: Permission = Permission(128);
    pub const MANAGE_USERS: Permission = Permission(256);
    pub const ADMIN: Permission = Permission(512);

    /// Every defined bit
    pub const ALL: Permission = Permission(1023);

    const NAMED: [(&'static str, Permission); 10] = [
        ("ADD_PARTS", Permission::ADD_PARTS),
        ("EDIT_PARTS", Permission::EDIT_PARTS),
        ("DELETE_PARTS", Permission::DELETE_PARTS),
        ("GENERATE_QR", Permission::GENERATE_QR),
        ("VIEW_AUDIT_LOG", Permission::VIEW_AUDIT_LOG),
        ("MANAGE_STAGES", Permission::MANAGE_STAGES),
        ("MANAGE_ROUTES", Permission::MANAGE_ROUTES),
        ("VIEW_REPORTS", Permission::VIEW_REPORTS),
        ("MANAGE_USERS", Permission::MANAGE_USERS),
        ("ADMIN", Permission::ADMIN),
    ];

    /// Builds a mask from raw bits, dropping undefined ones.
    pub const fn from_bits(bits: i32) -> Self {
        Permission(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }

    /// Grant check used for requests: administrators pass every check.
    pub const fn allows(self, other: Permission) -> bool {
        self.contains(Self::ADMIN) || self.contains(other)
    }

    pub fn insert(&mut self, other: Permission) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Permission) {
        self.0 &= !other.0;
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Folds a list of raw bit values into one mask
    pub fn from_list(bits: &[i32]) -> Self {
        bits.iter()
            .fold(Permission::NONE, |acc, bit| acc | Permission::from_bits(*bit))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, permission)| *permission)
    }

    /// Names of the individual permissions set in this mask, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, permission)| self.contains(*permission))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn defined() -> impl Iterator<Item = (&'static str, Permission)> {
        Self::NAMED.into_iter()
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Permission) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join("|"))
    }
}
