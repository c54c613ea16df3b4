//! Users and the groups that bound their capacity.

use serde::{Deserialize, Serialize};

use super::policy::Policy;

/// Account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum UserStatus {
    /// Normal account.
    Active = 0,
    /// Registered but not yet confirmed.
    NotActivated = 1,
    /// Disabled by an administrator.
    Banned = 2,
    /// Disabled for exceeding capacity.
    OveruseBanned = 3,
}

impl UserStatus {
    /// Maps a stored integer to a status, treating unknown values as banned.
    #[must_use]
    pub const fn from_i16(value: i16) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::NotActivated,
            3 => Self::OveruseBanned,
            _ => Self::Banned,
        }
    }

    /// The stored integer.
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        self as i16
    }
}

/// A user group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Capacity granted to each member, in bytes.
    pub max_storage: u64,
    /// Policies members may use; the first one is active.
    pub policy_list: Vec<i64>,
    /// Download speed cap in bytes per second, 0 for none.
    pub speed_limit: i64,
}

/// A user with its group and active policy resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: i64,
    /// Login email.
    pub email: String,
    /// Display name.
    pub nick: String,
    /// Account state.
    pub status: UserStatus,
    /// Group ID.
    pub group_id: i64,
    /// Bytes currently charged.
    pub storage: u64,
    /// Resolved group.
    pub group: Group,
    /// Resolved active policy.
    pub policy: Policy,
}

impl User {
    /// Bytes the user may still reserve.
    #[must_use]
    pub fn remaining_capacity(&self) -> u64 {
        self.group.max_storage.saturating_sub(self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_remaining_capacity_floors_at_zero() {
        let mut user = fixtures::user(1, 100);
        user.storage = 40;
        assert_eq!(user.remaining_capacity(), 60);

        user.storage = 140;
        assert_eq!(user.remaining_capacity(), 0);
    }

    #[test]
    fn test_status_from_i16() {
        assert_eq!(UserStatus::from_i16(0), UserStatus::Active);
        assert_eq!(UserStatus::from_i16(3), UserStatus::OveruseBanned);
        assert_eq!(UserStatus::from_i16(42), UserStatus::Banned);
        assert_eq!(UserStatus::from_i16(UserStatus::NotActivated.as_i16()), UserStatus::NotActivated);
    }
}
