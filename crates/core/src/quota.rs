//! Capacity accounting.
//!
//! All changes to a user's `storage` counter go through [`Quota`]. The
//! persistence layer performs each change as one conditional update, so
//! concurrent reservations can never push a user over `max_storage`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::User;
use crate::repository::{RepoError, UserRepository};

/// Capacity ledger over the user repository.
#[derive(Clone)]
pub struct Quota {
    users: Arc<dyn UserRepository>,
}

impl Quota {
    /// Creates a ledger.
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Reserves `size` bytes. Returns `false` when the group limit would be
    /// exceeded; nothing is charged in that case.
    pub async fn increase(&self, user: &mut User, size: u64) -> Result<bool, RepoError> {
        if size == 0 {
            return Ok(true);
        }
        let applied = self.users.increase_storage(user.id, size).await?;
        if applied {
            user.storage = user.storage.saturating_add(size);
        }
        Ok(applied)
    }

    /// Charges `size` bytes regardless of the group limit.
    pub async fn increase_without_check(&self, user: &mut User, size: u64) -> Result<(), RepoError> {
        if size == 0 {
            return Ok(());
        }
        self.users.increase_storage_without_check(user.id, size).await?;
        user.storage = user.storage.saturating_add(size);
        Ok(())
    }

    /// Releases `size` bytes, flooring at zero. Returns whether the full
    /// amount was deducted. Persistence failures are logged, not returned.
    pub async fn deduct(&self, user: &mut User, size: u64) -> bool {
        if size == 0 {
            return true;
        }
        match self.users.deduct_storage(user.id, size).await {
            Ok(full) => {
                user.storage = user.storage.saturating_sub(size);
                full
            }
            Err(e) => {
                tracing::warn!(user_id = user.id, size, error = %e, "failed to deduct storage");
                false
            }
        }
    }
}

/// One-shot record of an outstanding reservation.
///
/// Cloned into every failure hook of an upload; only the first `take`
/// yields the amount.
#[derive(Debug, Clone, Default)]
pub struct RefundGuard(Arc<AtomicU64>);

impl RefundGuard {
    /// Records a reservation of `size` bytes.
    pub fn arm(&self, size: u64) {
        self.0.fetch_add(size, Ordering::SeqCst);
    }

    /// Takes the outstanding amount, leaving zero behind.
    #[must_use]
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::SeqCst)
    }

    /// Outstanding amount without consuming it.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
