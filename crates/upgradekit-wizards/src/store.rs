use upgradekit_common::Result;
use upgradekit_db::{Database, UserConfigRow};

/// Access to backend-user configurations needed by record-rewriting wizards.
pub trait UserConfigStore: Send + Sync {
    /// `uid` and `uc` of every backend user, with no access filtering.
    fn fetch_user_configs(&self) -> Result<Vec<UserConfigRow>>;

    /// Replace `uc` of the row whose `uid` equals `uid`.
    fn store_user_config(&self, uid: i64, uc: &[u8]) -> Result<()>;
}

impl UserConfigStore for Database {
    fn fetch_user_configs(&self) -> Result<Vec<UserConfigRow>> {
        self.user_configs()
    }

    fn store_user_config(&self, uid: i64, uc: &[u8]) -> Result<()> {
        self.update_user_config(uid, uc).map(|_| ())
    }
}
