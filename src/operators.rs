//! Controller-scoped operator delegation

use std::sync::Arc;

use tracing::info;

pub struct OperatorApprovalRegistry {
    instance: Arc<sled::Db>,
}

impl OperatorApprovalRegistry {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    // identities are bech32 strings, so '/' never appears inside them
    fn db_key(controller: &str, operator: &str) -> Vec<u8> {
        format!("op/{controller}/{operator}").into_bytes()
    }

    /// Grant or revoke `operator`'s right to act for `controller`.
    /// Idempotent; the caller has already been verified to be the
    /// controller itself.
    pub fn set(&self, controller: &str, operator: &str, approved: bool) -> anyhow::Result<()> {
        let key = Self::db_key(controller, operator);
        if approved {
            self.instance.insert(key, &[1u8][..])?;
        } else {
            self.instance.remove(key)?;
        }

        info!(controller, operator, approved, "operator approval changed");
        Ok(())
    }

    /// Default false for any pair never set.
    pub fn is_approved(&self, controller: &str, operator: &str) -> anyhow::Result<bool> {
        Ok(self
            .instance
            .get(Self::db_key(controller, operator))?
            .is_some())
    }
}
