//! Durable store and lookup of redemption requests
//!
//! Requests are permanent audit records: they are created once per queued
//! shortfall, never deleted, and the only field that ever changes is the
//! terminal `is_claimed` flag. Keys are derived deterministically from the
//! registry identity, the owner, and a strictly-increasing per-owner
//! sequence number, so repeated requests in the same logical step can never
//! collide.

use std::sync::Arc;

use chrono::Utc;
use sled::Batch;
use tracing::debug;

use crate::accounting::{AccountingState, Amount};
use crate::error::EngineError;
use crate::utils::{self, TimeStamp};

const REGISTRY_ID_KEY: &[u8] = b"registry/id";

/// One queued obligation. Immutable except for `is_claimed`.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RedemptionRequest {
    /// Amount of underlying asset still owed, fixed at creation.
    #[n(0)]
    pub requested_assets: Amount,
    /// Cumulative-requested counter taken right after this request was
    /// recorded. The request becomes claimable once recovered liquidity
    /// reaches this watermark.
    #[n(1)]
    pub cumulative_at_creation: Amount,
    /// Shares burned for the queued leg, kept for auditing.
    #[n(2)]
    pub requested_shares: Amount,
    /// Logical creation time, observability only.
    #[n(3)]
    pub created_at: TimeStamp<Utc>,
    #[n(4)]
    pub owner: String,
    #[n(5)]
    pub receiver: String,
    #[n(6)]
    pub controller: String,
    #[n(7)]
    pub is_claimed: bool,
}

pub struct RequestRegistry {
    instance: Arc<sled::Db>,
    registry_id: String,
}

impl RequestRegistry {
    /// Load the registry over an existing database, generating and
    /// persisting its identity on first open. The identity must stay stable
    /// across reopens so key derivation stays deterministic.
    pub fn open(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        let registry_id = match instance.get(REGISTRY_ID_KEY)? {
            Some(raw) => String::from_utf8(raw.to_vec())?,
            None => {
                let id = utils::new_uuid_to_bech32("reg_")?;
                instance.insert(REGISTRY_ID_KEY, id.as_bytes())?;
                id
            }
        };

        Ok(Self {
            instance,
            registry_id,
        })
    }

    fn request_db_key(key: &str) -> Vec<u8> {
        format!("req/{key}").into_bytes()
    }

    fn sequence_db_key(owner: &str) -> Vec<u8> {
        format!("seq/{owner}").into_bytes()
    }

    fn next_sequence(&self, owner: &str) -> anyhow::Result<u64> {
        let current = match self.instance.get(Self::sequence_db_key(owner))? {
            Some(raw) => u64::from_be_bytes(raw.as_ref().try_into()?),
            None => 0,
        };
        Ok(current + 1)
    }

    // hash of (registry identity, owner, sequence) encoded into cbor
    fn derive_key(&self, owner: &str, sequence: u64) -> anyhow::Result<String> {
        let cbor = minicbor::to_vec((self.registry_id.as_str(), owner, sequence))?;
        let digest = sha256::digest(&cbor);
        let bytes = hex::decode(&digest)?;
        utils::bytes_to_bech32("req_", &bytes[..20])
    }

    /// Store a new request and return its key. The record and the sequence
    /// bump land in one batch so no observer sees one without the other.
    pub fn create(
        &self,
        owner: &str,
        receiver: &str,
        controller: &str,
        requested_assets: Amount,
        requested_shares: Amount,
        watermark: Amount,
    ) -> anyhow::Result<String> {
        let sequence = self.next_sequence(owner)?;
        let key = self.derive_key(owner, sequence)?;

        let db_key = Self::request_db_key(&key);
        if self.instance.contains_key(&db_key)? {
            // unreachable while the sequence counter is managed correctly
            return Err(EngineError::DuplicateKey.into());
        }

        let request = RedemptionRequest {
            requested_assets,
            cumulative_at_creation: watermark,
            requested_shares,
            created_at: TimeStamp::new(),
            owner: owner.to_string(),
            receiver: receiver.to_string(),
            controller: controller.to_string(),
            is_claimed: false,
        };

        let mut batch = Batch::default();
        batch.insert(db_key, minicbor::to_vec(&request)?);
        batch.insert(Self::sequence_db_key(owner), &sequence.to_be_bytes()[..]);
        self.instance.apply_batch(batch)?;

        debug!(key = key.as_str(), owner, requested_assets, watermark, "request queued");
        Ok(key)
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<RedemptionRequest>> {
        match self.instance.get(Self::request_db_key(key))? {
            Some(raw) => Ok(Some(minicbor::decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    /// False if absent, already claimed, or empty; otherwise the accounting
    /// watermark predicate decides.
    pub fn is_claimable(
        &self,
        key: &str,
        state: &AccountingState,
        on_hand: Amount,
        external_claimable: Amount,
    ) -> anyhow::Result<bool> {
        let Some(request) = self.get(key)? else {
            return Ok(false);
        };
        if request.is_claimed || request.requested_assets == 0 {
            return Ok(false);
        }

        Ok(state.is_claimable(request.cumulative_at_creation, on_hand, external_claimable))
    }

    /// Flip the terminal flag and return the owed amount. The flip is
    /// persisted before the caller issues any external payout, which closes
    /// the reentrant double-claim window.
    pub fn mark_claimed(
        &self,
        key: &str,
        state: &AccountingState,
        on_hand: Amount,
        external_claimable: Amount,
    ) -> anyhow::Result<Amount> {
        let Some(mut request) = self.get(key)? else {
            return Err(EngineError::NotClaimable { key: key.into() }.into());
        };
        if request.is_claimed {
            return Err(EngineError::AlreadyClaimed { key: key.into() }.into());
        }
        if request.requested_assets == 0
            || !state.is_claimable(request.cumulative_at_creation, on_hand, external_claimable)
        {
            return Err(EngineError::NotClaimable { key: key.into() }.into());
        }

        request.is_claimed = true;
        self.instance
            .insert(Self::request_db_key(key), minicbor::to_vec(&request)?)?;

        Ok(request.requested_assets)
    }
}
