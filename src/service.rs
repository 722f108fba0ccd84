//! Service layer API for the redemption lifecycle
//!
//! [`RedemptionService`] is the single entry point for redemption requests
//! and claims, and the serialization point for everything that touches the
//! accounting state: every mutating operation runs under one lock, so the
//! check-then-mutate steps inside a call can never interleave. External
//! collaborators (share ledger, asset vault) are only invoked after the
//! internal state for a step has been finalized and persisted.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::accounting::{AccountingState, Amount, NoStrategy, StrategySource};
use crate::error::EngineError;
use crate::governor::AllocationGovernor;
use crate::ledger::{AssetVault, RoleAuthorizer, Rounding, ShareLedger};
use crate::operators::OperatorApprovalRegistry;
use crate::registry::{RedemptionRequest, RequestRegistry};

const STATE_KEY: &[u8] = b"accounting/state";

/// Which unit a redemption request is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denomination {
    Assets,
    Shares,
}

pub struct RedemptionService {
    instance: Arc<sled::Db>,
    state: Mutex<AccountingState>,
    registry: RequestRegistry,
    operators: OperatorApprovalRegistry,
    governor: AllocationGovernor,
    ledger: Arc<dyn ShareLedger>,
    vault: Arc<dyn AssetVault>,
    strategy: Arc<dyn StrategySource>,
    roles: Arc<dyn RoleAuthorizer>,
}

impl RedemptionService {
    /// Open the service over a database, restoring the accounting state and
    /// request records left by a previous instance. A fresh database starts
    /// from a zeroed ledger. This is the re-initialization path across
    /// upgrade events: no counter is ever reset here.
    pub fn open(
        instance: Arc<sled::Db>,
        ledger: Arc<dyn ShareLedger>,
        vault: Arc<dyn AssetVault>,
        roles: Arc<dyn RoleAuthorizer>,
    ) -> anyhow::Result<Self> {
        let state = match instance.get(STATE_KEY)? {
            Some(raw) => minicbor::decode(raw.as_ref())?,
            None => AccountingState::new(),
        };
        let registry = RequestRegistry::open(instance.clone())?;
        let operators = OperatorApprovalRegistry::new(instance.clone());

        Ok(Self {
            instance,
            state: Mutex::new(state),
            registry,
            operators,
            governor: AllocationGovernor::default(),
            ledger,
            vault,
            strategy: Arc::new(NoStrategy),
            roles,
        })
    }

    /// Swap in a non-trivial strategy source.
    pub fn with_strategy(mut self, strategy: Arc<dyn StrategySource>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Swap in a non-default allocation policy.
    pub fn with_governor(mut self, governor: AllocationGovernor) -> Self {
        self.governor = governor;
        self
    }

    fn state(&self) -> MutexGuard<'_, AccountingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_state(&self, state: &AccountingState) -> anyhow::Result<()> {
        self.instance.insert(STATE_KEY, minicbor::to_vec(state)?)?;
        Ok(())
    }

    fn require_identity(id: &str) -> Result<(), EngineError> {
        if id.is_empty() {
            return Err(EngineError::InvalidIdentity);
        }
        Ok(())
    }

    /// Redeem pooled value for the underlying asset. The immediately
    /// coverable portion is paid out of idle asset; any shortfall is queued
    /// as a request and the new key returned. `None` signals full immediate
    /// fulfillment.
    pub fn redeem(
        &self,
        caller: &str,
        owner: &str,
        controller: &str,
        receiver: &str,
        amount: Amount,
        denomination: Denomination,
    ) -> anyhow::Result<Option<String>> {
        for id in [caller, owner, controller, receiver] {
            Self::require_identity(id)?;
        }

        let mut state = self.state();

        // share-denominated delegation goes through the operator matrix;
        // the asset-denominated path spends a share allowance further down
        if caller != owner
            && denomination == Denomination::Shares
            && !self.operators.is_approved(owner, caller)?
        {
            return Err(EngineError::Unauthorized.into());
        }

        let owner_shares = self.ledger.balance_of(owner);
        let requested_assets = match denomination {
            Denomination::Assets => {
                let max = self.ledger.convert_to_assets(owner_shares, Rounding::Floor);
                if amount > max {
                    return Err(EngineError::ExceededMaxRequest {
                        who: owner.to_string(),
                        requested: amount,
                        max,
                    }
                    .into());
                }
                amount
            }
            Denomination::Shares => {
                if amount > owner_shares {
                    return Err(EngineError::ExceededMaxRequest {
                        who: owner.to_string(),
                        requested: amount,
                        max: owner_shares,
                    }
                    .into());
                }
                self.ledger.convert_to_assets(amount, Rounding::Floor)
            }
        };

        if requested_assets == 0 {
            return Ok(None);
        }

        let idle = state.idle_assets(self.vault.on_hand(), self.strategy.claimable_assets());
        let immediate = requested_assets.min(idle);
        let queued = requested_assets - immediate;

        // one ceiling of the total; the bound check above guarantees this
        // fits the owner's balance, and the legs are split out of it so the
        // burn can never exceed what the bound admitted
        let shares_total = match denomination {
            Denomination::Assets => self
                .ledger
                .convert_to_shares(requested_assets, Rounding::Ceil),
            Denomination::Shares => amount,
        };
        let shares_immediate = self
            .ledger
            .convert_to_shares(immediate, Rounding::Ceil)
            .min(shares_total);
        let shares_queued = shares_total - shares_immediate;

        if caller != owner && denomination == Denomination::Assets {
            self.ledger.spend_allowance(owner, caller, shares_total)?;
        }

        // queued leg is recorded before any external call so the split is
        // never observable half-done
        let key = if queued > 0 {
            let watermark = state.record_request(queued)?;
            let key = self
                .registry
                .create(owner, receiver, controller, queued, shares_queued, watermark)?;
            self.persist_state(&state)?;
            Some(key)
        } else {
            None
        };

        self.ledger.burn(owner, shares_total)?;
        if immediate > 0 {
            self.vault.transfer(receiver, immediate)?;
        }

        info!(owner, requested_assets, immediate, queued, "redeem processed");
        Ok(key)
    }

    /// Pay out a claimable queued request. The claimed flag and the claim
    /// counter are persisted strictly before the asset transfer is issued.
    pub fn claim(&self, caller: &str, key: &str) -> anyhow::Result<Amount> {
        Self::require_identity(caller)?;

        let mut state = self.state();

        let Some(request) = self.registry.get(key)? else {
            return Err(EngineError::NotClaimable { key: key.into() }.into());
        };
        if caller != request.controller && !self.operators.is_approved(&request.controller, caller)?
        {
            return Err(EngineError::Unauthorized.into());
        }

        let on_hand = self.vault.on_hand();
        let claimable = self.strategy.claimable_assets();
        let amount = self.registry.mark_claimed(key, &state, on_hand, claimable)?;
        state.record_claim(amount)?;
        self.persist_state(&state)?;

        self.vault.transfer(&request.receiver, amount)?;

        info!(key, amount, receiver = request.receiver.as_str(), "claim paid");
        Ok(amount)
    }

    /// Grant or revoke an operator for the calling controller.
    pub fn set_operator(&self, caller: &str, operator: &str, approved: bool) -> anyhow::Result<()> {
        Self::require_identity(caller)?;
        Self::require_identity(operator)?;

        self.operators.set(caller, operator, approved)
    }

    pub fn is_operator_approved(&self, controller: &str, operator: &str) -> anyhow::Result<bool> {
        self.operators.is_approved(controller, operator)
    }

    /// Routine operator reconciliation, bounded by the deviation policy.
    pub fn reconcile(&self, caller: &str, new_allocated: Amount) -> anyhow::Result<()> {
        if !self.roles.is_operator(caller) {
            return Err(EngineError::Unauthorized.into());
        }

        let mut state = self.state();
        let pending = self.pending_withdrawals_for(&state);
        self.governor.reconcile(&mut state, pending, new_allocated)?;
        self.persist_state(&state)
    }

    /// Governance override of the allocated total.
    pub fn force_reconcile(&self, caller: &str, new_allocated: Amount) -> anyhow::Result<()> {
        if !self.roles.is_owner(caller) {
            return Err(EngineError::Unauthorized.into());
        }

        let mut state = self.state();
        let pending = self.pending_withdrawals_for(&state);
        self.governor.force_reconcile(&mut state, pending, new_allocated)?;
        self.persist_state(&state)
    }

    /// Operator report of liquidity returned from the external destination.
    pub fn report_deallocated(&self, caller: &str, remaining_allocated: Amount) -> anyhow::Result<()> {
        if !self.roles.is_operator(caller) {
            return Err(EngineError::Unauthorized.into());
        }

        let mut state = self.state();
        self.governor.report_deallocated(&mut state, remaining_allocated)?;
        self.persist_state(&state)
    }

    fn pending_withdrawals_for(&self, state: &AccountingState) -> Amount {
        state.pending_withdrawals(
            self.vault.on_hand(),
            self.strategy.claimable_assets(),
            self.strategy.pending_deallocation_assets(),
        )
    }

    // read-only surface

    pub fn idle_assets(&self) -> Amount {
        self.state()
            .idle_assets(self.vault.on_hand(), self.strategy.claimable_assets())
    }

    pub fn pending_withdrawals(&self) -> Amount {
        let state = self.state();
        self.pending_withdrawals_for(&state)
    }

    pub fn total_value(&self) -> Amount {
        self.state().total_value(
            self.vault.on_hand(),
            self.strategy.claimable_assets(),
            self.strategy.pending_deallocation_assets(),
        )
    }

    pub fn allocated_assets(&self) -> Amount {
        self.state().allocated
    }

    pub fn cumulative_requested(&self) -> Amount {
        self.state().cumulative_requested
    }

    pub fn cumulative_claimed(&self) -> Amount {
        self.state().cumulative_claimed
    }

    pub fn request(&self, key: &str) -> anyhow::Result<Option<RedemptionRequest>> {
        self.registry.get(key)
    }

    pub fn is_claimable(&self, key: &str) -> anyhow::Result<bool> {
        let state = self.state();
        self.registry.is_claimable(
            key,
            &state,
            self.vault.on_hand(),
            self.strategy.claimable_assets(),
        )
    }
}
