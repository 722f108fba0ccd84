//! Asset-state accounting: the idle / allocated / pending partition
//!
//! [`AccountingState`] is the authoritative ledger of the engine. It carries
//! two monotone cumulative counters plus the allocated total, and every other
//! figure the engine reports (idle assets, pending withdrawals, total value)
//! is derived from those on read. The counters never saturate: an addition
//! that would wrap aborts with [`EngineError::Overflow`], because a clamped
//! counter would corrupt the watermark ordering that claimability relies on.

use crate::error::EngineError;

pub type Amount = u64;

/// The authoritative ledger, persisted as a single record.
///
/// Invariant: `cumulative_requested >= cumulative_claimed` at all times.
/// `allocated` is written only through the [`crate::governor::AllocationGovernor`]
/// transition paths.
#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct AccountingState {
    #[n(0)]
    pub cumulative_requested: Amount,
    #[n(1)]
    pub cumulative_claimed: Amount,
    #[n(2)]
    pub allocated: Amount,
}

impl AccountingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total unpaid debt to requesters.
    pub fn outstanding_obligations(&self) -> Amount {
        self.cumulative_requested
            .saturating_sub(self.cumulative_claimed)
    }

    /// Asset immediately available for payout: liquidity on hand plus
    /// whatever the strategy reports claimable, minus what is already owed.
    pub fn idle_assets(&self, on_hand: Amount, external_claimable: Amount) -> Amount {
        on_hand
            .saturating_add(external_claimable)
            .saturating_sub(self.outstanding_obligations())
    }

    /// Obligations not yet covered by liquidity on hand, claimable from the
    /// strategy, or in transit back from it.
    pub fn pending_withdrawals(
        &self,
        on_hand: Amount,
        external_claimable: Amount,
        external_in_transit: Amount,
    ) -> Amount {
        let outstanding = self.outstanding_obligations();
        if outstanding == 0 {
            return 0;
        }

        let processed = on_hand
            .saturating_add(external_claimable)
            .saturating_add(external_in_transit);
        outstanding.saturating_sub(processed)
    }

    /// Net asset value used for share pricing by the external share ledger.
    pub fn total_value(
        &self,
        on_hand: Amount,
        external_claimable: Amount,
        external_in_transit: Amount,
    ) -> Amount {
        on_hand
            .saturating_add(self.allocated)
            .saturating_add(external_in_transit)
            .saturating_add(external_claimable)
            .saturating_sub(self.outstanding_obligations())
    }

    /// Record a newly queued obligation and return the watermark the request
    /// must clear to become claimable.
    pub fn record_request(&mut self, assets: Amount) -> Result<Amount, EngineError> {
        self.cumulative_requested = self
            .cumulative_requested
            .checked_add(assets)
            .ok_or(EngineError::Overflow)?;
        Ok(self.cumulative_requested)
    }

    /// Record a payout. The caller has already validated the amount as owed;
    /// this is a pure ledger mutation.
    pub fn record_claim(&mut self, assets: Amount) -> Result<(), EngineError> {
        self.cumulative_claimed = self
            .cumulative_claimed
            .checked_add(assets)
            .ok_or(EngineError::Overflow)?;
        Ok(())
    }

    pub fn set_allocated(&mut self, value: Amount) {
        self.allocated = value;
    }

    /// A request is claimable once enough liquidity has flowed through the
    /// system to reach its watermark. Every earlier request carries a
    /// strictly smaller watermark, so this predicate is first-requested,
    /// first-claimable without iterating a queue.
    pub fn is_claimable(
        &self,
        watermark: Amount,
        on_hand: Amount,
        external_claimable: Amount,
    ) -> bool {
        self.cumulative_claimed
            .saturating_add(on_hand)
            .saturating_add(external_claimable)
            >= watermark
    }
}

/// Strategy-side figures the accounting views fold in. The single-destination
/// variant has nothing claimable and nothing in transit.
pub trait StrategySource: Send + Sync {
    fn claimable_assets(&self) -> Amount {
        0
    }

    fn pending_deallocation_assets(&self) -> Amount {
        0
    }
}

pub struct NoStrategy;

impl StrategySource for NoStrategy {}
