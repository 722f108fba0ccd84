//! Governance-bounded updates to the allocated total
//!
//! The `allocated` counter is written through exactly three paths: a bounded
//! routine reconciliation for the operator, an administrative override for
//! governance, and the deallocation report that recognizes liquidity coming
//! back to fulfil queued withdrawals.

use tracing::info;

use crate::accounting::{AccountingState, Amount};
use crate::error::EngineError;

/// Routine reconciliation may move `allocated` by at most 0.25% by default.
pub const DEFAULT_MAX_DEVIATION_BPS: u64 = 25;

const BPS_DENOMINATOR: u128 = 10_000;

pub struct AllocationGovernor {
    max_deviation_bps: u64,
}

impl AllocationGovernor {
    pub fn new(max_deviation_bps: u64) -> Self {
        Self { max_deviation_bps }
    }

    /// Routine operator path. Refused while withdrawals are pending, since a
    /// reported allocation could mask insolvency, and bounded by the
    /// deviation policy. The first allocation from zero is unbounded.
    pub fn reconcile(
        &self,
        state: &mut AccountingState,
        pending_withdrawals: Amount,
        new_allocated: Amount,
    ) -> Result<(), EngineError> {
        if pending_withdrawals > 0 {
            return Err(EngineError::PendingObligations);
        }

        if state.allocated > 0 {
            let deviation = state.allocated.abs_diff(new_allocated);
            if deviation as u128 * BPS_DENOMINATOR
                > state.allocated as u128 * self.max_deviation_bps as u128
            {
                return Err(EngineError::ExceededMaxDeviationRate);
            }
        }

        info!(
            previous = state.allocated,
            new_allocated, "allocation reconciled"
        );
        state.set_allocated(new_allocated);
        Ok(())
    }

    /// Governance override. Unbounded, except that it must not increase
    /// exposure while obligations are outstanding; decreasing is always
    /// allowed since it recognizes returned liquidity.
    pub fn force_reconcile(
        &self,
        state: &mut AccountingState,
        pending_withdrawals: Amount,
        new_allocated: Amount,
    ) -> Result<(), EngineError> {
        if pending_withdrawals > 0 && new_allocated > state.allocated {
            return Err(EngineError::PendingObligations);
        }

        info!(
            previous = state.allocated,
            new_allocated, "allocation force-reconciled"
        );
        state.set_allocated(new_allocated);
        Ok(())
    }

    /// Withdrawal-fulfilment path: the operator reports what is still
    /// allocated after pulling liquidity back. The allocation can only
    /// shrink here.
    pub fn report_deallocated(
        &self,
        state: &mut AccountingState,
        remaining_allocated: Amount,
    ) -> Result<(), EngineError> {
        if remaining_allocated > state.allocated {
            return Err(EngineError::DeallocatedExceedsAllocated {
                remaining: remaining_allocated,
                allocated: state.allocated,
            });
        }

        info!(
            previous = state.allocated,
            remaining_allocated, "deallocation reported"
        );
        state.set_allocated(remaining_allocated);
        Ok(())
    }
}

impl Default for AllocationGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEVIATION_BPS)
    }
}
