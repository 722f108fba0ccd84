#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("requested {requested} exceeds max redeemable {max} for {who}")]
    ExceededMaxRequest {
        who: String,
        requested: u64,
        max: u64,
    },
    #[error("request {key} is not claimable")]
    NotClaimable { key: String },
    #[error("request {key} has already been claimed")]
    AlreadyClaimed { key: String },
    #[error("reconciliation refused while withdrawals are pending")]
    PendingObligations,
    #[error("allocation update exceeds the max deviation rate")]
    ExceededMaxDeviationRate,
    #[error("remaining allocation {remaining} exceeds recorded allocation {allocated}")]
    DeallocatedExceedsAllocated { remaining: u64, allocated: u64 },
    #[error("caller is not authorized for this operation")]
    Unauthorized,
    #[error("identity must not be empty")]
    InvalidIdentity,
    #[error("cumulative counter overflow")]
    Overflow,
    #[error("derived request key already exists")]
    DuplicateKey,
}
