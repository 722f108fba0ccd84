//! A semi-asynchronous redemption accounting engine.
//!
//! Depositors redeem pooled value denominated in shares for an underlying
//! asset that is only partially liquid. Redemptions are paid immediately out
//! of idle asset where possible; any shortfall becomes a queued obligation
//! that turns claimable once a reconciliation reports enough liquidity
//! returned. Claim ordering is decided by cumulative watermarks, not by
//! iterating a queue.

pub mod accounting;
pub mod error;
pub mod governor;
pub mod ledger;
pub mod operators;
pub mod registry;
pub mod service;
pub mod utils;
