//! External collaborator seams: share ledger, asset vault, role authority
//!
//! The engine never does share math or asset custody itself. It talks to
//! these traits and passes the rounding direction explicitly on every
//! conversion: assets→shares rounds up and shares→assets rounds down, so a
//! requester can never extract more value than their share balance entitles.
//!
//! The in-memory implementations here give the traits concrete semantics for
//! tests and embedding without a real host environment.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::bail;

use crate::accounting::Amount;

/// Rounding direction for share/asset conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

/// Proportional share accounting, specified only at its interface.
pub trait ShareLedger: Send + Sync {
    fn balance_of(&self, id: &str) -> Amount;

    fn convert_to_assets(&self, shares: Amount, rounding: Rounding) -> Amount;

    fn convert_to_shares(&self, assets: Amount, rounding: Rounding) -> Amount;

    /// Irreversibly destroy shares. A failure aborts the whole operation.
    fn burn(&self, id: &str, shares: Amount) -> anyhow::Result<()>;

    /// Consume `shares` worth of the allowance `owner` granted `spender`.
    fn spend_allowance(&self, owner: &str, spender: &str, shares: Amount) -> anyhow::Result<()>;
}

/// Custody of the underlying asset. Transfers are all-or-nothing.
pub trait AssetVault: Send + Sync {
    /// Balance currently held in the engine's immediate custody.
    fn on_hand(&self) -> Amount;

    fn transfer(&self, to: &str, amount: Amount) -> anyhow::Result<()>;
}

/// Maps a presented identity onto the two privileged roles.
pub trait RoleAuthorizer: Send + Sync {
    fn is_operator(&self, id: &str) -> bool;

    fn is_owner(&self, id: &str) -> bool;
}

/// Fixed operator and owner identities, assigned at deployment.
pub struct StaticRoles {
    pub operator: String,
    pub owner: String,
}

impl RoleAuthorizer for StaticRoles {
    fn is_operator(&self, id: &str) -> bool {
        id == self.operator
    }

    fn is_owner(&self, id: &str) -> bool {
        id == self.owner
    }
}

// multiply by rate_num/rate_den in u128 so intermediate products cannot wrap
fn mul_div(value: Amount, num: Amount, den: Amount, rounding: Rounding) -> Amount {
    if den == 0 {
        return 0;
    }
    let product = value as u128 * num as u128;
    let quotient = product / den as u128;
    let out = match rounding {
        Rounding::Floor => quotient,
        Rounding::Ceil => {
            if product % den as u128 > 0 {
                quotient + 1
            } else {
                quotient
            }
        }
    };
    Amount::try_from(out).unwrap_or(Amount::MAX)
}

#[derive(Default)]
struct ShareBook {
    balances: HashMap<String, Amount>,
    allowances: HashMap<(String, String), Amount>,
}

/// In-memory share ledger with a fixed assets-per-share exchange rate
/// (`rate_num / rate_den`). The default rate is 1:1.
pub struct InMemoryShareLedger {
    book: Mutex<ShareBook>,
    rate_num: Amount,
    rate_den: Amount,
}

impl InMemoryShareLedger {
    pub fn new() -> Self {
        Self::with_rate(1, 1)
    }

    pub fn with_rate(rate_num: Amount, rate_den: Amount) -> Self {
        Self {
            book: Mutex::new(ShareBook::default()),
            rate_num,
            rate_den,
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, ShareBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mint(&self, id: &str, shares: Amount) {
        *self.book().balances.entry(id.to_string()).or_default() += shares;
    }

    pub fn approve(&self, owner: &str, spender: &str, shares: Amount) {
        self.book()
            .allowances
            .insert((owner.to_string(), spender.to_string()), shares);
    }
}

impl Default for InMemoryShareLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareLedger for InMemoryShareLedger {
    fn balance_of(&self, id: &str) -> Amount {
        self.book().balances.get(id).copied().unwrap_or(0)
    }

    fn convert_to_assets(&self, shares: Amount, rounding: Rounding) -> Amount {
        mul_div(shares, self.rate_num, self.rate_den, rounding)
    }

    fn convert_to_shares(&self, assets: Amount, rounding: Rounding) -> Amount {
        mul_div(assets, self.rate_den, self.rate_num, rounding)
    }

    fn burn(&self, id: &str, shares: Amount) -> anyhow::Result<()> {
        let mut book = self.book();
        let balance = book.balances.get(id).copied().unwrap_or(0);
        let Some(remaining) = balance.checked_sub(shares) else {
            bail!("insufficient share balance for {id}: {balance} < {shares}");
        };
        book.balances.insert(id.to_string(), remaining);
        Ok(())
    }

    fn spend_allowance(&self, owner: &str, spender: &str, shares: Amount) -> anyhow::Result<()> {
        let mut book = self.book();
        let pair = (owner.to_string(), spender.to_string());
        let allowance = book.allowances.get(&pair).copied().unwrap_or(0);
        let Some(remaining) = allowance.checked_sub(shares) else {
            bail!("insufficient allowance from {owner} to {spender}: {allowance} < {shares}");
        };
        book.allowances.insert(pair, remaining);
        Ok(())
    }
}

#[derive(Default)]
struct VaultBook {
    on_hand: Amount,
    paid: HashMap<String, Amount>,
}

/// In-memory asset custody. Tests credit it to model deposits and liquidity
/// returning from the strategy, and debit it to model allocation leaving.
#[derive(Default)]
pub struct InMemoryVault {
    book: Mutex<VaultBook>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> std::sync::MutexGuard<'_, VaultBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Asset arriving into the engine's custody.
    pub fn credit(&self, amount: Amount) {
        self.book().on_hand += amount;
    }

    /// Asset leaving custody towards the external destination.
    pub fn debit(&self, amount: Amount) -> anyhow::Result<()> {
        let mut book = self.book();
        let Some(remaining) = book.on_hand.checked_sub(amount) else {
            bail!("vault balance {} cannot cover debit of {amount}", book.on_hand);
        };
        book.on_hand = remaining;
        Ok(())
    }

    /// Total ever paid out to `id` through transfers.
    pub fn paid_to(&self, id: &str) -> Amount {
        self.book().paid.get(id).copied().unwrap_or(0)
    }
}

impl AssetVault for InMemoryVault {
    fn on_hand(&self) -> Amount {
        self.book().on_hand
    }

    fn transfer(&self, to: &str, amount: Amount) -> anyhow::Result<()> {
        let mut book = self.book();
        let Some(remaining) = book.on_hand.checked_sub(amount) else {
            bail!(
                "vault balance {} cannot cover transfer of {amount} to {to}",
                book.on_hand
            );
        };
        book.on_hand = remaining;
        *book.paid.entry(to.to_string()).or_default() += amount;
        Ok(())
    }
}
