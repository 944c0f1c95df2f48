//! Account ledger
//!
//! Every balance change in the system goes through [`update_balance`], which
//! is where the account invariants live:
//!
//! - `amount >= 0` after every write
//! - `currency` never changes once the account exists
//! - a `PAUSED` account does not move

use crate::keys::{account_key, index_prefix, ACCOUNT_INDEX};
use crate::query::Selector;
use crate::state::StateTx;
use crate::types::{checked_add, Account, AccountId, AccountStatus, Currency, DocType};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// Add to the balance
    Credit,
    /// Subtract from the balance
    Debit,
}

/// Create an account. Fails if the ID is taken or the opening balance is negative.
pub fn create_account(
    tx: &mut StateTx<'_>,
    account_id: AccountId,
    currency: Currency,
    amount: Decimal,
    status: AccountStatus,
) -> Result<Account> {
    if amount < Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "opening balance of {} must not be negative",
            account_id
        )));
    }

    let key = account_key(&account_id);
    if tx.get(&key)?.is_some() {
        return Err(Error::AlreadyExists(format!("account {}", account_id)));
    }

    let account = Account::new(account_id, currency, amount, status);
    tx.put_doc(&key, &account)?;

    tracing::debug!(account_id = %account.account_id, amount = %account.amount, "Account created");
    Ok(account)
}

/// Load an account, `NotFound` if absent
pub fn read_account(tx: &StateTx<'_>, account_id: &AccountId) -> Result<Account> {
    try_read_account(tx, account_id)?
        .ok_or_else(|| Error::NotFound(format!("account {}", account_id)))
}

/// Load an account if present
pub fn try_read_account(tx: &StateTx<'_>, account_id: &AccountId) -> Result<Option<Account>> {
    tx.get_doc(&account_key(account_id))
}

/// Apply a credit or debit of `delta` in `currency`
pub fn update_balance(
    tx: &mut StateTx<'_>,
    account_id: &AccountId,
    currency: &Currency,
    delta: Decimal,
    change: BalanceChange,
) -> Result<Account> {
    if delta < Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "balance delta must not be negative, got {}",
            delta
        )));
    }

    let mut account = read_account(tx, account_id)?;

    if account.status == AccountStatus::Paused {
        return Err(Error::Frozen(format!("account {} is paused", account_id)));
    }
    if &account.currency != currency {
        return Err(Error::CurrencyMismatch {
            account: account_id.to_string(),
            expected: account.currency.to_string(),
            actual: currency.to_string(),
        });
    }

    account.amount = match change {
        BalanceChange::Credit => checked_add(account.amount, delta)?,
        BalanceChange::Debit => {
            if delta > account.amount {
                return Err(Error::Insufficient {
                    account: account_id.to_string(),
                    balance: account.amount,
                    requested: delta,
                });
            }
            account.amount - delta
        }
    };

    tx.put_doc(&account_key(account_id), &account)?;
    Ok(account)
}

/// Remove an account. Only an empty account can be removed.
pub fn delete_account(tx: &mut StateTx<'_>, account_id: &AccountId) -> Result<Account> {
    let account = read_account(tx, account_id)?;
    if !account.amount.is_zero() {
        return Err(Error::InvalidArgument(format!(
            "account {} still holds {} {}",
            account_id, account.amount, account.currency
        )));
    }
    tx.delete(&account_key(account_id))?;

    tracing::debug!(account_id = %account_id, "Account deleted");
    Ok(account)
}

/// Change the lifecycle status. Setting the current status writes nothing.
pub fn set_status(
    tx: &mut StateTx<'_>,
    account_id: &AccountId,
    status: AccountStatus,
) -> Result<Account> {
    let mut account = read_account(tx, account_id)?;
    account.status = status;
    tx.put_doc(&account_key(account_id), &account)?;
    Ok(account)
}

/// All accounts ordered by ID
pub fn list_accounts(tx: &StateTx<'_>) -> Result<Vec<Account>> {
    tx.query_docs(
        &index_prefix(ACCOUNT_INDEX),
        &Selector::doc_type(DocType::Account.as_str()),
    )
}

/// Sum of balances per currency
pub fn channel_liquidity(tx: &StateTx<'_>) -> Result<BTreeMap<Currency, Decimal>> {
    let mut totals = BTreeMap::new();
    for account in list_accounts(tx)? {
        let total = totals.entry(account.currency).or_insert(Decimal::ZERO);
        *total = checked_add(*total, account.amount)?;
    }
    Ok(totals)
}
