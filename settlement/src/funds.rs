//! Pledge/redeem ledger
//!
//! Regulator-authored balance adjustments. Each one writes a
//! [`PledgeRedeemFund`] record under `refID = H(accountID ∥ now)` next to the
//! balance change.

use crate::context::ServiceContext;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{
    accounts, keys::fund_key, types::timestamp_token, types::SCHEMA_VERSION, AccountId,
    BalanceChange, Currency, FundKind, PledgeRedeemFund, RefId, StateTx,
};
use rust_decimal::Decimal;

/// Apply an adjustment on behalf of the regulator
pub fn adjust(
    ctx: &mut ServiceContext<'_, '_>,
    kind: FundKind,
    account_id: &AccountId,
    currency: &Currency,
    amount: Decimal,
) -> Result<PledgeRedeemFund> {
    ctx.require_regulator()?;
    let now = ctx.now();
    let record = post(ctx.tx_mut(), kind, account_id, currency, amount, now)?;

    tracing::info!(
        ref_id = %record.ref_id,
        account_id = %account_id,
        kind = %kind.doc_type(),
        amount = %amount,
        "Fund adjustment recorded"
    );
    Ok(record)
}

/// Change the balance and write the adjustment record
pub(crate) fn post(
    tx: &mut StateTx<'_>,
    kind: FundKind,
    account_id: &AccountId,
    currency: &Currency,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<PledgeRedeemFund> {
    if amount <= Decimal::ZERO {
        return Err(Error::BadArgument(format!(
            "adjustment amount must be positive, got {}",
            amount
        )));
    }

    let ref_id = RefId::derive(&[account_id.as_str(), &timestamp_token(&now)]);
    let key = fund_key(&ref_id);
    if tx.get(&key)?.is_some() {
        return Err(Error::already_exists(format!("fund record {}", ref_id)));
    }

    let change = if kind.is_credit() {
        BalanceChange::Credit
    } else {
        BalanceChange::Debit
    };
    accounts::update_balance(tx, account_id, currency, amount, change)?;

    let record = PledgeRedeemFund {
        doc_type: kind.doc_type(),
        schema_version: SCHEMA_VERSION,
        ref_id,
        account_id: account_id.clone(),
        amount,
        currency: currency.clone(),
        create_time: now,
    };
    tx.put_doc(&key, &record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledger_core::{AccountStatus, DocType, MemoryStore};

    fn usd() -> Currency {
        Currency::parse("USD").unwrap()
    }

    #[test]
    fn test_pledge_then_redeem_restores_balance() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        let a = AccountId::new("A");
        accounts::create_account(&mut tx, a.clone(), usd(), Decimal::from(5), AccountStatus::Normal).unwrap();

        let t1 = Utc.timestamp_opt(10, 0).unwrap();
        let t2 = Utc.timestamp_opt(11, 0).unwrap();
        let pledge = post(&mut tx, FundKind::Pledge, &a, &usd(), Decimal::from(20), t1).unwrap();
        assert_eq!(pledge.doc_type, DocType::PledgeFund);
        assert_eq!(accounts::read_account(&tx, &a).unwrap().amount, Decimal::from(25));

        post(&mut tx, FundKind::Redeem, &a, &usd(), Decimal::from(20), t2).unwrap();
        assert_eq!(accounts::read_account(&tx, &a).unwrap().amount, Decimal::from(5));
    }

    #[test]
    fn test_redeem_cannot_overdraw() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        let a = AccountId::new("A");
        accounts::create_account(&mut tx, a.clone(), usd(), Decimal::from(5), AccountStatus::Normal).unwrap();

        let err = post(
            &mut tx,
            FundKind::NettingSubtract,
            &a,
            &usd(),
            Decimal::from(6),
            Utc.timestamp_opt(1, 0).unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::Insufficient);
    }

    #[test]
    fn test_same_account_same_instant_collides() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        let a = AccountId::new("A");
        accounts::create_account(&mut tx, a.clone(), usd(), Decimal::ZERO, AccountStatus::Normal).unwrap();
        let t = Utc.timestamp_opt(1, 0).unwrap();
        post(&mut tx, FundKind::Pledge, &a, &usd(), Decimal::ONE, t).unwrap();
        let err = post(&mut tx, FundKind::Pledge, &a, &usd(), Decimal::ONE, t).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::AlreadyExists);
    }
}
