//! Read API
//!
//! Nothing here writes.

use crate::context::ServiceContext;
use crate::types::{KeyModification, TransactionHistory};
use crate::{Error, Result};
use chrono::SecondsFormat;
use ledger_core::{
    query::Condition, queue, AccountId, DocType, MoveOutInFund, PledgeRedeemFund, Selector,
};
use serde_json::Value;

/// Raw value stored under a key
pub fn get_state(ctx: &ServiceContext<'_, '_>, key: &str) -> Result<Vec<u8>> {
    ctx.tx()
        .get(key)?
        .ok_or_else(|| Error::not_found(format!("key {}", key)))
}

/// Committed versions of a key, oldest first
pub fn history_for_key(ctx: &ServiceContext<'_, '_>, key: &str) -> Result<Vec<KeyModification>> {
    let history = ctx.tx().history(key)?;
    Ok(history
        .into_iter()
        .map(|entry| {
            let value = match &entry.value {
                None => Value::Null,
                Some(bytes) => serde_json::from_slice(bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
            };
            KeyModification {
                tx_id: entry.tx_id,
                value,
                is_delete: entry.is_delete,
                timestamp: entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            }
        })
        .collect())
}

fn doc_types(types: &[DocType]) -> Condition {
    Condition::In(types.iter().map(|t| Value::from(t.as_str())).collect())
}

/// Completed transfers, fund adjustments and cross-channel records of an account
pub fn transaction_history(
    ctx: &ServiceContext<'_, '_>,
    account_id: &AccountId,
) -> Result<TransactionHistory> {
    let tx = ctx.tx();
    let id = account_id.as_str();

    let completed = queue::list_completed(
        tx,
        &Selector::new().or(vec![
            Selector::new().eq("sender", id),
            Selector::new().eq("receiver", id),
        ]),
    )?;

    let mut funds: Vec<PledgeRedeemFund> = tx.query_docs(
        "",
        &Selector::new().eq("accountID", id).with(
            "docType",
            doc_types(&[
                DocType::PledgeFund,
                DocType::RedeemFund,
                DocType::NettingAdd,
                DocType::NettingSubtract,
            ]),
        ),
    )?;
    funds.sort_by(|a, b| {
        a.create_time
            .cmp(&b.create_time)
            .then_with(|| a.ref_id.cmp(&b.ref_id))
    });

    let mut moves: Vec<MoveOutInFund> = tx.query_docs(
        "",
        &Selector::new()
            .eq("accountID", id)
            .with("docType", doc_types(&[DocType::MoveOutFund, DocType::MoveInFund])),
    )?;
    moves.sort_by(|a, b| {
        a.create_time
            .cmp(&b.create_time)
            .then_with(|| a.ref_id.cmp(&b.ref_id))
    });

    tracing::debug!(
        account_id = %account_id,
        completed = completed.len(),
        funds = funds.len(),
        moves = moves.len(),
        "Transaction history read"
    );
    Ok(TransactionHistory {
        completed,
        funds,
        moves,
    })
}
