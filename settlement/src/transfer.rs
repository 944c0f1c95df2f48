//! Cross-channel move-out / move-in
//!
//! ```text
//!  source channel          funding channel           destination channel
//!  moveoutfund(refID) ──▶  transientfund(refID) ──▶  moveinfund(refID)
//! ```
//!
//! The refID is `H(source ∥ destination ∥ now)` and is shared by all three
//! records. Its presence on the destination channel is the idempotence key.

use crate::context::ServiceContext;
use crate::{Error, Result};
use ledger_core::{
    accounts, codec, keys::fund_key, types::timestamp_token, types::SCHEMA_VERSION, AccountId,
    BalanceChange, Channel, Currency, DocType, ErrorKind, MoveOutInFund, RefId,
};
use rust_decimal::Decimal;

/// Funding chaincode function storing a transient fund
pub const CREATE_TRANSIENT_FUND: &str = "createTransientFund";

/// Read function shared by both chaincodes
pub const GET_STATE: &str = "getState";

/// Debit the account and hand the funds to the funding channel
pub fn move_out(
    ctx: &mut ServiceContext<'_, '_>,
    account_id: &AccountId,
    target_channel: &Channel,
    amount: Decimal,
    currency: &Currency,
) -> Result<MoveOutInFund> {
    ctx.require_caller(account_id)?;
    let source = ctx.channel().clone();
    if target_channel == &source {
        return Err(Error::BadArgument(format!(
            "target channel {} is the current channel",
            target_channel
        )));
    }

    let now = ctx.now();
    let ref_id = RefId::derive(&[source.as_str(), target_channel.as_str(), &timestamp_token(&now)]);
    let key = fund_key(&ref_id);
    if ctx.tx().get(&key)?.is_some() {
        return Err(Error::already_exists(format!("fund record {}", ref_id)));
    }

    accounts::update_balance(ctx.tx_mut(), account_id, currency, amount, BalanceChange::Debit)?;

    let record = MoveOutInFund {
        doc_type: DocType::MoveOutFund,
        schema_version: SCHEMA_VERSION,
        ref_id: ref_id.clone(),
        account_id: account_id.clone(),
        channel_from: source,
        channel_to: target_channel.clone(),
        amount,
        currency: currency.clone(),
        create_time: now,
    };
    ctx.tx_mut().put_doc(&key, &record)?;

    let transient = MoveOutInFund {
        doc_type: DocType::TransientFund,
        ..record.clone()
    };
    let payload = String::from_utf8(codec::encode(&transient)?)
        .map_err(|e| ledger_core::Error::Serialization(e.to_string()))?;
    let funding_channel = ctx.config().funding_channel();
    let chaincode = ctx.config().funding_chaincode_name.clone();
    let response = ctx.invoke_chaincode(&funding_channel, &chaincode, CREATE_TRANSIENT_FUND, &[payload])?;
    if !response.is_ok() {
        return Err(Error::CrossChannel(response.message));
    }

    tracing::info!(
        ref_id = %ref_id,
        account_id = %account_id,
        to = %target_channel,
        amount = %amount,
        "Fund moved out"
    );
    Ok(record)
}

/// Claim a transient fund addressed to this channel
pub fn move_in(ctx: &mut ServiceContext<'_, '_>, ref_id: &RefId) -> Result<MoveOutInFund> {
    let funding_channel = ctx.config().funding_channel();
    let chaincode = ctx.config().funding_chaincode_name.clone();
    let response = ctx.invoke_chaincode(
        &funding_channel,
        &chaincode,
        GET_STATE,
        &[ref_id.to_string()],
    )?;
    if !response.is_ok() {
        if response.kind() == Some(ErrorKind::NotFound.as_str()) {
            return Err(Error::not_found(format!("transient fund {}", ref_id)));
        }
        return Err(Error::CrossChannel(response.message));
    }

    let transient: MoveOutInFund = codec::decode(&response.payload)?;
    if transient.doc_type != DocType::TransientFund || &transient.ref_id != ref_id {
        return Err(Error::BadArgument(format!(
            "{} does not name a transient fund",
            ref_id
        )));
    }
    ctx.require_caller(&transient.account_id)?;
    if &transient.channel_to != ctx.channel() {
        return Err(Error::BadArgument(format!(
            "fund {} is addressed to channel {}",
            ref_id, transient.channel_to
        )));
    }

    let key = fund_key(ref_id);
    if ctx.tx().get(&key)?.is_some() {
        return Err(Error::already_exists(format!("fund record {}", ref_id)));
    }

    accounts::update_balance(
        ctx.tx_mut(),
        &transient.account_id,
        &transient.currency,
        transient.amount,
        BalanceChange::Credit,
    )?;

    let record = MoveOutInFund {
        doc_type: DocType::MoveInFund,
        create_time: ctx.now(),
        ..transient
    };
    ctx.tx_mut().put_doc(&key, &record)?;

    tracing::info!(
        ref_id = %ref_id,
        account_id = %record.account_id,
        from = %record.channel_from,
        amount = %record.amount,
        "Fund moved in"
    );
    Ok(record)
}
