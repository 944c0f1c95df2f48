//! Settlement engine
//!
//! Decides, for every submitted transfer, between bilateral netting,
//! immediate settlement and the queue:
//!
//! 1. **Bilateral netting** when the receiver has unfrozen transfers queued
//!    towards the sender and neither side takes part in a netting cycle
//! 2. **Immediate** when the sender has the liquidity, did not ask to queue,
//!    is not frozen and has nothing queued at the same or a higher priority
//! 3. **Queue** otherwise, frozen if a netting cycle holds either side

use crate::{
    config::Config,
    context::ServiceContext,
    cycle,
    netting::{NettingEngine, ResidualMove},
    types::{SettlementPath, TransferOutcome, TransferRequest},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{
    accounts, queue, types::timestamp_token, types::SCHEMA_VERSION, Account, AccountId,
    AccountStatus, BalanceChange, CompletedTransaction, CompletionStatus, Currency, DocType,
    QueueStatus, QueuedTransaction, RefId, StateTx,
};
use rust_decimal::Decimal;

/// Settlement engine
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    /// Netting engine
    netting: NettingEngine,
}

impl SettlementEngine {
    /// Create new settlement engine
    pub fn new(config: &Config) -> Self {
        Self {
            netting: NettingEngine::new(config.bilateral_netting_enabled),
        }
    }

    /// Netting engine shared with the cycle controller
    pub fn netting(&self) -> &NettingEngine {
        &self.netting
    }

    /// Submit a transfer on behalf of its sender
    pub fn submit_transfer(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        request: TransferRequest,
    ) -> Result<TransferOutcome> {
        ctx.require_caller(&request.sender)?;
        if request.sender == request.receiver {
            return Err(Error::BadArgument(
                "sender and receiver must differ".to_string(),
            ));
        }

        let sender = accounts::read_account(ctx.tx(), &request.sender)?;
        let receiver = accounts::read_account(ctx.tx(), &request.receiver)?;
        for account in [&sender, &receiver] {
            check_account(account, &request.currency)?;
        }

        let now = ctx.now();
        let ref_id = RefId::derive(&[
            request.sender.as_str(),
            request.receiver.as_str(),
            &timestamp_token(&now),
        ]);
        queue::ensure_ref_unused(ctx.tx(), &ref_id)?;

        let frozen = cycle::current(ctx)?.is_participating(&request.sender, &request.receiver);

        let mut entry = QueuedTransaction {
            doc_type: DocType::Queue,
            schema_version: SCHEMA_VERSION,
            ref_id: ref_id.clone(),
            sender: request.sender.clone(),
            receiver: request.receiver.clone(),
            priority: request.priority,
            nettable: true,
            amount: request.amount,
            currency: request.currency.clone(),
            status: QueueStatus::Active,
            is_frozen: false,
            create_time: now,
            update_time: now,
        };

        if !frozen && self.netting.bilateral_enabled() {
            if let Some(settled) = self.try_bilateral(ctx.tx_mut(), &sender, &receiver, &entry, now)? {
                tracing::info!(
                    ref_id = %ref_id,
                    sender = %request.sender,
                    receiver = %request.receiver,
                    settled = settled.len(),
                    "Bilateral netting completed"
                );
                return Ok(TransferOutcome {
                    path: SettlementPath::BilateralNetting,
                    ref_id,
                    settled,
                });
            }
        }

        let blocking = queue::list_outgoing(ctx.tx(), &request.sender, Some(request.priority))?;
        if sender.amount >= request.amount && !request.put_to_queue && !frozen && blocking.is_empty() {
            let tx = ctx.tx_mut();
            move_funds(tx, &request.sender, &request.receiver, &request.currency, request.amount)?;
            queue::record_completed(tx, &entry.into_completed(CompletionStatus::Settled, now))?;

            tracing::info!(
                ref_id = %ref_id,
                sender = %request.sender,
                receiver = %request.receiver,
                amount = %request.amount,
                "Transfer settled immediately"
            );
            return Ok(TransferOutcome {
                path: SettlementPath::Immediate,
                ref_id,
                settled: Vec::new(),
            });
        }

        entry.is_frozen = frozen;
        queue::enqueue(ctx.tx_mut(), &entry)?;

        let path = if frozen {
            SettlementPath::QueuedFrozen
        } else {
            SettlementPath::Queued
        };
        tracing::info!(
            ref_id = %ref_id,
            sender = %request.sender,
            receiver = %request.receiver,
            amount = %request.amount,
            frozen,
            "Transfer queued"
        );
        Ok(TransferOutcome {
            path,
            ref_id,
            settled: Vec::new(),
        })
    }

    /// Offset the new transfer and the sender's queued transfers to the
    /// receiver against the receiver's queued transfers to the sender.
    /// Returns the settled references, or `None` with nothing written.
    fn try_bilateral(
        &self,
        tx: &mut StateTx<'_>,
        sender: &Account,
        receiver: &Account,
        new_entry: &QueuedTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<RefId>>> {
        let incoming: Vec<QueuedTransaction> = queue::list_incoming(tx, &sender.account_id)?
            .into_iter()
            .filter(|e| e.sender == receiver.account_id && !e.is_frozen)
            .collect();
        if incoming.is_empty() {
            return Ok(None);
        }

        let mut outgoing: Vec<QueuedTransaction> = queue::list_outgoing(tx, &sender.account_id, None)?
            .into_iter()
            .filter(|e| e.receiver == receiver.account_id && !e.is_frozen)
            .collect();
        outgoing.push(new_entry.clone());

        let Some(plan) =
            self.netting
                .plan_bilateral(sender.amount, receiver.amount, outgoing, &incoming)
        else {
            return Ok(None);
        };

        let settled = plan.settled_refs();
        for entry in plan.incoming.into_iter().chain(plan.outgoing) {
            if entry.ref_id == new_entry.ref_id {
                queue::record_completed(tx, &entry.into_completed(CompletionStatus::Settled, now))?;
            } else {
                queue::complete(tx, entry, CompletionStatus::Settled, now)?;
            }
        }

        let currency = &new_entry.currency;
        match plan.residual {
            ResidualMove::None => {}
            ResidualMove::SenderPays(amount) => {
                move_funds(tx, &sender.account_id, &receiver.account_id, currency, amount)?
            }
            ResidualMove::ReceiverPays(amount) => {
                move_funds(tx, &receiver.account_id, &sender.account_id, currency, amount)?
            }
        }
        Ok(Some(settled))
    }

    /// Direct replay of a queued transfer by its sender
    pub fn settle_queued(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        ref_id: &RefId,
    ) -> Result<CompletedTransaction> {
        let entry = queue::get(ctx.tx(), ref_id)?;
        ctx.require_caller(&entry.sender)?;
        ensure_not_frozen(&entry)?;

        let ahead = queue::list_outgoing(ctx.tx(), &entry.sender, Some(entry.priority))?;
        if let Some(first) = ahead.iter().find(|e| e.ref_id != entry.ref_id) {
            if queue::queue_order(first, &entry).is_lt() {
                return Err(Error::BadArgument(format!(
                    "{} is queued ahead of {}",
                    first.ref_id, entry.ref_id
                )));
            }
        }

        let now = ctx.now();
        let tx = ctx.tx_mut();
        move_funds(tx, &entry.sender, &entry.receiver, &entry.currency, entry.amount)?;
        let completed = queue::complete(tx, entry, CompletionStatus::Settled, now)?;

        tracing::info!(ref_id = %completed.ref_id, amount = %completed.amount, "Queued transfer settled");
        Ok(completed)
    }

    /// Withdraw a queued transfer
    pub fn cancel(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        ref_id: &RefId,
    ) -> Result<CompletedTransaction> {
        let entry = queue::get(ctx.tx(), ref_id)?;
        ctx.require_caller(&entry.sender)?;
        ensure_not_frozen(&entry)?;

        let now = ctx.now();
        let completed = queue::complete(ctx.tx_mut(), entry, CompletionStatus::Cancelled, now)?;
        tracing::info!(ref_id = %completed.ref_id, "Queued transfer cancelled");
        Ok(completed)
    }

    /// Change the priority of a queued transfer
    pub fn update_priority(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        ref_id: &RefId,
        priority: i64,
    ) -> Result<QueuedTransaction> {
        let entry = queue::get(ctx.tx(), ref_id)?;
        ctx.require_caller(&entry.sender)?;
        ensure_not_frozen(&entry)?;

        let now = ctx.now();
        let updated = queue::set_priority(ctx.tx_mut(), ref_id, priority, now)?;
        tracing::debug!(ref_id = %ref_id, priority, "Priority updated");
        Ok(updated)
    }
}

fn check_account(account: &Account, currency: &Currency) -> Result<()> {
    if account.status == AccountStatus::Paused {
        return Err(ledger_core::Error::Frozen(format!("account {} is paused", account.account_id)).into());
    }
    if &account.currency != currency {
        return Err(ledger_core::Error::CurrencyMismatch {
            account: account.account_id.to_string(),
            expected: account.currency.to_string(),
            actual: currency.to_string(),
        }
        .into());
    }
    Ok(())
}

fn ensure_not_frozen(entry: &QueuedTransaction) -> Result<()> {
    if entry.is_frozen {
        return Err(ledger_core::Error::Frozen(format!(
            "transaction {} is held by the netting cycle",
            entry.ref_id
        ))
        .into());
    }
    Ok(())
}

/// Debit `from` and credit `to`
fn move_funds(
    tx: &mut StateTx<'_>,
    from: &AccountId,
    to: &AccountId,
    currency: &Currency,
    amount: Decimal,
) -> Result<()> {
    accounts::update_balance(tx, from, currency, amount, BalanceChange::Debit)?;
    accounts::update_balance(tx, to, currency, amount, BalanceChange::Credit)?;
    Ok(())
}
