//! RTGS settlement chaincode
//!
//! Host bridge: parses `(function, args)` into a [`Command`], runs it
//! against a fresh [`ServiceContext`] and renders the outcome as a
//! [`Response`]. State-changing commands emit one [`ChaincodeEvent`].

use crate::{
    command::Command,
    config::Config,
    context::ServiceContext,
    cycle::{self, CycleController},
    engine::SettlementEngine,
    funds, queries, transfer,
    types::{ChaincodeEvent, LiquidityEntry, Receipt, SettlementPath},
    Error, Result,
};
use ledger_core::{
    accounts, queue, Account, AccountId, AccountStatus, Chaincode, RefId, Response, Selector,
    Stub,
};
use serde::Serialize;

/// Chaincode of the bilateral (settlement) channels
#[derive(Debug, Clone)]
pub struct SettlementContract {
    config: Config,
    engine: SettlementEngine,
    cycles: CycleController,
}

type Outcome = (Vec<u8>, Option<ChaincodeEvent>);

fn json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value).map_err(ledger_core::Error::from)?)
}

fn read(payload: Vec<u8>) -> Result<Outcome> {
    Ok((payload, None))
}

fn event(ref_id: Option<&RefId>, account_id: Option<&AccountId>) -> ChaincodeEvent {
    ChaincodeEvent {
        op: String::new(),
        ref_id: ref_id.cloned(),
        account_id: account_id.cloned(),
    }
}

impl SettlementContract {
    /// Create the chaincode from its configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let engine = SettlementEngine::new(&config);
        let cycles = CycleController::new(engine.netting().clone());
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            bilateral_netting = config.bilateral_netting_enabled,
            cycle_expiry_minutes = config.cycle_expiry_minutes,
            "Settlement chaincode created"
        );
        Ok(Self {
            config,
            engine,
            cycles,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one command, returning the response payload and the event to emit
    fn execute(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        command: Command,
    ) -> Result<Outcome> {
        match command {
            Command::InitLedger => {
                let cycle = self.cycles.init_ledger(ctx)?;
                Ok((json(&cycle)?, Some(event(None, None))))
            }
            Command::InitAccount {
                account_id,
                currency,
                amount,
                status,
            } => {
                ctx.require_regulator()?;
                let account =
                    accounts::create_account(ctx.tx_mut(), account_id, currency, amount, status)?;
                tracing::info!(account_id = %account.account_id, currency = %account.currency, "Account opened");
                Ok((json(&account)?, Some(event(None, Some(&account.account_id)))))
            }
            Command::GetAccount { account_id } => {
                read(json(&accounts::read_account(ctx.tx(), &account_id)?)?)
            }
            Command::ListAccounts => read(json(&accounts::list_accounts(ctx.tx())?)?),
            Command::DeleteAccount { account_id } => {
                let account = self.delete_account(ctx, &account_id)?;
                Ok((json(&account)?, Some(event(None, Some(&account_id)))))
            }
            Command::SetAccountStatus { account_id, status } => {
                ctx.require_regulator()?;
                let account = accounts::set_status(ctx.tx_mut(), &account_id, status)?;
                tracing::info!(account_id = %account_id, paused = (status == AccountStatus::Paused), "Account status set");
                Ok((json(&account)?, Some(event(None, Some(&account_id)))))
            }
            Command::GetChannelLiquidity => read(json(&LiquidityEntry::from_totals(
                accounts::channel_liquidity(ctx.tx())?,
            ))?),

            Command::FundTransfer(request) => {
                let sender = request.sender.clone();
                let outcome = self.engine.submit_transfer(ctx, request)?;
                Ok((
                    json(&outcome.receipt())?,
                    Some(event(Some(&outcome.ref_id), Some(&sender))),
                ))
            }
            Command::SettleQueuedTx { ref_id } => {
                let done = self.engine.settle_queued(ctx, &ref_id)?;
                let receipt = Receipt {
                    msg: SettlementPath::Immediate.message().to_string(),
                    ref_id: done.ref_id,
                };
                Ok((json(&receipt)?, Some(event(Some(&ref_id), Some(&done.sender)))))
            }
            Command::CancelQueue { ref_id } => {
                let done = self.engine.cancel(ctx, &ref_id)?;
                Ok((json(&done)?, Some(event(Some(&ref_id), Some(&done.sender)))))
            }
            Command::UpdatePriority { ref_id, priority } => {
                let entry = self.engine.update_priority(ctx, &ref_id, priority)?;
                Ok((json(&entry)?, Some(event(Some(&ref_id), Some(&entry.sender)))))
            }
            Command::GetQueue { ref_id } => read(json(&queue::get(ctx.tx(), &ref_id)?)?),
            Command::GetSortedQueues { selector } => read(json(&queue::list_matching(
                ctx.tx(),
                &selector.unwrap_or_default(),
            )?)?),
            Command::GetOutgoingQueue { account_id } => {
                read(json(&queue::list_outgoing(ctx.tx(), &account_id, None)?)?)
            }
            Command::GetIncomingQueue { account_id } => {
                read(json(&queue::list_incoming(ctx.tx(), &account_id)?)?)
            }
            Command::GetCompletedTx { selector } => read(json(&queue::list_completed(
                ctx.tx(),
                &selector.unwrap_or_default(),
            )?)?),
            Command::GetTransactionHistory { account_id } => {
                read(json(&queries::transaction_history(ctx, &account_id)?)?)
            }

            Command::AdjustFund {
                kind,
                account_id,
                currency,
                amount,
            } => {
                let record = funds::adjust(ctx, kind, &account_id, &currency, amount)?;
                Ok((
                    json(&record)?,
                    Some(event(Some(&record.ref_id), Some(&account_id))),
                ))
            }
            Command::MoveOutFund {
                account_id,
                target_channel,
                amount,
                currency,
            } => {
                let record = transfer::move_out(ctx, &account_id, &target_channel, amount, &currency)?;
                Ok((
                    json(&record)?,
                    Some(event(Some(&record.ref_id), Some(&account_id))),
                ))
            }
            Command::MoveInFund { ref_id } => {
                let record = transfer::move_in(ctx, &ref_id)?;
                Ok((
                    json(&record)?,
                    Some(event(Some(&ref_id), Some(&record.account_id))),
                ))
            }

            Command::ConductMLNetting(input) => {
                let bank_id = input.bank_id.clone();
                let cycle = self.cycles.submit_bank_request(ctx, input)?;
                Ok((json(&cycle)?, Some(event(None, Some(&bank_id)))))
            }
            Command::ExpireMLNetting => {
                let cycle = self.cycles.expire(ctx)?;
                Ok((json(&cycle)?, Some(event(None, None))))
            }
            Command::SettleMLNetting => {
                let settlement = self.cycles.settle_achieved(ctx)?;
                Ok((json(&settlement)?, Some(event(None, None))))
            }
            Command::ResetNettingCycle => {
                let cycle = self.cycles.reset(ctx)?;
                Ok((json(&cycle)?, Some(event(None, None))))
            }
            Command::GetCurrentNettingCycle => read(json(&cycle::current(ctx)?)?),
            Command::GetBilateralNettableTxList { bank1, bank2 } => {
                read(json(&self.cycles.bilateral_nettable(ctx, &bank1, &bank2)?)?)
            }
            Command::GetNonNettableTxList => read(json(&self.cycles.non_nettable(ctx)?)?),
            Command::CheckParticipation { bank1, bank2 } => {
                read(json(&self.cycles.check_participation(ctx, &bank1, &bank2)?)?)
            }

            Command::GetState { key } => read(queries::get_state(ctx, &key)?),
            Command::GetHistoryForKey { key } => {
                read(json(&queries::history_for_key(ctx, &key)?)?)
            }
        }
    }

    /// Only an empty account with nothing queued can go
    fn delete_account(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        account_id: &AccountId,
    ) -> Result<Account> {
        ctx.require_regulator()?;
        let pending = queue::list_matching(
            ctx.tx(),
            &Selector::new().or(vec![
                Selector::new().eq("sender", account_id.as_str()),
                Selector::new().eq("receiver", account_id.as_str()),
            ]),
        )?;
        if !pending.is_empty() {
            return Err(Error::BadArgument(format!(
                "account {} has {} queued transactions",
                account_id,
                pending.len()
            )));
        }
        let account = accounts::delete_account(ctx.tx_mut(), account_id)?;
        tracing::info!(account_id = %account_id, "Account deleted");
        Ok(account)
    }
}

impl Chaincode for SettlementContract {
    fn invoke(&self, stub: &mut Stub<'_>, function: &str, args: &[String]) -> Response {
        let command = match Command::parse(function, args) {
            Ok(command) => command,
            Err(e) => return Response::error(e.kind(), e),
        };
        let read_only = command.is_read_only();
        tracing::debug!(function, caller = %stub.caller(), channel = %stub.channel(), "Dispatching");

        let mut ctx = ServiceContext::new(stub, &self.config);
        let outcome = self.execute(&mut ctx, command).and_then(|(payload, event)| {
            if let Some(mut event) = event.filter(|_| !read_only) {
                event.op = function.to_string();
                ctx.emit(function, &event)?;
            }
            Ok(payload)
        });

        match outcome {
            Ok(payload) => Response::ok(payload),
            Err(e) => Response::error(e.kind(), e),
        }
    }
}
