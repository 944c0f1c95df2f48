//! Closed set of chaincode functions
//!
//! The host hands over `(function, args)`; [`Command::parse`] checks the
//! arity and parses every argument into its typed form before any state is
//! touched.

use crate::types::TransferRequest;
use crate::{Error, Result};
use ledger_core::{
    AccountId, AccountStatus, BankId, Channel, Currency, FundKind, RefId, Selector,
};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parsed `conductMLNetting` input
#[derive(Debug, Clone, PartialEq)]
pub struct BankRequestInput {
    /// Cycle to join, `None` to start a new one
    pub cycle_id: Option<u64>,
    /// Submitting bank
    pub bank_id: BankId,
    /// References proposed for netting
    pub nettable: Vec<RefId>,
    /// References excluded
    pub non_nettable: Vec<RefId>,
    /// Claimed net position
    pub net_value: Decimal,
}

/// One chaincode function with typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create the netting-cycle singleton
    InitLedger,
    /// Open an account
    InitAccount {
        /// Account ID
        account_id: AccountId,
        /// Currency
        currency: Currency,
        /// Opening balance
        amount: Decimal,
        /// Initial status
        status: AccountStatus,
    },
    /// Read one account
    GetAccount {
        /// Account ID
        account_id: AccountId,
    },
    /// Read all accounts
    ListAccounts,
    /// Remove an empty account
    DeleteAccount {
        /// Account ID
        account_id: AccountId,
    },
    /// Lock or unlock an account's balance
    SetAccountStatus {
        /// Account ID
        account_id: AccountId,
        /// Target status
        status: AccountStatus,
    },
    /// Total balances per currency
    GetChannelLiquidity,
    /// Submit a transfer
    FundTransfer(TransferRequest),
    /// Retry a queued transfer
    SettleQueuedTx {
        /// Queued reference
        ref_id: RefId,
    },
    /// Withdraw a queued transfer
    CancelQueue {
        /// Queued reference
        ref_id: RefId,
    },
    /// Change a queued transfer's priority
    UpdatePriority {
        /// Queued reference
        ref_id: RefId,
        /// New priority
        priority: i64,
    },
    /// Read one queued transfer
    GetQueue {
        /// Queued reference
        ref_id: RefId,
    },
    /// Queued transfers in settlement order
    GetSortedQueues {
        /// Optional extra filter
        selector: Option<Selector>,
    },
    /// Queued transfers paid by an account
    GetOutgoingQueue {
        /// Account ID
        account_id: AccountId,
    },
    /// Queued transfers paid to an account
    GetIncomingQueue {
        /// Account ID
        account_id: AccountId,
    },
    /// Completed transfers
    GetCompletedTx {
        /// Optional extra filter
        selector: Option<Selector>,
    },
    /// Every record touching an account
    GetTransactionHistory {
        /// Account ID
        account_id: AccountId,
    },
    /// Regulator balance adjustment
    AdjustFund {
        /// Adjustment kind
        kind: FundKind,
        /// Account ID
        account_id: AccountId,
        /// Currency
        currency: Currency,
        /// Positive amount
        amount: Decimal,
    },
    /// Move funds to another channel
    MoveOutFund {
        /// Owner
        account_id: AccountId,
        /// Destination channel
        target_channel: Channel,
        /// Positive amount
        amount: Decimal,
        /// Currency
        currency: Currency,
    },
    /// Claim funds moved from another channel
    MoveInFund {
        /// Handoff reference
        ref_id: RefId,
    },
    /// Start or join a multilateral netting cycle
    ConductMLNetting(BankRequestInput),
    /// Persist expiry of an elapsed cycle
    ExpireMLNetting,
    /// Settle an ACHIEVED cycle
    SettleMLNetting,
    /// Reset an INVALID or EXPIRED cycle
    ResetNettingCycle,
    /// Read the cycle
    GetCurrentNettingCycle,
    /// References both banks proposed
    GetBilateralNettableTxList {
        /// First bank
        bank1: BankId,
        /// Second bank
        bank2: BankId,
    },
    /// References any bank excluded
    GetNonNettableTxList,
    /// Whether either bank takes part in the running cycle
    CheckParticipation {
        /// First bank
        bank1: BankId,
        /// Second bank
        bank2: BankId,
    },
    /// Raw value of a key
    GetState {
        /// Key
        key: String,
    },
    /// Versions of a key
    GetHistoryForKey {
        /// Key
        key: String,
    },
}

impl Command {
    /// Parse a host invocation
    pub fn parse(function: &str, args: &[String]) -> Result<Self> {
        let a = Args { function, args };
        let command = match function {
            "initLedger" => {
                a.arity(0)?;
                Command::InitLedger
            }
            "initAccount" => {
                a.arity(4)?;
                Command::InitAccount {
                    account_id: a.account(0)?,
                    currency: a.currency(1)?,
                    amount: a.decimal(2)?,
                    status: AccountStatus::parse(a.non_empty(3)?)?,
                }
            }
            "getAccount" => {
                a.arity(1)?;
                Command::GetAccount {
                    account_id: a.account(0)?,
                }
            }
            "listAccounts" => {
                a.arity(0)?;
                Command::ListAccounts
            }
            "deleteAccount" => {
                a.arity(1)?;
                Command::DeleteAccount {
                    account_id: a.account(0)?,
                }
            }
            "pauseAccount" | "resumeAccount" => {
                a.arity(1)?;
                Command::SetAccountStatus {
                    account_id: a.account(0)?,
                    status: if function == "pauseAccount" {
                        AccountStatus::Paused
                    } else {
                        AccountStatus::Normal
                    },
                }
            }
            "getChannelLiquidity" => {
                a.arity(0)?;
                Command::GetChannelLiquidity
            }
            "fundTransfer" => {
                a.arity(6)?;
                Command::FundTransfer(TransferRequest {
                    sender: a.account(0)?,
                    receiver: a.account(1)?,
                    priority: a.integer(2)?,
                    amount: a.positive(3)?,
                    currency: a.currency(4)?,
                    put_to_queue: a.boolean(5)?,
                })
            }
            "settleQueuedTx" => {
                a.arity(1)?;
                Command::SettleQueuedTx {
                    ref_id: a.ref_id(0)?,
                }
            }
            "cancelQueue" => {
                a.arity(1)?;
                Command::CancelQueue {
                    ref_id: a.ref_id(0)?,
                }
            }
            "updatePriority" => {
                a.arity(2)?;
                Command::UpdatePriority {
                    ref_id: a.ref_id(0)?,
                    priority: a.integer(1)?,
                }
            }
            "getQueue" => {
                a.arity(1)?;
                Command::GetQueue {
                    ref_id: a.ref_id(0)?,
                }
            }
            "getSortedQueues" => {
                a.arity_range(0, 1)?;
                Command::GetSortedQueues {
                    selector: a.selector(0)?,
                }
            }
            "getOutgoingQueue" => {
                a.arity(1)?;
                Command::GetOutgoingQueue {
                    account_id: a.account(0)?,
                }
            }
            "getIncomingQueue" => {
                a.arity(1)?;
                Command::GetIncomingQueue {
                    account_id: a.account(0)?,
                }
            }
            "getCompletedTx" => {
                a.arity_range(0, 1)?;
                Command::GetCompletedTx {
                    selector: a.selector(0)?,
                }
            }
            "getTransactionHistory" => {
                a.arity(1)?;
                Command::GetTransactionHistory {
                    account_id: a.account(0)?,
                }
            }
            "pledgeFund" | "redeemFund" | "nettingAdd" | "nettingSubtract" => {
                a.arity(3)?;
                let kind = match function {
                    "pledgeFund" => FundKind::Pledge,
                    "redeemFund" => FundKind::Redeem,
                    "nettingAdd" => FundKind::NettingAdd,
                    _ => FundKind::NettingSubtract,
                };
                Command::AdjustFund {
                    kind,
                    account_id: a.account(0)?,
                    currency: a.currency(1)?,
                    amount: a.positive(2)?,
                }
            }
            "moveOutFund" => {
                a.arity(4)?;
                Command::MoveOutFund {
                    account_id: a.account(0)?,
                    target_channel: Channel::parse(a.non_empty(1)?)?,
                    amount: a.positive(2)?,
                    currency: a.currency(3)?,
                }
            }
            "moveInFund" => {
                a.arity(1)?;
                Command::MoveInFund {
                    ref_id: a.ref_id(0)?,
                }
            }
            "conductMLNetting" => {
                a.arity(5)?;
                let cycle_id = match a.args[0].trim() {
                    "" => None,
                    raw => {
                        let id: u64 = raw.parse().map_err(|_| {
                            Error::BadArgument(format!("cycleID must be numeric, got {}", raw))
                        })?;
                        if id == 0 {
                            return Err(Error::BadArgument("cycleID must be positive".to_string()));
                        }
                        Some(id)
                    }
                };
                Command::ConductMLNetting(BankRequestInput {
                    cycle_id,
                    bank_id: a.account(1)?,
                    nettable: a.ref_list(2)?,
                    non_nettable: a.ref_list(3)?,
                    net_value: a.decimal(4)?,
                })
            }
            "expireMLNetting" => {
                a.arity(0)?;
                Command::ExpireMLNetting
            }
            "settleMLNetting" => {
                a.arity(0)?;
                Command::SettleMLNetting
            }
            "resetNettingCycle" => {
                a.arity(0)?;
                Command::ResetNettingCycle
            }
            "getCurrentNettingCycle" => {
                a.arity(0)?;
                Command::GetCurrentNettingCycle
            }
            "getBilateralNettableTxList" => {
                a.arity(2)?;
                Command::GetBilateralNettableTxList {
                    bank1: a.account(0)?,
                    bank2: a.account(1)?,
                }
            }
            "getNonNettableTxList" => {
                a.arity(0)?;
                Command::GetNonNettableTxList
            }
            "checkParticipation" => {
                a.arity(2)?;
                Command::CheckParticipation {
                    bank1: a.account(0)?,
                    bank2: a.account(1)?,
                }
            }
            "getState" => {
                a.arity(1)?;
                Command::GetState {
                    key: a.non_empty(0)?.to_string(),
                }
            }
            "getHistoryForKey" => {
                a.arity(1)?;
                Command::GetHistoryForKey {
                    key: a.non_empty(0)?.to_string(),
                }
            }
            other => {
                return Err(Error::BadArgument(format!(
                    "unknown function {}",
                    other
                )))
            }
        };
        Ok(command)
    }

    /// True for functions that never write
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Command::GetAccount { .. }
                | Command::ListAccounts
                | Command::GetChannelLiquidity
                | Command::GetQueue { .. }
                | Command::GetSortedQueues { .. }
                | Command::GetOutgoingQueue { .. }
                | Command::GetIncomingQueue { .. }
                | Command::GetCompletedTx { .. }
                | Command::GetTransactionHistory { .. }
                | Command::GetCurrentNettingCycle
                | Command::GetBilateralNettableTxList { .. }
                | Command::GetNonNettableTxList
                | Command::CheckParticipation { .. }
                | Command::GetState { .. }
                | Command::GetHistoryForKey { .. }
        )
    }
}

struct Args<'a> {
    function: &'a str,
    args: &'a [String],
}

impl<'a> Args<'a> {
    fn arity(&self, expected: usize) -> Result<()> {
        if self.args.len() != expected {
            return Err(Error::WrongArity {
                function: self.function.to_string(),
                expected: expected.to_string(),
                actual: self.args.len(),
            });
        }
        Ok(())
    }

    fn arity_range(&self, min: usize, max: usize) -> Result<()> {
        if self.args.len() < min || self.args.len() > max {
            return Err(Error::WrongArity {
                function: self.function.to_string(),
                expected: format!("{}..={}", min, max),
                actual: self.args.len(),
            });
        }
        Ok(())
    }

    fn non_empty(&self, i: usize) -> Result<&'a str> {
        let raw = self.args[i].as_str();
        if raw.trim().is_empty() {
            return Err(Error::BadArgument(format!(
                "argument {} of {} must be a non-empty string",
                i + 1,
                self.function
            )));
        }
        Ok(raw)
    }

    fn account(&self, i: usize) -> Result<AccountId> {
        Ok(AccountId::parse(self.non_empty(i)?)?)
    }

    fn ref_id(&self, i: usize) -> Result<RefId> {
        Ok(RefId::parse(self.non_empty(i)?)?)
    }

    fn currency(&self, i: usize) -> Result<Currency> {
        Ok(Currency::parse(self.non_empty(i)?)?)
    }

    fn decimal(&self, i: usize) -> Result<Decimal> {
        let raw = self.non_empty(i)?.trim();
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|_| Error::BadArgument(format!("{} is not a number", raw)))
    }

    fn positive(&self, i: usize) -> Result<Decimal> {
        let value = self.decimal(i)?;
        if value <= Decimal::ZERO {
            return Err(Error::BadArgument(format!(
                "amount must be positive, got {}",
                value
            )));
        }
        Ok(value)
    }

    fn integer(&self, i: usize) -> Result<i64> {
        let raw = self.non_empty(i)?.trim();
        raw.parse()
            .map_err(|_| Error::BadArgument(format!("{} is not an integer", raw)))
    }

    fn boolean(&self, i: usize) -> Result<bool> {
        match self.non_empty(i)?.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            other => Err(Error::BadArgument(format!("{} is not a boolean", other))),
        }
    }

    fn ref_list(&self, i: usize) -> Result<Vec<RefId>> {
        let raw: Vec<String> = serde_json::from_str(self.non_empty(i)?)?;
        let mut refs = Vec::with_capacity(raw.len());
        for r in raw {
            let r = RefId::parse(&r)?;
            if refs.contains(&r) {
                return Err(Error::BadArgument(format!("{} is listed twice", r)));
            }
            refs.push(r);
        }
        Ok(refs)
    }

    fn selector(&self, i: usize) -> Result<Option<Selector>> {
        match self.args.get(i).map(|s| s.trim()) {
            None | Some("") => Ok(None),
            Some(raw) => Ok(Some(Selector::from_json(raw)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_fund_transfer() {
        let cmd = Command::parse("fundTransfer", &args(&["A", "B", "1", "40", "usd", "false"])).unwrap();
        match cmd {
            Command::FundTransfer(req) => {
                assert_eq!(req.amount, Decimal::from(40));
                assert_eq!(req.currency.code(), "USD");
                assert!(!req.put_to_queue);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arity_and_arguments() {
        let err = Command::parse("getAccount", &[]).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::WrongArity);

        let err = Command::parse("fundTransfer", &args(&["A", "B", "1", "-5", "USD", "false"])).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::BadArgument);

        let err = Command::parse("getAccount", &args(&[""])).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::BadArgument);

        let err = Command::parse("launchRocket", &[]).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::BadArgument);
    }

    #[test]
    fn test_parse_bank_request() {
        let cmd = Command::parse(
            "conductMLNetting",
            &args(&["", "X", r#"["r1","r2"]"#, "[]", "-12.5"]),
        )
        .unwrap();
        match cmd {
            Command::ConductMLNetting(input) => {
                assert_eq!(input.cycle_id, None);
                assert_eq!(input.nettable.len(), 2);
                assert_eq!(input.net_value, Decimal::new(-125, 1));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Command::parse("conductMLNetting", &args(&["0", "X", "[]", "[]", "0"])).is_err());
        assert!(Command::parse("conductMLNetting", &args(&["1", "X", r#"["a","a"]"#, "[]", "0"])).is_err());
    }

    #[test]
    fn test_optional_selector() {
        assert_eq!(
            Command::parse("getSortedQueues", &[]).unwrap(),
            Command::GetSortedQueues { selector: None }
        );
        let cmd = Command::parse("getSortedQueues", &args(&[r#"{"selector":{"sender":"A"}}"#])).unwrap();
        assert!(matches!(cmd, Command::GetSortedQueues { selector: Some(_) }));
        assert!(Command::parse("getSortedQueues", &args(&["a", "b"])).is_err());
    }

    #[test]
    fn test_read_only_flag() {
        assert!(Command::parse("getNonNettableTxList", &[]).unwrap().is_read_only());
        assert!(!Command::parse("settleMLNetting", &[]).unwrap().is_read_only());
    }
}
