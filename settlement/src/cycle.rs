//! Multilateral netting cycle controller
//!
//! State machine on the `nettingcycle` singleton:
//!
//! ```text
//!  SETTLED ─start─▶ ONGOING ─consensus─▶ ACHIEVED ─settle─▶ SETTLED
//!      ▲                │                     │
//!      │                │                     └─imbalance─▶ INVALID ─reset─▶ SETTLED
//!      │                └─timeout────────────▶ EXPIRED ─reset─▶ SETTLED
//! ```
//!
//! Expiry is a timestamp comparison. An ONGOING cycle older than the
//! configured timeout reads as EXPIRED everywhere; `expireMLNetting` persists
//! that status.
//!
//! Every refID a bank lists as nettable is frozen while the cycle runs and
//! unfrozen when the cycle settles or resets.

use crate::command::BankRequestInput;
use crate::context::ServiceContext;
use crate::funds;
use crate::netting::NettingEngine;
use crate::types::{CycleSettlement, NetPosting};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{
    keys::NETTING_CYCLE_KEY, queue, types::checked_sum, BankId, BankRequest, CycleStatus, DocType,
    FundKind, NettingCycle, QueuedTransaction, RefId, Selector, StateTx,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Stored cycle, or the initial SETTLED cycle 0 when none was written yet
pub fn load(tx: &StateTx<'_>) -> Result<NettingCycle> {
    Ok(tx.get_doc(NETTING_CYCLE_KEY)?.unwrap_or_default())
}

/// Status after applying the timeout
pub fn effective_status(cycle: &NettingCycle, now: DateTime<Utc>, expiry: Duration) -> CycleStatus {
    if cycle.status == CycleStatus::Ongoing && now - cycle.created >= expiry {
        CycleStatus::Expired
    } else {
        cycle.status
    }
}

/// Cycle as seen at the invocation timestamp
pub fn current(ctx: &ServiceContext<'_, '_>) -> Result<NettingCycle> {
    let mut cycle = load(ctx.tx())?;
    cycle.status = effective_status(&cycle, ctx.now(), ctx.config().cycle_expiry());
    Ok(cycle)
}

fn store(tx: &mut StateTx<'_>, cycle: &NettingCycle) -> Result<()> {
    tx.put_doc(NETTING_CYCLE_KEY, cycle)?;
    Ok(())
}

fn nettable_union(cycle: &NettingCycle) -> BTreeSet<RefId> {
    cycle
        .bank_requests
        .values()
        .flat_map(|r| r.nettable_list.iter().cloned())
        .collect()
}

/// Unfreeze every frozen queue entry, returning how many changed
fn unfreeze_all(tx: &mut StateTx<'_>, now: DateTime<Utc>) -> Result<usize> {
    let frozen = queue::list_matching(tx, &Selector::new().eq("isFrozen", true))?;
    for entry in &frozen {
        queue::set_frozen(tx, &entry.ref_id, false, now)?;
    }
    Ok(frozen.len())
}

/// Drives the netting cycle singleton
#[derive(Debug, Clone)]
pub struct CycleController {
    netting: NettingEngine,
}

impl CycleController {
    /// Create a controller using `netting` for position computation
    pub fn new(netting: NettingEngine) -> Self {
        Self { netting }
    }

    /// Write the initial singleton if absent
    pub fn init_ledger(&self, ctx: &mut ServiceContext<'_, '_>) -> Result<NettingCycle> {
        if let Some(cycle) = ctx.tx().get_doc::<NettingCycle>(NETTING_CYCLE_KEY)? {
            return Ok(cycle);
        }
        let cycle = NettingCycle::default();
        store(ctx.tx_mut(), &cycle)?;
        tracing::info!("Netting cycle initialized");
        Ok(cycle)
    }

    /// Start a cycle or join the running one
    pub fn submit_bank_request(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        input: BankRequestInput,
    ) -> Result<NettingCycle> {
        ctx.require_caller(&input.bank_id)?;
        let now = ctx.now();
        let mut cycle = load(ctx.tx())?;
        let status = effective_status(&cycle, now, ctx.config().cycle_expiry());

        if matches!(status, CycleStatus::Achieved | CycleStatus::Invalid) {
            return Err(Error::CycleUnsettled {
                cycle_id: cycle.cycle_id,
                status,
            });
        }

        match input.cycle_id {
            None => {
                if status == CycleStatus::Ongoing {
                    return Err(Error::CycleMismatch(format!(
                        "cycle {} is ongoing, join it by its cycleID",
                        cycle.cycle_id
                    )));
                }
                if status == CycleStatus::Expired {
                    let released = unfreeze_all(ctx.tx_mut(), now)?;
                    tracing::info!(
                        cycle_id = cycle.cycle_id,
                        released,
                        "Expired cycle replaced"
                    );
                }
                cycle.cycle_id += 1;
                cycle.status = CycleStatus::Ongoing;
                cycle.created = now;
                cycle.bank_requests.clear();
                tracing::info!(cycle_id = cycle.cycle_id, bank_id = %input.bank_id, "Netting cycle started");
            }
            Some(id) => {
                if id != cycle.cycle_id {
                    return Err(Error::CycleMismatch(format!(
                        "cycleID {} does not match current cycle {}",
                        id, cycle.cycle_id
                    )));
                }
                match status {
                    CycleStatus::Ongoing => {}
                    CycleStatus::Expired => return Err(Error::CycleExpired(id)),
                    _ => {
                        return Err(Error::CycleMismatch(format!(
                            "cycle {} is {}, start a new one without a cycleID",
                            id, status
                        )))
                    }
                }
            }
        }

        validate_request(ctx.tx(), &input)?;

        let previously_listed = nettable_union(&cycle);
        let request = BankRequest {
            doc_type: DocType::BankRequest,
            bank_request_id: format!("{}{}", cycle.cycle_id, input.bank_id),
            bank_id: input.bank_id.clone(),
            net_value: input.net_value,
            nettable_list: input.nettable,
            non_nettable_list: input.non_nettable,
        };
        if cycle.bank_requests.insert(input.bank_id.clone(), request).is_some() {
            tracing::debug!(cycle_id = cycle.cycle_id, bank_id = %input.bank_id, "Bank request replaced");
        }

        cycle.status = consensus(&cycle)?;
        cycle.updated = now;

        let listed = nettable_union(&cycle);
        for ref_id in previously_listed.difference(&listed) {
            if queue::try_get(ctx.tx(), ref_id)?.is_some() {
                queue::set_frozen(ctx.tx_mut(), ref_id, false, now)?;
            }
        }
        for ref_id in &listed {
            queue::set_frozen(ctx.tx_mut(), ref_id, true, now)?;
        }

        store(ctx.tx_mut(), &cycle)?;
        tracing::info!(
            cycle_id = cycle.cycle_id,
            bank_id = %input.bank_id,
            status = %cycle.status,
            requests = cycle.bank_requests.len(),
            "Bank request accepted"
        );
        Ok(cycle)
    }

    /// Persist EXPIRED for a cycle past its timeout
    pub fn expire(&self, ctx: &mut ServiceContext<'_, '_>) -> Result<NettingCycle> {
        ctx.require_regulator()?;
        let mut cycle = load(ctx.tx())?;
        let status = effective_status(&cycle, ctx.now(), ctx.config().cycle_expiry());
        if cycle.status == CycleStatus::Ongoing && status == CycleStatus::Expired {
            cycle.status = CycleStatus::Expired;
            cycle.updated = ctx.now();
            store(ctx.tx_mut(), &cycle)?;
            tracing::info!(cycle_id = cycle.cycle_id, "Netting cycle expired");
        }
        Ok(cycle)
    }

    /// Settle every nettable reference of an ACHIEVED cycle and reset it.
    ///
    /// All or nothing: a net payer whose balance no longer covers its
    /// position fails the whole settlement with `Insufficient` and the cycle
    /// stays ACHIEVED until the payer is funded. ACHIEVED cycles do not expire
    /// and cannot be reset.
    pub fn settle_achieved(&self, ctx: &mut ServiceContext<'_, '_>) -> Result<CycleSettlement> {
        ctx.require_regulator()?;
        let now = ctx.now();
        let mut cycle = load(ctx.tx())?;
        if cycle.status != CycleStatus::Achieved {
            return Err(Error::BadArgument(format!(
                "cycle {} is {}, only an ACHIEVED cycle settles",
                cycle.cycle_id, cycle.status
            )));
        }

        let refs = nettable_union(&cycle);
        let entries = refs
            .iter()
            .map(|r| queue::get(ctx.tx(), r).map_err(Error::from))
            .collect::<Result<Vec<QueuedTransaction>>>()?;

        let positions = self.netting.net_positions(&entries)?;
        if let Some((currency, total)) = self
            .netting
            .imbalance(&positions)?
            .into_iter()
            .find(|(_, total)| !total.is_zero())
        {
            return Err(Error::BadArgument(format!(
                "settled set does not balance in {}: {}",
                currency, total
            )));
        }

        for (bank_id, request) in &cycle.bank_requests {
            let computed = positions
                .get(bank_id)
                .map(|p| p.net_position)
                .unwrap_or(Decimal::ZERO);
            if computed != request.net_value {
                tracing::warn!(
                    cycle_id = cycle.cycle_id,
                    bank_id = %bank_id,
                    claimed = %request.net_value,
                    computed = %computed,
                    "Claimed net value differs from settled position"
                );
            }
        }

        for entry in entries {
            queue::complete(ctx.tx_mut(), entry, ledger_core::CompletionStatus::Settled, now)?;
        }

        // Credits first so a receiver's posting never waits on a payer's
        let mut ordered: Vec<_> = positions.values().filter(|p| !p.net_position.is_zero()).collect();
        ordered.sort_by_key(|p| (p.is_net_payer(), p.bank_id.clone()));

        let mut postings = Vec::with_capacity(ordered.len());
        for position in ordered {
            let (kind, amount) = if position.is_net_receiver() {
                (FundKind::NettingAdd, position.net_position)
            } else {
                (FundKind::NettingSubtract, -position.net_position)
            };
            funds::post(ctx.tx_mut(), kind, &position.bank_id, &position.currency, amount, now)?;
            postings.push(NetPosting {
                account_id: position.bank_id.clone(),
                currency: position.currency.clone(),
                net_value: position.net_position,
            });
        }

        let released = unfreeze_all(ctx.tx_mut(), now)?;

        let settlement = CycleSettlement {
            cycle_id: cycle.cycle_id,
            settled: refs.into_iter().collect(),
            postings,
        };

        cycle.cycle_id = 0;
        cycle.status = CycleStatus::Settled;
        cycle.bank_requests.clear();
        cycle.updated = now;
        store(ctx.tx_mut(), &cycle)?;

        tracing::info!(
            cycle_id = settlement.cycle_id,
            settled = settlement.settled.len(),
            postings = settlement.postings.len(),
            released,
            "Netting cycle settled"
        );
        Ok(settlement)
    }

    /// Return an INVALID or EXPIRED cycle to SETTLED
    pub fn reset(&self, ctx: &mut ServiceContext<'_, '_>) -> Result<NettingCycle> {
        ctx.require_regulator()?;
        let now = ctx.now();
        let mut cycle = load(ctx.tx())?;
        let status = effective_status(&cycle, now, ctx.config().cycle_expiry());
        if !matches!(status, CycleStatus::Invalid | CycleStatus::Expired) {
            return Err(Error::BadArgument(format!(
                "cycle {} is {}, only INVALID or EXPIRED cycles reset",
                cycle.cycle_id, status
            )));
        }

        let released = unfreeze_all(ctx.tx_mut(), now)?;
        cycle.status = CycleStatus::Settled;
        cycle.bank_requests.clear();
        cycle.updated = now;
        store(ctx.tx_mut(), &cycle)?;

        tracing::info!(cycle_id = cycle.cycle_id, from = %status, released, "Netting cycle reset");
        Ok(cycle)
    }

    /// References listed as nettable by both banks of an ACHIEVED cycle
    pub fn bilateral_nettable(
        &self,
        ctx: &ServiceContext<'_, '_>,
        bank1: &BankId,
        bank2: &BankId,
    ) -> Result<Vec<RefId>> {
        let cycle = current(ctx)?;
        if cycle.status != CycleStatus::Achieved {
            return Err(Error::BadArgument(format!(
                "cycle {} is {}, nettable lists are final only when ACHIEVED",
                cycle.cycle_id, cycle.status
            )));
        }
        let lookup = |bank: &BankId| {
            cycle
                .bank_requests
                .get(bank)
                .map(|r| r.nettable_list.iter().cloned().collect::<BTreeSet<_>>())
                .ok_or_else(|| Error::not_found(format!("bank request of {}", bank)))
        };
        let first = lookup(bank1)?;
        let second = lookup(bank2)?;
        Ok(first.intersection(&second).cloned().collect())
    }

    /// References any bank excluded, sorted
    pub fn non_nettable(&self, ctx: &ServiceContext<'_, '_>) -> Result<Vec<RefId>> {
        let cycle = current(ctx)?;
        let refs: BTreeSet<RefId> = cycle
            .bank_requests
            .values()
            .flat_map(|r| r.non_nettable_list.iter().cloned())
            .collect();
        Ok(refs.into_iter().collect())
    }

    /// Whether either bank has a request in a running or achieved cycle
    pub fn check_participation(
        &self,
        ctx: &ServiceContext<'_, '_>,
        bank1: &BankId,
        bank2: &BankId,
    ) -> Result<bool> {
        Ok(current(ctx)?.is_participating(bank1, bank2))
    }
}

/// Every listed reference must be an active queued entry of the bank, and a
/// reference cannot be both nettable and non-nettable.
fn validate_request(tx: &StateTx<'_>, input: &BankRequestInput) -> Result<()> {
    if let Some(dup) = input.nettable.iter().find(|r| input.non_nettable.contains(r)) {
        return Err(Error::BadArgument(format!(
            "{} is listed as both nettable and non-nettable",
            dup
        )));
    }
    for ref_id in input.nettable.iter().chain(input.non_nettable.iter()) {
        let entry = queue::get(tx, ref_id)?;
        if !entry.involves(&input.bank_id) {
            return Err(Error::BadArgument(format!(
                "{} is not a transaction of {}",
                ref_id, input.bank_id
            )));
        }
    }
    Ok(())
}

/// Status after a join: ACHIEVED or INVALID once every nettable reference is
/// claimed by both of its banks, ONGOING before that.
fn consensus(cycle: &NettingCycle) -> Result<CycleStatus> {
    let mut claims: BTreeMap<&RefId, usize> = BTreeMap::new();
    for request in cycle.bank_requests.values() {
        for ref_id in &request.nettable_list {
            *claims.entry(ref_id).or_insert(0) += 1;
        }
    }

    if let Some((ref_id, _)) = claims.iter().find(|(_, n)| **n > 2) {
        return Err(Error::BadArgument(format!(
            "{} is claimed by more than two banks",
            ref_id
        )));
    }

    if claims.is_empty() || claims.values().any(|n| *n != 2) {
        return Ok(CycleStatus::Ongoing);
    }

    let total = checked_sum(cycle.bank_requests.values().map(|r| r.net_value))?;
    Ok(if total.is_zero() {
        CycleStatus::Achieved
    } else {
        CycleStatus::Invalid
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ledger_core::types::SCHEMA_VERSION;
    use ledger_core::AccountId;

    fn request(bank: &str, net: i64, nettable: &[&str]) -> BankRequest {
        BankRequest {
            doc_type: DocType::BankRequest,
            bank_request_id: format!("1{}", bank),
            bank_id: AccountId::new(bank),
            net_value: Decimal::from(net),
            nettable_list: nettable.iter().map(|r| RefId::new(*r)).collect(),
            non_nettable_list: vec![],
        }
    }

    fn cycle_with(requests: Vec<BankRequest>) -> NettingCycle {
        let mut cycle = NettingCycle {
            cycle_id: 1,
            status: CycleStatus::Ongoing,
            schema_version: SCHEMA_VERSION,
            ..NettingCycle::default()
        };
        for r in requests {
            cycle.bank_requests.insert(r.bank_id.clone(), r);
        }
        cycle
    }

    #[test]
    fn test_consensus_waits_for_both_sides() {
        let cycle = cycle_with(vec![request("X", -10, &["xy"])]);
        assert_eq!(consensus(&cycle).unwrap(), CycleStatus::Ongoing);
    }

    #[test]
    fn test_consensus_achieved_and_invalid() {
        let cycle = cycle_with(vec![request("X", -10, &["xy"]), request("Y", 10, &["xy"])]);
        assert_eq!(consensus(&cycle).unwrap(), CycleStatus::Achieved);

        let cycle = cycle_with(vec![request("X", -10, &["xy"]), request("Y", 5, &["xy"])]);
        assert_eq!(consensus(&cycle).unwrap(), CycleStatus::Invalid);
    }

    #[test]
    fn test_consensus_rejects_triple_claim() {
        let cycle = cycle_with(vec![
            request("X", 0, &["r"]),
            request("Y", 0, &["r"]),
            request("Z", 0, &["r"]),
        ]);
        assert!(consensus(&cycle).is_err());
    }

    #[test]
    fn test_consensus_total_overflow_rejected() {
        let mut x = request("X", 0, &["xy"]);
        x.net_value = Decimal::MAX;
        let mut y = request("Y", 0, &["xy"]);
        y.net_value = Decimal::MAX;
        let err = consensus(&cycle_with(vec![x, y])).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::BadArgument);
    }

    #[test]
    fn test_empty_lists_stay_ongoing() {
        let cycle = cycle_with(vec![request("X", 0, &[]), request("Y", 0, &[])]);
        assert_eq!(consensus(&cycle).unwrap(), CycleStatus::Ongoing);
    }

    #[test]
    fn test_effective_status_expires_ongoing_only() {
        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        let mut cycle = cycle_with(vec![]);
        cycle.created = t0;
        let ten = Duration::minutes(10);

        assert_eq!(effective_status(&cycle, t0 + Duration::minutes(9), ten), CycleStatus::Ongoing);
        assert_eq!(effective_status(&cycle, t0 + ten, ten), CycleStatus::Expired);

        cycle.status = CycleStatus::Achieved;
        assert_eq!(effective_status(&cycle, t0 + Duration::hours(5), ten), CycleStatus::Achieved);
    }
}
