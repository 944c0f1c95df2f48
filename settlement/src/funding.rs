//! Funding chaincode
//!
//! Installed on the intermediary channel. Holds `transientfund` records
//! between a move-out on the source channel and the move-in on the
//! destination channel.
//!
//! `createTransientFund` takes either the fund itself (`[fundJSON]`, pushed
//! by the source chaincode during move-out) or a pointer to it
//! (`[refID, sourceChannel]`), in which case the `moveoutfund` record is
//! read from the source channel's settlement chaincode.

use crate::config::Config;
use crate::context::ServiceContext;
use crate::transfer::{CREATE_TRANSIENT_FUND, GET_STATE};
use crate::{Error, Result};
use ledger_core::{
    codec, keys::fund_key, Chaincode, Channel, DocType, MoveOutInFund, RefId, Response, Stub,
};

/// Chaincode of the funding channel
#[derive(Debug, Clone)]
pub struct FundingContract {
    config: Config,
}

impl FundingContract {
    /// Create the chaincode
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn create_transient_fund(
        &self,
        ctx: &mut ServiceContext<'_, '_>,
        args: &[String],
    ) -> Result<MoveOutInFund> {
        let fund = match args {
            [fund_json] => {
                let fund: MoveOutInFund = codec::decode(fund_json.as_bytes())?;
                if fund.doc_type != DocType::TransientFund {
                    return Err(Error::BadArgument(format!(
                        "expected a transientfund, got {}",
                        fund.doc_type
                    )));
                }
                fund
            }
            [ref_id, source_channel] => {
                let ref_id = RefId::parse(ref_id)?;
                let source = Channel::parse(source_channel)?;
                let chaincode = ctx.config().bilateral_chaincode_name.clone();
                let response =
                    ctx.invoke_chaincode(&source, &chaincode, GET_STATE, &[ref_id.to_string()])?;
                if !response.is_ok() {
                    return Err(Error::CrossChannel(response.message));
                }
                let moved_out: MoveOutInFund = codec::decode(&response.payload)?;
                if moved_out.doc_type != DocType::MoveOutFund || moved_out.ref_id != ref_id {
                    return Err(Error::BadArgument(format!(
                        "{} on {} is not a moveoutfund record",
                        ref_id, source
                    )));
                }
                MoveOutInFund {
                    doc_type: DocType::TransientFund,
                    create_time: ctx.now(),
                    ..moved_out
                }
            }
            _ => {
                return Err(Error::WrongArity {
                    function: CREATE_TRANSIENT_FUND.to_string(),
                    expected: "1..=2".to_string(),
                    actual: args.len(),
                })
            }
        };

        ctx.require_caller(&fund.account_id)?;
        let key = fund_key(&fund.ref_id);
        if ctx.tx().get(&key)?.is_some() {
            return Err(Error::already_exists(format!("transient fund {}", fund.ref_id)));
        }
        ctx.tx_mut().put_doc(&key, &fund)?;

        tracing::info!(
            ref_id = %fund.ref_id,
            account_id = %fund.account_id,
            from = %fund.channel_from,
            to = %fund.channel_to,
            "Transient fund created"
        );
        Ok(fund)
    }

    fn get_state(&self, ctx: &ServiceContext<'_, '_>, args: &[String]) -> Result<Vec<u8>> {
        let [key] = args else {
            return Err(Error::WrongArity {
                function: GET_STATE.to_string(),
                expected: "1".to_string(),
                actual: args.len(),
            });
        };
        ctx.tx()
            .get(key)?
            .ok_or_else(|| Error::not_found(format!("key {}", key)))
    }
}

impl Chaincode for FundingContract {
    fn invoke(&self, stub: &mut Stub<'_>, function: &str, args: &[String]) -> Response {
        let mut ctx = ServiceContext::new(stub, &self.config);
        let result = match function {
            CREATE_TRANSIENT_FUND => self
                .create_transient_fund(&mut ctx, args)
                .and_then(|fund| {
                    ctx.emit(
                        CREATE_TRANSIENT_FUND,
                        &crate::types::ChaincodeEvent {
                            op: CREATE_TRANSIENT_FUND.to_string(),
                            ref_id: Some(fund.ref_id.clone()),
                            account_id: Some(fund.account_id.clone()),
                        },
                    )?;
                    Ok(codec::encode(&fund)?)
                }),
            GET_STATE => self.get_state(&ctx, args),
            other => Err(Error::BadArgument(format!("unknown function {}", other))),
        };
        match result {
            Ok(payload) => Response::ok(payload),
            Err(e) => Response::error(e.kind(), e),
        }
    }
}
