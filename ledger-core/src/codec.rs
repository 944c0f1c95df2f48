//! Canonical JSON codec
//!
//! Every entity written to the state store passes through [`encode`] and every
//! entity read back passes through [`decode`]. Decoding rejects:
//!
//! - unknown fields (entities are `deny_unknown_fields`)
//! - a `docType` outside the entity's accepted set
//! - a `schemaVersion` newer than [`SCHEMA_VERSION`]

use crate::types::{
    Account, CompletedTransaction, DocType, MoveOutInFund, NettingCycle, PledgeRedeemFund,
    QueuedTransaction, SCHEMA_VERSION,
};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A stored entity with a `docType` discriminator
pub trait Document: Serialize + DeserializeOwned {
    /// Discriminator carried by this value
    fn doc_type(&self) -> DocType;

    /// Schema version carried by this value
    fn schema_version(&self) -> u32;

    /// Whether a decoded value with this discriminator is acceptable
    fn accepts(doc_type: DocType) -> bool;
}

/// Encode an entity to canonical JSON bytes
pub fn encode<T: Document>(doc: &T) -> Result<Vec<u8>> {
    if !T::accepts(doc.doc_type()) {
        return Err(Error::Serialization(format!(
            "refusing to encode docType {}",
            doc.doc_type()
        )));
    }
    Ok(serde_json::to_vec(doc)?)
}

/// Decode and validate an entity
pub fn decode<T: Document>(bytes: &[u8]) -> Result<T> {
    let doc: T = serde_json::from_slice(bytes)?;
    if !T::accepts(doc.doc_type()) {
        return Err(Error::Serialization(format!(
            "unexpected docType {}",
            doc.doc_type()
        )));
    }
    if doc.schema_version() > SCHEMA_VERSION {
        return Err(Error::Serialization(format!(
            "schemaVersion {} is newer than supported {}",
            doc.schema_version(),
            SCHEMA_VERSION
        )));
    }
    Ok(doc)
}

macro_rules! document {
    ($ty:ty, $($doc:path),+) => {
        impl Document for $ty {
            fn doc_type(&self) -> DocType {
                self.doc_type
            }

            fn schema_version(&self) -> u32 {
                self.schema_version
            }

            fn accepts(doc_type: DocType) -> bool {
                matches!(doc_type, $($doc)|+)
            }
        }
    };
}

document!(Account, DocType::Account);
document!(QueuedTransaction, DocType::Queue);
document!(CompletedTransaction, DocType::CompletedTx);
document!(
    PledgeRedeemFund,
    DocType::PledgeFund,
    DocType::RedeemFund,
    DocType::NettingAdd,
    DocType::NettingSubtract
);
document!(
    MoveOutInFund,
    DocType::MoveOutFund,
    DocType::MoveInFund,
    DocType::TransientFund
);
document!(NettingCycle, DocType::NettingCycle);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, AccountStatus, Currency};
    use rust_decimal::Decimal;

    fn account() -> Account {
        Account::new(
            AccountId::new("A"),
            Currency::parse("USD").unwrap(),
            Decimal::new(12_550, 2),
            AccountStatus::Normal,
        )
    }

    #[test]
    fn test_encode_is_stable() {
        let a = encode(&account()).unwrap();
        let b = encode(&decode::<Account>(&a).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_schema_version_defaults() {
        let legacy = br#"{"docType":"account","accountID":"A","currency":"USD","amount":5,"status":"NORMAL"}"#;
        let account: Account = decode(legacy).unwrap();
        assert_eq!(account.schema_version, SCHEMA_VERSION);
        assert_eq!(account.amount, Decimal::from(5));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let doc = br#"{"docType":"account","accountID":"A","currency":"USD","amount":5,"status":"NORMAL","owner":"x"}"#;
        assert!(decode::<Account>(doc).is_err());
    }

    #[test]
    fn test_rejects_foreign_doc_type() {
        let doc = br#"{"docType":"queue","accountID":"A","currency":"USD","amount":5,"status":"NORMAL"}"#;
        assert!(decode::<Account>(doc).is_err());
    }

    #[test]
    fn test_rejects_newer_schema() {
        let doc = br#"{"docType":"account","schemaVersion":2,"accountID":"A","currency":"USD","amount":5,"status":"NORMAL"}"#;
        assert!(decode::<Account>(doc).is_err());
    }
}
