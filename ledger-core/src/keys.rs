//! State key schema
//!
//! | Entity | Key |
//! |---|---|
//! | Account | composite `account{accountID}` |
//! | Queued transaction | composite `queue{refID}` |
//! | Completed transaction | composite `completedtx{refID}` |
//! | Pledge/redeem, move-out/in, transient fund | plain `refID` |
//! | Netting cycle | `nettingcycle` |
//!
//! Composite keys are `\0 indexName \0 part \0 part \0 ...`.

use crate::types::{AccountId, RefId};
use crate::{Error, Result};

/// Delimiter used inside composite keys
pub const COMPOSITE_KEY_SEPARATOR: char = '\u{0}';

/// Singleton key of the netting cycle
pub const NETTING_CYCLE_KEY: &str = "nettingcycle";

/// Index name of account keys
pub const ACCOUNT_INDEX: &str = "account";

/// Index name of queued-transaction keys
pub const QUEUE_INDEX: &str = "queue";

/// Index name of completed-transaction keys
pub const COMPLETED_INDEX: &str = "completedtx";

/// Build a composite key, validating every part
pub fn create_composite_key(index: &str, parts: &[&str]) -> Result<String> {
    if index.is_empty() {
        return Err(Error::InvalidArgument(
            "composite key index must be non-empty".to_string(),
        ));
    }
    if index.contains(COMPOSITE_KEY_SEPARATOR)
        || parts.iter().any(|p| p.contains(COMPOSITE_KEY_SEPARATOR))
    {
        return Err(Error::InvalidArgument(
            "composite key parts must not contain NUL".to_string(),
        ));
    }
    Ok(composite_unchecked(index, parts))
}

fn composite_unchecked(index: &str, parts: &[&str]) -> String {
    let mut key = String::with_capacity(
        2 + index.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>(),
    );
    key.push(COMPOSITE_KEY_SEPARATOR);
    key.push_str(index);
    key.push(COMPOSITE_KEY_SEPARATOR);
    for part in parts {
        key.push_str(part);
        key.push(COMPOSITE_KEY_SEPARATOR);
    }
    key
}

/// Inverse of [`create_composite_key`]
pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>)> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_SEPARATOR)
        .and_then(|k| k.strip_suffix(COMPOSITE_KEY_SEPARATOR))
        .ok_or_else(|| Error::InvalidArgument(format!("not a composite key: {:?}", key)))?;

    let mut segments = body.split(COMPOSITE_KEY_SEPARATOR).map(str::to_string);
    let index = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidArgument(format!("composite key without index: {:?}", key)))?;
    Ok((index, segments.collect()))
}

/// Prefix covering every key of an index
pub fn index_prefix(index: &str) -> String {
    composite_unchecked(index, &[])
}

/// Key of an account. IDs are NUL-free by construction.
pub fn account_key(id: &AccountId) -> String {
    composite_unchecked(ACCOUNT_INDEX, &[id.as_str()])
}

/// Key of a queued transaction
pub fn queue_key(ref_id: &RefId) -> String {
    composite_unchecked(QUEUE_INDEX, &[ref_id.as_str()])
}

/// Key of a completed transaction
pub fn completed_key(ref_id: &RefId) -> String {
    composite_unchecked(COMPLETED_INDEX, &[ref_id.as_str()])
}

/// Key of pledge/redeem and cross-channel records
pub fn fund_key(ref_id: &RefId) -> String {
    ref_id.as_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_round_trip() {
        let key = create_composite_key("queue", &["abc", "def"]).unwrap();
        let (index, parts) = split_composite_key(&key).unwrap();
        assert_eq!(index, "queue");
        assert_eq!(parts, vec!["abc".to_string(), "def".to_string()]);
    }

    #[test]
    fn test_index_prefix_matches_keys() {
        let key = account_key(&AccountId::new("BANKA"));
        assert!(key.starts_with(&index_prefix(ACCOUNT_INDEX)));
        assert!(!queue_key(&RefId::new("x")).starts_with(&index_prefix(ACCOUNT_INDEX)));
    }

    #[test]
    fn test_rejects_embedded_separator() {
        assert!(create_composite_key("queue", &["a\u{0}b"]).is_err());
        assert!(create_composite_key("", &["a"]).is_err());
        assert!(split_composite_key("plainkey").is_err());
    }
}
