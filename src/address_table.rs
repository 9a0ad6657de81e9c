//! Address-table lookup parsing and account resolution
//!
//! Wire format of a lookup-table account, little-endian, starting at
//! offset 8: `[u32 count][u32 deactivation_slot][32-byte address x count]`.
//! Resolution law: index `i` names the static account when `i < static_len`,
//! otherwise the table-expanded account at `i - static_len`, writable
//! indices expanded before readonly.

use solana_sdk::instruction::AccountMeta;
use solana_sdk::message::VersionedMessage;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

use crate::chain_rpc::ChainRpc;
use crate::error::BuildError;

/// Header bytes before the table body
pub const LOOKUP_TABLE_META_OFFSET: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    pub deactivation_slot: u32,
    pub addresses: Vec<Pubkey>,
}

/// Decode a lookup-table account's data
pub fn parse_lookup_table(data: &[u8]) -> Result<LookupTable, BuildError> {
    let body = data
        .get(LOOKUP_TABLE_META_OFFSET..)
        .ok_or_else(|| BuildError::PoolStateUnavailable("lookup table truncated".into()))?;
    if body.len() < 8 {
        return Err(BuildError::PoolStateUnavailable(
            "lookup table header truncated".into(),
        ));
    }
    let count = u32::from_le_bytes(body[0..4].try_into().expect("4 bytes")) as usize;
    let deactivation_slot = u32::from_le_bytes(body[4..8].try_into().expect("4 bytes"));
    let needed = 8 + count * 32;
    if body.len() < needed {
        return Err(BuildError::PoolStateUnavailable(format!(
            "lookup table body {} bytes, need {}",
            body.len(),
            needed
        )));
    }
    let mut addresses = Vec::with_capacity(count);
    for i in 0..count {
        let start = 8 + i * 32;
        let bytes: [u8; 32] = body[start..start + 32].try_into().expect("32 bytes");
        addresses.push(Pubkey::from(bytes));
    }
    Ok(LookupTable {
        deactivation_slot,
        addresses,
    })
}

/// Encode a lookup-table body back to account bytes (zeroed meta prefix)
pub fn encode_lookup_table(table: &LookupTable) -> Vec<u8> {
    let mut data = vec![0u8; LOOKUP_TABLE_META_OFFSET];
    data.extend_from_slice(&(table.addresses.len() as u32).to_le_bytes());
    data.extend_from_slice(&table.deactivation_slot.to_le_bytes());
    for address in &table.addresses {
        data.extend_from_slice(address.as_ref());
    }
    data
}

/// Table-expanded accounts of one message: all writable indices across the
/// message's tables, then all readonly indices.
#[derive(Debug, Clone, Default)]
pub struct ExpandedLookups {
    pub writable: Vec<Pubkey>,
    pub readonly: Vec<Pubkey>,
}

/// Fetch and expand every lookup table a message references
pub async fn expand_message_lookups(
    rpc: &Arc<dyn ChainRpc>,
    message: &VersionedMessage,
) -> Result<ExpandedLookups, BuildError> {
    let Some(lookups) = message.address_table_lookups() else {
        return Ok(ExpandedLookups::default());
    };
    if lookups.is_empty() {
        return Ok(ExpandedLookups::default());
    }

    let table_keys: Vec<Pubkey> = lookups.iter().map(|l| l.account_key).collect();
    let accounts = rpc
        .get_account_infos(
            &table_keys,
            solana_sdk::commitment_config::CommitmentConfig::confirmed(),
        )
        .await
        .map_err(|e| BuildError::Rpc(e.to_string()))?;

    let mut tables = Vec::with_capacity(lookups.len());
    for (key, account) in table_keys.iter().zip(accounts) {
        let account = account.ok_or_else(|| {
            BuildError::PoolStateUnavailable(format!("lookup table {} missing", key))
        })?;
        tables.push(parse_lookup_table(&account.data)?);
    }

    let mut expanded = ExpandedLookups::default();
    for (lookup, table) in lookups.iter().zip(&tables) {
        for &index in &lookup.writable_indexes {
            let address = table.addresses.get(index as usize).ok_or_else(|| {
                BuildError::PoolStateUnavailable(format!(
                    "writable index {} out of table bounds",
                    index
                ))
            })?;
            expanded.writable.push(*address);
        }
    }
    for (lookup, table) in lookups.iter().zip(&tables) {
        for &index in &lookup.readonly_indexes {
            let address = table.addresses.get(index as usize).ok_or_else(|| {
                BuildError::PoolStateUnavailable(format!(
                    "readonly index {} out of table bounds",
                    index
                ))
            })?;
            expanded.readonly.push(*address);
        }
    }
    Ok(expanded)
}

/// Resolve one compiled account index to a concrete meta.
///
/// Signer flags are assigned by the caller; writability follows the message
/// header for static accounts and the writable/readonly split for
/// table-loaded accounts.
pub fn resolve_account_index(
    index: u8,
    message: &VersionedMessage,
    lookups: &ExpandedLookups,
) -> Result<AccountMeta, BuildError> {
    let static_keys = message.static_account_keys();
    let i = index as usize;
    if i < static_keys.len() {
        let writable = message.is_maybe_writable(i, None);
        return Ok(AccountMeta {
            pubkey: static_keys[i],
            is_signer: false,
            is_writable: writable,
        });
    }
    let offset = i - static_keys.len();
    if offset < lookups.writable.len() {
        return Ok(AccountMeta {
            pubkey: lookups.writable[offset],
            is_signer: false,
            is_writable: true,
        });
    }
    let readonly_offset = offset - lookups.writable.len();
    if readonly_offset < lookups.readonly.len() {
        return Ok(AccountMeta {
            pubkey: lookups.readonly[readonly_offset],
            is_signer: false,
            is_writable: false,
        });
    }
    Err(BuildError::UnresolvedAccountIndex(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::message::{Message, VersionedMessage};

    #[test]
    fn test_lookup_table_round_trip() {
        let table = LookupTable {
            deactivation_slot: 77,
            addresses: vec![Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique()],
        };
        let bytes = encode_lookup_table(&table);
        let decoded = parse_lookup_table(&bytes).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(encode_lookup_table(&decoded), bytes);
    }

    #[test]
    fn test_truncated_table_is_rejected() {
        let table = LookupTable {
            deactivation_slot: 1,
            addresses: vec![Pubkey::new_unique()],
        };
        let mut bytes = encode_lookup_table(&table);
        bytes.truncate(bytes.len() - 5);
        assert!(parse_lookup_table(&bytes).is_err());
        assert!(parse_lookup_table(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_resolution_prefers_static_then_writable_then_readonly() {
        let payer = Pubkey::new_unique();
        let static_other = Pubkey::new_unique();
        let message = VersionedMessage::Legacy(Message::new_with_compiled_instructions(
            1,
            0,
            1,
            vec![payer, static_other],
            solana_sdk::hash::Hash::default(),
            vec![],
        ));
        let lookups = ExpandedLookups {
            writable: vec![Pubkey::new_unique(), Pubkey::new_unique()],
            readonly: vec![Pubkey::new_unique()],
        };

        let meta0 = resolve_account_index(0, &message, &lookups).unwrap();
        assert_eq!(meta0.pubkey, payer);

        let meta2 = resolve_account_index(2, &message, &lookups).unwrap();
        assert_eq!(meta2.pubkey, lookups.writable[0]);
        assert!(meta2.is_writable);

        let meta4 = resolve_account_index(4, &message, &lookups).unwrap();
        assert_eq!(meta4.pubkey, lookups.readonly[0]);
        assert!(!meta4.is_writable);

        let err = resolve_account_index(5, &message, &lookups).unwrap_err();
        assert_eq!(err, BuildError::UnresolvedAccountIndex(5));
    }
}
