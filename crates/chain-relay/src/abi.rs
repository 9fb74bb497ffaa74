//! Minimal ABI encoding for the game contract
//!
//! Only what the relay needs: zero/one argument view calls, static word
//! decoding, a dynamic `address[]` return and the five game events.

use crate::error::LedgerError;
use agar_types::{Address, Amount, DomainEvent, Position};
use sha3::{Digest, Keccak256};

/// Size of one ABI word
pub const WORD: usize = 32;

pub const ENTER_EVENT: &str = "Enter(address,uint256,uint256,uint256)";
pub const MOVE_EVENT: &str = "Move(address,uint256,uint256)";
pub const LEAVE_EVENT: &str = "Leave(address,uint256)";
pub const REDEPOSIT_EVENT: &str = "Redeposit(address,uint256,uint256)";
pub const COLLISION_EVENT: &str = "Collision(address,address,uint256,uint256)";

pub fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Four-byte function selector
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `0x`-prefixed event topic hash
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak(signature.as_bytes())))
}

/// Calldata for a view call with no arguments
pub fn encode_call(signature: &str) -> String {
    format!("0x{}", hex::encode(selector(signature)))
}

/// Calldata for a view call taking one address
pub fn encode_call_with_address(signature: &str, address: &Address) -> String {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&address.to_bytes());
    format!("0x{}", hex::encode(data))
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, LedgerError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(trimmed).map_err(|e| LedgerError::Decode(format!("bad hex: {}", e)))
}

/// Parse a JSON-RPC hex quantity (`0x1a`)
pub fn parse_quantity(raw: &str) -> Result<u64, LedgerError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    if trimmed.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(trimmed, 16).map_err(|e| LedgerError::Decode(format!("bad quantity {}: {}", raw, e)))
}

/// Split return data or log data into 32-byte words
pub fn words(data: &[u8]) -> Result<Vec<[u8; 32]>, LedgerError> {
    if data.len() % WORD != 0 {
        return Err(LedgerError::Decode(format!("data length {} is not word aligned", data.len())));
    }
    Ok(data
        .chunks(WORD)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Unsigned word that must fit in 128 bits
pub fn word_to_amount(word: &[u8; 32]) -> Result<Amount, LedgerError> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("uint256 exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn word_to_u64(word: &[u8; 32]) -> Result<u64, LedgerError> {
    let value = word_to_amount(word)?;
    u64::try_from(value).map_err(|_| LedgerError::Decode("uint256 exceeds 64 bits".to_string()))
}

pub fn word_to_address(word: &[u8; 32]) -> Address {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Address::from_bytes(bytes)
}

fn word_at(words: &[[u8; 32]], index: usize) -> Result<&[u8; 32], LedgerError> {
    words
        .get(index)
        .ok_or_else(|| LedgerError::Decode(format!("missing word {}", index)))
}

/// Decode a single static uint return value
pub fn decode_uint(data: &[u8]) -> Result<Amount, LedgerError> {
    word_to_amount(word_at(&words(data)?, 0)?)
}

/// Decode a returned dynamic `address[]`
pub fn decode_address_array(data: &[u8]) -> Result<Vec<Address>, LedgerError> {
    let all = words(data)?;
    let offset = word_to_u64(word_at(&all, 0)?)? as usize;
    if offset % WORD != 0 {
        return Err(LedgerError::Decode("unaligned array offset".to_string()));
    }
    let start = offset / WORD;
    let len = word_to_u64(word_at(&all, start)?)? as usize;
    (0..len)
        .map(|i| word_at(&all, start + 1 + i).map(word_to_address))
        .collect()
}

/// Decode the `players(address)` tuple `(monAmount, x, y)`
pub fn decode_player(data: &[u8]) -> Result<(Amount, Position), LedgerError> {
    let all = words(data)?;
    let value = word_to_amount(word_at(&all, 0)?)?;
    let x = word_to_u64(word_at(&all, 1)?)?;
    let y = word_to_u64(word_at(&all, 2)?)?;
    Ok((value, Position::new(x, y)))
}

/// Decode a contract log into a domain event.
///
/// Event arguments are read positionally from the indexed topics followed
/// by the data words, so decoding does not depend on which address
/// parameters are indexed. Returns `Ok(None)` for unrelated topics.
pub fn decode_log(topics: &[String], data: &str) -> Result<Option<DomainEvent>, LedgerError> {
    let Some(topic0) = topics.first() else {
        return Ok(None);
    };
    let topic0 = topic0.to_ascii_lowercase();

    let mut args = Vec::new();
    for topic in &topics[1..] {
        let bytes = decode_hex(topic)?;
        args.extend(words(&bytes)?);
    }
    args.extend(words(&decode_hex(data)?)?);

    let address = |i: usize| word_at(&args, i).map(word_to_address);
    let amount = |i: usize| word_at(&args, i).and_then(word_to_amount);
    let coord = |i: usize| word_at(&args, i).and_then(word_to_u64);

    let event = if topic0 == event_topic(ENTER_EVENT) {
        DomainEvent::Joined {
            address: address(0)?,
            value: amount(1)?,
            position: Position::new(coord(2)?, coord(3)?),
        }
    } else if topic0 == event_topic(MOVE_EVENT) {
        DomainEvent::Moved {
            address: address(0)?,
            position: Position::new(coord(1)?, coord(2)?),
        }
    } else if topic0 == event_topic(LEAVE_EVENT) {
        DomainEvent::Left {
            address: address(0)?,
            value: amount(1)?,
        }
    } else if topic0 == event_topic(REDEPOSIT_EVENT) {
        DomainEvent::Redeposited {
            address: address(0)?,
            added: amount(1)?,
            new_value: amount(2)?,
        }
    } else if topic0 == event_topic(COLLISION_EVENT) {
        DomainEvent::Absorbed {
            winner: address(0)?,
            loser: address(1)?,
            winner_new_value: amount(2)?,
            loser_value: amount(3)?,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint_word(v: u128) -> String {
        format!("{:064x}", v)
    }

    fn address_word(a: &Address) -> String {
        format!("{:0>64}", &a.as_str()[2..])
    }

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256)
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn test_encode_call_with_address() {
        let a = Address::from_bytes([0x11; 20]);
        let data = encode_call_with_address("players(address)", &a);
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.ends_with(&"11".repeat(20)));
    }

    #[test]
    fn test_decode_collision_with_indexed_addresses() {
        let w = Address::from_bytes([1; 20]);
        let l = Address::from_bytes([2; 20]);
        let topics = vec![
            event_topic(COLLISION_EVENT),
            format!("0x{}", address_word(&w)),
            format!("0x{}", address_word(&l)),
        ];
        let data = format!("0x{}{}", uint_word(80), uint_word(30));
        let event = decode_log(&topics, &data).unwrap().unwrap();
        assert_eq!(
            event,
            DomainEvent::Absorbed { winner: w, loser: l, winner_new_value: 80, loser_value: 30 }
        );
    }

    #[test]
    fn test_decode_move_without_indexed_address() {
        let a = Address::from_bytes([0xaa; 20]);
        let data = format!("0x{}{}{}", address_word(&a), uint_word(500), uint_word(450));
        let event = decode_log(&[event_topic(MOVE_EVENT)], &data).unwrap().unwrap();
        assert_eq!(event, DomainEvent::Moved { address: a, position: Position::new(500, 450) });
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let topics = vec![event_topic("Transfer(address,address,uint256)")];
        assert!(decode_log(&topics, "0x").unwrap().is_none());
    }

    #[test]
    fn test_truncated_log_is_error() {
        let topics = vec![event_topic(LEAVE_EVENT)];
        assert!(decode_log(&topics, &format!("0x{}", uint_word(1))).is_err());
    }

    #[test]
    fn test_decode_address_array() {
        let a = Address::from_bytes([3; 20]);
        let b = Address::from_bytes([4; 20]);
        let raw = format!(
            "{}{}{}{}",
            uint_word(32),
            uint_word(2),
            address_word(&a),
            address_word(&b)
        );
        let decoded = decode_address_array(&hex::decode(raw).unwrap()).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }
}
