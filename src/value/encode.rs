//! Head/tail ABI encoding for [`AbiValue`], the standard Solidity
//! calldata layout: static types occupy one 32-byte word in the head,
//! dynamic types occupy an offset pointer in the head and their contents in
//! the tail.

use primitive_types::{H160, U256};

use super::{AbiType, AbiValue};

const WORD: usize = 32;

pub fn encode_args(values: &[AbiValue]) -> Vec<u8> {
    let head_size: usize = values.len() * WORD;
    let mut heads = Vec::with_capacity(values.len());
    let mut tail = Vec::new();

    for value in values {
        if value.value_type().is_dynamic() {
            let offset = head_size + tail.len();
            heads.push(encode_word(U256::from(offset)));
            tail.extend(encode_dynamic_tail(value));
        } else {
            heads.push(encode_static(value));
        }
    }

    let mut out = Vec::with_capacity(head_size + tail.len());
    for head in heads {
        out.extend(head);
    }
    out.extend(tail);
    out
}

pub fn encode_selector_and_args(selector: [u8; 4], values: &[AbiValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + values.len() * WORD);
    out.extend_from_slice(&selector);
    out.extend(encode_args(values));
    out
}

fn encode_word(value: U256) -> Vec<u8> {
    let mut bytes = [0u8; WORD];
    value.to_big_endian(&mut bytes);
    bytes.to_vec()
}

fn encode_static(value: &AbiValue) -> Vec<u8> {
    match value {
        AbiValue::Address(addr) => left_pad(addr.as_bytes()),
        AbiValue::Bool(b) => encode_word(U256::from(*b as u64)),
        AbiValue::Uint(v, _) => encode_word(*v),
        AbiValue::Int(v, _) => encode_word(*v),
        AbiValue::FixedBytes(bytes) => right_pad(bytes),
        AbiValue::Array(items) if matches!(value.value_type(), AbiType::FixedArray(..)) => {
            items.iter().flat_map(|v| encode_static(v)).collect()
        }
        AbiValue::Tuple(items) if !value.value_type().is_dynamic() => {
            items.iter().flat_map(|v| encode_static(v)).collect()
        }
        _ => encode_dynamic_tail(value),
    }
}

/// Encodes a dynamic value's own tail contents (length prefix where
/// applicable, followed by its head/tail-encoded elements for arrays and
/// tuples).
fn encode_dynamic_tail(value: &AbiValue) -> Vec<u8> {
    match value {
        AbiValue::Bytes(bytes) => {
            let mut out = encode_word(U256::from(bytes.len() as u64));
            out.extend(right_pad(bytes));
            out
        }
        AbiValue::String(s) => encode_dynamic_tail(&AbiValue::Bytes(s.as_bytes().to_vec())),
        AbiValue::Array(items) => {
            let mut out = encode_word(U256::from(items.len() as u64));
            out.extend(encode_args(items));
            out
        }
        AbiValue::Tuple(items) => encode_args(items),
        other => encode_static(other),
    }
}

fn left_pad(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; WORD - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

fn right_pad(bytes: &[u8]) -> Vec<u8> {
    let padded_len = ((bytes.len() + WORD - 1) / WORD).max(1) * WORD;
    let mut out = bytes.to_vec();
    out.resize(padded_len, 0);
    out
}

/// Decodes a single static-width word as an address; used when reading
/// return data shaped like `(address)`, e.g. deployment event arguments.
pub fn decode_address_word(word: &[u8]) -> Option<H160> {
    if word.len() != WORD {
        return None;
    }
    Some(H160::from_slice(&word[WORD - 20..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_uint() {
        let encoded = encode_args(&[AbiValue::Uint(U256::from(42u64), 256)]);
        assert_eq!(encoded.len(), 32);
        assert_eq!(encoded[31], 42);
    }

    #[test]
    fn encodes_dynamic_bytes_with_offset_and_length() {
        let encoded = encode_args(&[AbiValue::Bytes(vec![0xde, 0xad])]);
        // head: one word (offset = 32)
        assert_eq!(U256::from_big_endian(&encoded[0..32]), U256::from(32u64));
        // tail: length word then right-padded content
        assert_eq!(U256::from_big_endian(&encoded[32..64]), U256::from(2u64));
        assert_eq!(&encoded[64..66], &[0xde, 0xad]);
        assert_eq!(encoded.len(), 32 + 32 + 32);
    }

    #[test]
    fn encodes_mixed_static_and_dynamic_args() {
        let encoded = encode_args(&[
            AbiValue::Uint(U256::from(7u64), 256),
            AbiValue::Bytes(vec![1, 2, 3]),
        ]);
        // two head words + tail (length word + one data word)
        assert_eq!(encoded.len(), 32 * 4);
        assert_eq!(U256::from_big_endian(&encoded[32..64]), U256::from(64u64));
    }
}
