//! On-disk corpus layout: file naming, pretty-printed JSON, and the
//! deterministic dedup hash (§4.7, §6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use primitive_types::{H160, U256};

use crate::artifacts::ArtifactSet;
use crate::error::{CorpusError, Result};
use crate::sequence::{Call, CallData, CallSequence, CallSequenceElement};
use crate::value::{AbiType, AbiValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Mutable,
    Immutable,
    TestResults,
}

impl Partition {
    pub fn relative_dir(self) -> &'static str {
        match self {
            Partition::Mutable => "call_sequences/mutable",
            Partition::Immutable => "call_sequences/immutable",
            Partition::TestResults => "test_results",
        }
    }
}

/// The wire shape of one call, matching §6's JSON schema exactly — a
/// `dataAbi`/`data` union, values serialized as hex strings.
#[derive(Debug, Serialize, Deserialize)]
struct CallJson {
    from: String,
    to: Option<String>,
    value: String,
    #[serde(rename = "gasLimit")]
    gas_limit: u64,
    #[serde(rename = "dataAbi", skip_serializing_if = "Option::is_none")]
    data_abi: Option<DataAbiJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataAbiJson {
    #[serde(rename = "methodSignature")]
    method_signature: String,
    args: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ElementJson {
    call: CallJson,
    #[serde(rename = "blockNumberDelay")]
    block_number_delay: u64,
    #[serde(rename = "blockTimestampDelay")]
    block_timestamp_delay: u64,
}

fn element_to_json(element: &CallSequenceElement) -> ElementJson {
    let call = &element.call;
    let (data_abi, data) = match &call.data {
        CallData::Abi {
            method_signature,
            args,
            ..
        } => (
            Some(DataAbiJson {
                method_signature: method_signature.clone(),
                args: args.iter().map(abi_value_to_json).collect(),
            }),
            None,
        ),
        CallData::Raw(bytes) => (None, Some(format!("0x{}", hex::encode(bytes)))),
    };
    ElementJson {
        call: CallJson {
            from: format!("0x{}", hex::encode(call.from.as_bytes())),
            to: call.to.map(|a| format!("0x{}", hex::encode(a.as_bytes()))),
            value: format!("0x{:x}", call.value),
            gas_limit: call.gas_limit,
            data_abi,
            data,
        },
        block_number_delay: element.block_number_delay,
        block_timestamp_delay: element.block_timestamp_delay,
    }
}

fn abi_value_to_json(value: &crate::value::AbiValue) -> serde_json::Value {
    use crate::value::AbiValue::*;
    match value {
        Address(a) => serde_json::Value::String(format!("0x{}", hex::encode(a.as_bytes()))),
        Bool(b) => serde_json::Value::Bool(*b),
        Uint(v, _) | Int(v, _) => serde_json::Value::String(format!("0x{v:x}")),
        FixedBytes(b) | Bytes(b) => serde_json::Value::String(format!("0x{}", hex::encode(b))),
        String(s) => serde_json::Value::String(s.clone()),
        Array(items) | Tuple(items) => {
            serde_json::Value::Array(items.iter().map(abi_value_to_json).collect())
        }
    }
}

/// Serializes a sequence with one-space indentation, per §6's
/// "pretty-printed for diffability" requirement.
pub fn serialize_sequence(sequence: &CallSequence) -> Result<Vec<u8>> {
    let elements: Vec<ElementJson> = sequence.elements.iter().map(element_to_json).collect();
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b" ");
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&elements, &mut ser)
        .map_err(|e| CorpusError::Malformed("<in-memory>".into(), e.to_string()))?;
    Ok(buf)
}

/// `<unix-nanos>-<uuid-v4>.json`. Uniqueness relies on the UUID component;
/// the timestamp is purely for operator-facing chronological sorting.
pub fn file_name(unix_nanos: u128) -> String {
    format!("{unix_nanos}-{}.json", Uuid::new_v4())
}

pub fn partition_path(root: &Path, partition: Partition) -> PathBuf {
    root.join(partition.relative_dir())
}

/// Deterministic dedup hash over a sequence's stable field order — binary
/// argument bytes, not their JSON text — so semantically identical
/// sequences dedupe even if loaded from files with different key ordering.
pub fn sequence_hash(sequence: &CallSequence) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for element in &sequence.elements {
        hash_call(&mut hasher, &element.call);
        hasher.update(element.block_number_delay.to_be_bytes());
        hasher.update(element.block_timestamp_delay.to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn hash_call(hasher: &mut Sha256, call: &Call) {
    hasher.update(call.from.as_bytes());
    if let Some(to) = call.to {
        hasher.update(to.as_bytes());
    }
    let mut value_bytes = [0u8; 32];
    call.value.to_big_endian(&mut value_bytes);
    hasher.update(value_bytes);
    hasher.update(call.gas_limit.to_be_bytes());
    match &call.data {
        CallData::Abi { selector, args, .. } => {
            hasher.update(selector);
            hasher.update(crate::value::encode::encode_args(args));
        }
        CallData::Raw(bytes) => hasher.update(bytes),
    }
}

fn parse_hex_address(s: &str) -> Result<H160> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| CorpusError::Malformed(s.into(), e.to_string()))?;
    Ok(H160::from_slice(&bytes))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x")).map_err(|e| CorpusError::Malformed(s.into(), e.to_string()).into())
}

fn parse_hex_u256(s: &str) -> Result<U256> {
    Ok(U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| CorpusError::Malformed(s.into(), e.to_string()))?)
}

fn decode_abi_value(json: &serde_json::Value, ty: &AbiType) -> Result<AbiValue> {
    let malformed = |msg: &str| CorpusError::Malformed(json.to_string(), msg.to_string());
    match ty {
        AbiType::Address => {
            let s = json.as_str().ok_or_else(|| malformed("expected address string"))?;
            Ok(AbiValue::Address(parse_hex_address(s)?))
        }
        AbiType::Bool => Ok(AbiValue::Bool(
            json.as_bool().ok_or_else(|| malformed("expected bool"))?,
        )),
        AbiType::Uint(width) => {
            let s = json.as_str().ok_or_else(|| malformed("expected uint hex string"))?;
            Ok(AbiValue::Uint(parse_hex_u256(s)?, *width))
        }
        AbiType::Int(width) => {
            let s = json.as_str().ok_or_else(|| malformed("expected int hex string"))?;
            Ok(AbiValue::Int(parse_hex_u256(s)?, *width))
        }
        AbiType::FixedBytes(_) => {
            let s = json.as_str().ok_or_else(|| malformed("expected bytes hex string"))?;
            Ok(AbiValue::FixedBytes(parse_hex_bytes(s)?))
        }
        AbiType::Bytes => {
            let s = json.as_str().ok_or_else(|| malformed("expected bytes hex string"))?;
            Ok(AbiValue::Bytes(parse_hex_bytes(s)?))
        }
        AbiType::String => Ok(AbiValue::String(
            json.as_str().ok_or_else(|| malformed("expected string"))?.to_string(),
        )),
        AbiType::Array(elem) => {
            let items = json.as_array().ok_or_else(|| malformed("expected array"))?;
            Ok(AbiValue::Array(
                items.iter().map(|v| decode_abi_value(v, elem)).collect::<Result<Vec<_>>>()?,
            ))
        }
        AbiType::FixedArray(elem, len) => {
            let items = json.as_array().ok_or_else(|| malformed("expected array"))?;
            if items.len() != *len {
                return Err(malformed("fixed array length mismatch").into());
            }
            Ok(AbiValue::Array(
                items.iter().map(|v| decode_abi_value(v, elem)).collect::<Result<Vec<_>>>()?,
            ))
        }
        AbiType::Tuple(fields) => {
            let items = json.as_array().ok_or_else(|| malformed("expected tuple array"))?;
            if items.len() != fields.len() {
                return Err(malformed("tuple arity mismatch").into());
            }
            Ok(AbiValue::Tuple(
                items
                    .iter()
                    .zip(fields)
                    .map(|(v, t)| decode_abi_value(v, t))
                    .collect::<Result<Vec<_>>>()?,
            ))
        }
    }
}

/// Parses a persisted sequence file, resolving each element's `to` address
/// and method signature against `artifacts` to recover typed arguments. A
/// sequence referencing an address/method the artifact set does not know
/// about is rejected with `CorpusError::UnresolvableEntry`, matching
/// `Initialize`'s "every element resolves successfully" validity
/// requirement (§4.7).
pub fn deserialize_sequence(bytes: &[u8], artifacts: &ArtifactSet) -> Result<CallSequence> {
    let raw: Vec<ElementJson> =
        serde_json::from_slice(bytes).map_err(|e| CorpusError::Malformed("<file>".into(), e.to_string()))?;

    let mut elements = Vec::with_capacity(raw.len());
    for item in raw {
        let from = parse_hex_address(&item.call.from)?;
        let to = item.call.to.as_deref().map(parse_hex_address).transpose()?;
        let value = parse_hex_u256(&item.call.value)?;

        let (data, contract_name) = match (&item.call.data_abi, &item.call.data) {
            (Some(abi), _) => {
                let to_addr = to.ok_or_else(|| {
                    CorpusError::UnresolvableEntry("dataAbi call with no `to`".into())
                })?;
                let contract = artifacts.contract_at(to_addr).ok_or_else(|| {
                    CorpusError::UnresolvableEntry(format!("no contract deployed at {to_addr:?}"))
                })?;
                let method = contract
                    .abi
                    .iter()
                    .find(|m| m.signature() == abi.method_signature)
                    .ok_or_else(|| {
                        CorpusError::UnresolvableEntry(format!(
                            "{} has no method {}",
                            contract.name, abi.method_signature
                        ))
                    })?;
                let args = abi
                    .args
                    .iter()
                    .zip(&method.inputs)
                    .map(|(v, t)| decode_abi_value(v, t))
                    .collect::<Result<Vec<_>>>()?;
                (
                    CallData::Abi {
                        method_signature: abi.method_signature.clone(),
                        selector: method.selector,
                        args,
                    },
                    Some(contract.name.clone()),
                )
            }
            (None, Some(raw_data)) => (CallData::Raw(parse_hex_bytes(raw_data)?), None),
            (None, None) => {
                return Err(CorpusError::Malformed("<file>".into(), "element has neither dataAbi nor data".into()).into())
            }
        };

        elements.push(CallSequenceElement {
            call: Call {
                from,
                to,
                value,
                gas_limit: item.call.gas_limit,
                data,
            },
            contract_name,
            block_number_delay: item.block_number_delay,
            block_timestamp_delay: item.block_timestamp_delay,
        });
    }
    Ok(CallSequence { elements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H160, U256};

    fn sample_sequence() -> CallSequence {
        CallSequence {
            elements: vec![CallSequenceElement {
                call: Call {
                    from: H160::repeat_byte(1),
                    to: Some(H160::repeat_byte(2)),
                    value: U256::zero(),
                    gas_limit: 100_000,
                    data: CallData::Raw(vec![0xde, 0xad]),
                },
                contract_name: Some("A".into()),
                block_number_delay: 1,
                block_timestamp_delay: 1,
            }],
        }
    }

    #[test]
    fn hash_is_stable_across_two_identical_sequences() {
        assert_eq!(sequence_hash(&sample_sequence()), sequence_hash(&sample_sequence()));
    }

    #[test]
    fn hash_changes_with_a_different_delay() {
        let mut other = sample_sequence();
        other.elements[0].block_number_delay = 2;
        assert_ne!(sequence_hash(&sample_sequence()), sequence_hash(&other));
    }

    #[test]
    fn serialization_uses_one_space_indentation() {
        let bytes = serialize_sequence(&sample_sequence()).unwrap();
        let text = std::string::String::from_utf8(bytes).unwrap();
        assert!(text.contains("\n {"));
    }

    #[test]
    fn file_names_are_unique_for_the_same_timestamp() {
        assert_ne!(file_name(123), file_name(123));
    }
}
