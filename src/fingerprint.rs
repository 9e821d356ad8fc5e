//! Artifact fingerprint (C12): detects when a corpus was built against a
//! different compilation than the one about to run.
//!
//! Net new — the teacher has no staleness check of its own — grounded on
//! `evm/contract_utils.rs`'s `set_hash` keccak-of-a-name helper, retargeted
//! from keccak to SHA-256 per §4.12, and generalized from "one name" to
//! "every contract's name, init bytecode, and runtime bytecode".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifacts::CompiledContract;

/// `{hash, timestamp}`, persisted as `.medusa-artifact-hash` at the corpus
/// root (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHashCache {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Lowercase hex SHA-256 over contracts sorted lexicographically by name,
/// each contributing `name ‖ init_bytecode ‖ runtime_bytecode`. Deterministic
/// regardless of whether `contracts` arrived as a map or a list (§8 seed
/// scenario 1).
pub fn compute_artifact_hash<'a>(contracts: impl IntoIterator<Item = &'a CompiledContract>) -> String {
    let mut sorted: Vec<&CompiledContract> = contracts.into_iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for contract in sorted {
        hasher.update(contract.name.as_bytes());
        hasher.update(&contract.init_bytecode);
        hasher.update(&contract.runtime_bytecode);
    }
    hex::encode(hasher.finalize())
}

/// Human-readable "same artifacts as N ago" / "new artifacts" message for
/// the operator, given the freshly computed hash and the cache loaded from
/// disk (if any).
pub fn describe_staleness(
    current_hash: &str,
    cached: Option<&ArtifactHashCache>,
    now: DateTime<Utc>,
) -> String {
    match cached {
        Some(cache) if cache.hash == current_hash => {
            let elapsed = now.signed_duration_since(cache.timestamp);
            format!(
                "corpus was built against the same artifacts {} ago",
                humanize_duration(elapsed)
            )
        }
        Some(_) => "corpus was built against different artifacts; starting fresh".to_string(),
        None => "no prior artifact fingerprint found; starting fresh".to_string(),
    }
}

fn humanize_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ContractKind;

    fn contract(name: &str) -> CompiledContract {
        CompiledContract {
            name: name.to_string(),
            abi: Vec::new(),
            init_bytecode: vec![0x60, 0x80],
            runtime_bytecode: vec![0x60, 0x80, 0x52],
            src_map_init: String::new(),
            src_map_runtime: String::new(),
            kind: ContractKind::Contract,
        }
    }

    #[test]
    fn matches_seed_scenario_1() {
        let expected = {
            let mut hasher = Sha256::new();
            hasher.update(b"A");
            hasher.update([0x60, 0x80]);
            hasher.update([0x60, 0x80, 0x52]);
            hex::encode(hasher.finalize())
        };
        assert_eq!(compute_artifact_hash(&[contract("A")]), expected);
    }

    #[test]
    fn is_invariant_under_contract_order() {
        let forward = compute_artifact_hash(&[contract("A"), contract("B")]);
        let reversed = compute_artifact_hash(&[contract("B"), contract("A")]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn changes_on_single_byte_difference() {
        let mut altered = contract("A");
        altered.init_bytecode[0] = 0x61;
        assert_ne!(
            compute_artifact_hash(&[contract("A")]),
            compute_artifact_hash(&[altered]),
        );
    }

    #[test]
    fn empty_input_is_the_hash_of_the_empty_stream() {
        let empty: Vec<CompiledContract> = Vec::new();
        assert_eq!(compute_artifact_hash(&empty), hex::encode(Sha256::digest([])));
    }
}
